//! Faithfulness statistics: paired evidence-vs-baseline comparisons.
//!
//! Everything is computed per [`BaselineKind`]; comparisons of different kinds
//! are never mixed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::BaselineConfig;

use super::baselines::{BaselineKind, derive_seed};

/// Evidence and same-kind baseline results for one (example, label).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedComparison {
    pub example_id: String,
    pub label: String,
    pub kind: BaselineKind,
    pub evidence_delta: f64,
    pub baseline_delta: f64,
    pub evidence_passes: bool,
    pub baseline_passes: bool,
    /// `evidence_delta > baseline_delta`.
    pub dominant: bool,
}

impl PairedComparison {
    pub fn new(
        example_id: impl Into<String>,
        label: impl Into<String>,
        kind: BaselineKind,
        evidence: (f64, bool),
        baseline: (f64, bool),
    ) -> Self {
        Self {
            example_id: example_id.into(),
            label: label.into(),
            kind,
            evidence_delta: evidence.0,
            baseline_delta: baseline.0,
            evidence_passes: evidence.1,
            baseline_passes: baseline.1,
            dominant: evidence.0 > baseline.0,
        }
    }

    pub fn difference(&self) -> f64 {
        self.evidence_delta - self.baseline_delta
    }
}

/// Percentile bootstrap interval for a mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapCi {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_level: f64,
    pub resamples: usize,
}

/// Aggregate statistics for one baseline kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindStatistics {
    pub kind: BaselineKind,
    pub n: usize,
    /// Evidence pass rate over the paired sample.
    #[serde(rename = "A_pass_rate")]
    pub a_pass_rate: f64,
    /// Baseline pass rate over the same sample.
    #[serde(rename = "B_pass_rate")]
    pub b_pass_rate: f64,
    pub dominance_rate: f64,
    pub mean_evidence_delta: f64,
    pub mean_baseline_delta: f64,
    /// Mean of `evidence_delta - baseline_delta` with its bootstrap interval.
    pub mean_difference: Option<BootstrapCi>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn rate(flags: impl Iterator<Item = bool>) -> f64 {
    let (hits, total) = flags.fold((0usize, 0usize), |(h, t), f| (h + f as usize, t + 1));
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Fraction of comparisons where evidence beats the baseline.
pub fn dominance_rate(comparisons: &[PairedComparison]) -> f64 {
    rate(comparisons.iter().map(|c| c.dominant))
}

/// Resample `values` with replacement `resamples` times and take percentile
/// bounds of the resampled means. `None` for an empty sample.
pub fn bootstrap_mean_ci(
    values: &[f64],
    resamples: usize,
    confidence_level: f64,
    rng: &mut StdRng,
) -> Option<BootstrapCi> {
    if values.is_empty() || resamples == 0 {
        return None;
    }
    let n = values.len();
    let mut means: Vec<f64> = (0..resamples)
        .map(|_| (0..n).map(|_| values[rng.gen_range(0..n)]).sum::<f64>() / n as f64)
        .collect();
    means.sort_by(f64::total_cmp);

    let alpha = (1.0 - confidence_level) / 2.0;
    let last = (resamples - 1) as f64;
    let lower = means[(alpha * last).round() as usize];
    let upper = means[((1.0 - alpha) * last).round() as usize];
    Some(BootstrapCi {
        mean: mean(values),
        lower,
        upper,
        confidence_level,
        resamples,
    })
}

/// Statistics for comparisons that all share one kind.
pub fn kind_statistics(
    kind: BaselineKind,
    comparisons: &[&PairedComparison],
    config: &BaselineConfig,
) -> KindStatistics {
    let diffs: Vec<f64> = comparisons.iter().map(|c| c.difference()).collect();
    let evidence: Vec<f64> = comparisons.iter().map(|c| c.evidence_delta).collect();
    let baseline: Vec<f64> = comparisons.iter().map(|c| c.baseline_delta).collect();
    let mut rng = StdRng::seed_from_u64(derive_seed(config.seed, &["bootstrap", kind.as_str()]));
    KindStatistics {
        kind,
        n: comparisons.len(),
        a_pass_rate: rate(comparisons.iter().map(|c| c.evidence_passes)),
        b_pass_rate: rate(comparisons.iter().map(|c| c.baseline_passes)),
        dominance_rate: rate(comparisons.iter().map(|c| c.dominant)),
        mean_evidence_delta: mean(&evidence),
        mean_baseline_delta: mean(&baseline),
        mean_difference: bootstrap_mean_ci(
            &diffs,
            config.bootstrap_resamples,
            config.confidence_level,
            &mut rng,
        ),
    }
}

/// Group by kind and compute each kind's statistics independently.
pub fn aggregate(
    comparisons: &[PairedComparison],
    config: &BaselineConfig,
) -> BTreeMap<BaselineKind, KindStatistics> {
    let mut by_kind: BTreeMap<BaselineKind, Vec<&PairedComparison>> = BTreeMap::new();
    for c in comparisons {
        by_kind.entry(c.kind).or_default().push(c);
    }
    by_kind
        .into_iter()
        .map(|(kind, group)| (kind, kind_statistics(kind, &group, config)))
        .collect()
}
