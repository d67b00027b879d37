//! Configuration for the evidence & decision layer.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Every component
//! receives its slice of this struct by reference; nothing reads policy from
//! global state.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::eval::faithfulness::MaskStrategy;
use crate::interpretability::attribution::{EvidenceMethod, IgBaseline, Reduction};
use crate::interpretability::spans::TokenSelection;

/// Top-level labelwise configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelwiseConfig {
    /// Reference model loading.
    #[serde(default)]
    pub model: ModelConfig,
    /// Attribution and span extraction.
    #[serde(default)]
    pub evidence: EvidenceConfig,
    /// Deletion-test pass criteria.
    #[serde(default)]
    pub faithfulness: FaithfulnessConfig,
    /// Baseline sampling and bootstrap statistics.
    #[serde(default)]
    pub baselines: BaselineConfig,
    /// Abstention policy.
    #[serde(default)]
    pub decision: DecisionConfig,
    /// Reference sanitizer rules.
    #[serde(default)]
    pub sanitization: SanitizationConfig,
    /// Temperature scaling.
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Decision thresholds with provenance.
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Worker pool and optional record extras.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Reference model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// JSON weights for the bag-of-embeddings reference classifier.
    #[serde(default)]
    pub weights_path: Option<PathBuf>,
    /// Maximum token sequence length, special tokens included.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights_path: None,
            max_len: default_max_len(),
        }
    }
}

fn default_max_len() -> usize {
    512
}

/// Attribution and span extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// Attribution strategy.
    #[serde(default)]
    pub method: EvidenceMethod,
    /// Number of top tokens considered for spans.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Maximum spans emitted per label.
    #[serde(default = "default_max_spans")]
    pub max_spans: usize,
    /// Character gap across which adjacent tokens are merged.
    #[serde(default = "default_gap_tolerance")]
    pub gap_tolerance: usize,
    /// Interpolation steps for integrated gradients.
    #[serde(default = "default_ig_steps")]
    pub ig_steps: usize,
    /// Path origin for integrated gradients.
    #[serde(default)]
    pub ig_baseline: IgBaseline,
    /// How a per-dimension attribution vector collapses to one score.
    #[serde(default)]
    pub reduction: Reduction,
    /// Whether tokens are ranked by absolute or positive score.
    #[serde(default)]
    pub selection: TokenSelection,
    /// Snippet length limit enforced by validation and repair.
    #[serde(default = "default_snippet_max_chars")]
    pub snippet_max_chars: usize,
    /// Labels below this calibrated probability are not explained.
    #[serde(default = "default_evidence_min_probability")]
    pub min_probability: f64,
    /// Also explain the N most probable labels, predicted or not (0 = predicted only).
    #[serde(default)]
    pub explain_top_k: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            method: EvidenceMethod::default(),
            top_k: default_top_k(),
            max_spans: default_max_spans(),
            gap_tolerance: default_gap_tolerance(),
            ig_steps: default_ig_steps(),
            ig_baseline: IgBaseline::default(),
            reduction: Reduction::default(),
            selection: TokenSelection::default(),
            snippet_max_chars: default_snippet_max_chars(),
            min_probability: default_evidence_min_probability(),
            explain_top_k: 0,
        }
    }
}

fn default_top_k() -> usize {
    12
}

fn default_max_spans() -> usize {
    3
}

fn default_gap_tolerance() -> usize {
    1
}

fn default_ig_steps() -> usize {
    16
}

fn default_snippet_max_chars() -> usize {
    200
}

fn default_evidence_min_probability() -> f64 {
    0.10
}

/// Deletion-test pass criteria, evaluated per label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaithfulnessConfig {
    /// A label passes if any single span drops the probability by at least this much.
    #[serde(default = "default_any_span_min_delta")]
    pub any_span_min_delta: f64,
    /// ...or if every span drops it by at least this much.
    #[serde(default = "default_all_span_min_delta")]
    pub all_span_min_delta: f64,
    /// How masked tokens are neutralized.
    #[serde(default)]
    pub mask_strategy: MaskStrategy,
}

impl Default for FaithfulnessConfig {
    fn default() -> Self {
        Self {
            any_span_min_delta: default_any_span_min_delta(),
            all_span_min_delta: default_all_span_min_delta(),
            mask_strategy: MaskStrategy::default(),
        }
    }
}

fn default_any_span_min_delta() -> f64 {
    0.05
}

fn default_all_span_min_delta() -> f64 {
    0.03
}

/// Baseline sampling and bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Base seed; each example derives its own seed from this and its id.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Bootstrap resamples for the mean paired difference (>= 1000).
    #[serde(default = "default_bootstrap_resamples")]
    pub bootstrap_resamples: usize,
    /// Two-sided confidence level of the bootstrap interval.
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    /// How many of the most probable labels each audited example contributes.
    #[serde(default = "default_audit_top_labels")]
    pub audit_top_labels: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            bootstrap_resamples: default_bootstrap_resamples(),
            confidence_level: default_confidence_level(),
            audit_top_labels: default_audit_top_labels(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_bootstrap_resamples() -> usize {
    1000
}

fn default_confidence_level() -> f64 {
    0.95
}

fn default_audit_top_labels() -> usize {
    2
}

/// Abstention policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Abstain when the maximum calibrated probability falls below this.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    /// Abstain when the sanitized, trimmed input is shorter than this.
    #[serde(default = "default_min_input_chars")]
    pub min_input_chars: usize,
    /// Decimal places kept by the precision repair.
    #[serde(default = "default_probability_decimals")]
    pub probability_decimals: u32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            min_input_chars: default_min_input_chars(),
            probability_decimals: default_probability_decimals(),
        }
    }
}

fn default_confidence_floor() -> f64 {
    0.40
}

fn default_min_input_chars() -> usize {
    5
}

fn default_probability_decimals() -> u32 {
    4
}

/// Reference sanitizer rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizationConfig {
    pub enabled: bool,
    pub version: String,
    pub strip_urls: bool,
    pub strip_subreddit_refs: bool,
    pub normalize_whitespace: bool,
    /// Case-insensitive whole-word terms whose presence after sanitization is leakage.
    pub leakage_terms: Vec<String>,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version: "v1".into(),
            strip_urls: true,
            strip_subreddit_refs: true,
            normalize_whitespace: true,
            leakage_terms: Vec::new(),
        }
    }
}

/// Temperature scaling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
        }
    }
}

fn default_temperature() -> f64 {
    1.0
}

/// Decision thresholds. Lookup order: per-label, global, built-in 0.5.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub global: Option<f64>,
    #[serde(default)]
    pub per_label: BTreeMap<String, f64>,
}

/// Worker pool and optional record extras.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads for batch processing.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attach the label dependency graph to each record.
    #[serde(default)]
    pub include_dependency_graph: bool,
    /// Directed co-occurrence priors used by the dependency graph.
    #[serde(default = "default_dependency_edges")]
    pub dependency_edges: Vec<(String, String)>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            include_dependency_graph: false,
            dependency_edges: default_dependency_edges(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_dependency_edges() -> Vec<(String, String)> {
    [
        ("ptsd", "depression"),
        ("ptsd", "anxiety"),
        ("adhd", "anxiety"),
        ("adhd", "depression"),
        ("depression", "anxiety"),
        ("bipolar", "depression"),
        ("ocd", "anxiety"),
    ]
    .iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

impl LabelwiseConfig {
    /// Reject configurations no component can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ev = &self.evidence;
        if ev.top_k == 0 {
            return Err(ConfigError::invalid("evidence.top_k", "must be > 0"));
        }
        if ev.max_spans == 0 {
            return Err(ConfigError::invalid("evidence.max_spans", "must be > 0"));
        }
        if ev.ig_steps < 2 {
            return Err(ConfigError::invalid("evidence.ig_steps", "must be >= 2"));
        }
        if ev.snippet_max_chars < 4 {
            return Err(ConfigError::invalid(
                "evidence.snippet_max_chars",
                "must leave room for the ellipsis (>= 4)",
            ));
        }
        check_unit("evidence.min_probability", ev.min_probability)?;

        let f = &self.faithfulness;
        check_unit("faithfulness.any_span_min_delta", f.any_span_min_delta)?;
        check_unit("faithfulness.all_span_min_delta", f.all_span_min_delta)?;

        let b = &self.baselines;
        if b.bootstrap_resamples < 1000 {
            return Err(ConfigError::invalid(
                "baselines.bootstrap_resamples",
                format!("must be >= 1000, got {}", b.bootstrap_resamples),
            ));
        }
        if !(b.confidence_level > 0.0 && b.confidence_level < 1.0) {
            return Err(ConfigError::invalid(
                "baselines.confidence_level",
                "must lie strictly between 0 and 1",
            ));
        }

        check_unit("decision.confidence_floor", self.decision.confidence_floor)?;
        if self.decision.probability_decimals > 12 {
            return Err(ConfigError::invalid(
                "decision.probability_decimals",
                "must be <= 12",
            ));
        }

        let t = self.calibration.temperature;
        if !t.is_finite() || t <= 0.0 {
            return Err(ConfigError::invalid(
                "calibration.temperature",
                format!("must be finite and > 0, got {t}"),
            ));
        }

        if let Some(g) = self.thresholds.global {
            check_unit("thresholds.global", g)?;
        }
        for (label, value) in &self.thresholds.per_label {
            check_unit(&format!("thresholds.per_label.{label}"), *value)?;
        }

        if self.runtime.workers == 0 {
            return Err(ConfigError::invalid("runtime.workers", "must be > 0"));
        }
        if self.model.max_len < 3 {
            return Err(ConfigError::invalid("model.max_len", "must be >= 3"));
        }
        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must lie in [0, 1], got {value}"),
        ))
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `LABELWISE_`)
/// 3. Workspace-local config (`.labelwise/config.toml`)
/// 4. User config (`~/.config/labelwise/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&LabelwiseConfig>,
) -> Result<LabelwiseConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(LabelwiseConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "labelwise", "labelwise") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".labelwise").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // LABELWISE_EVIDENCE__METHOD, LABELWISE_DECISION__CONFIDENCE_FLOOR, ...
    figment = figment.merge(Env::prefixed("LABELWISE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: LabelwiseConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from one explicit TOML file layered over the defaults.
pub fn load_config_file(path: &Path) -> Result<LabelwiseConfig, ConfigError> {
    let config: LabelwiseConfig = Figment::from(Serialized::defaults(LabelwiseConfig::default()))
        .merge(Toml::file(path))
        .extract()
        .map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
