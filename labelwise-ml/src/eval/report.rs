//! Audit artifacts: evidence JSONL, aggregate JSON report, Markdown summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::config::BaselineConfig;
use crate::error::LabelwiseError;
use crate::eval::stats::{KindStatistics, aggregate};
use crate::interpretability::attribution::EvidenceMethod;
use crate::pipeline::{AuditRun, SkippedExample};

pub const EVIDENCE_FILE: &str = "evidence.jsonl";
pub const REPORT_FILE: &str = "report.json";
pub const SUMMARY_FILE: &str = "summary.md";

/// Aggregate outcome of one baseline audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub evidence_method: EvidenceMethod,
    pub examples: usize,
    pub evidence_rows: usize,
    pub skipped: usize,
    /// One entry per baseline kind that produced at least one paired comparison.
    pub baselines: Vec<KindStatistics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_examples: Vec<SkippedExample>,
}

impl AuditReport {
    pub fn from_run(run: &AuditRun, method: EvidenceMethod, config: &BaselineConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            evidence_method: method,
            examples: run.examples,
            evidence_rows: run.rows.len(),
            skipped: run.skipped.len(),
            baselines: aggregate(&run.comparisons, config).into_values().collect(),
            skipped_examples: run.skipped.clone(),
        }
    }

    pub fn kind(&self, name: &str) -> Option<&KindStatistics> {
        self.baselines.iter().find(|k| k.kind.as_str() == name)
    }

    /// Human-readable summary table.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Evidence faithfulness audit\n");
        let _ = writeln!(md, "- Run: `{}`", self.run_id);
        let _ = writeln!(md, "- Generated: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(md, "- Evidence method: `{}`", self.evidence_method);
        let _ = writeln!(
            md,
            "- Examples: {} ({} skipped), evidence rows: {}\n",
            self.examples, self.skipped, self.evidence_rows
        );

        if self.baselines.is_empty() {
            let _ = writeln!(md, "_No paired comparisons were produced._");
            return md;
        }
        let _ = writeln!(
            md,
            "| Baseline | n | Dominance | A pass | B pass | Mean diff | CI |"
        );
        let _ = writeln!(md, "|---|---:|---:|---:|---:|---:|---|");
        for k in &self.baselines {
            let (diff, ci) = match &k.mean_difference {
                Some(ci) => (
                    format!("{:.4}", ci.mean),
                    format!(
                        "[{:.4}, {:.4}] @ {:.0}%",
                        ci.lower,
                        ci.upper,
                        ci.confidence_level * 100.0
                    ),
                ),
                None => ("n/a".to_string(), "n/a".to_string()),
            };
            let _ = writeln!(
                md,
                "| {} | {} | {:.3} | {:.3} | {:.3} | {} | {} |",
                k.kind, k.n, k.dominance_rate, k.a_pass_rate, k.b_pass_rate, diff, ci
            );
        }
        md
    }
}

/// Write one JSON value per line.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), LabelwiseError> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Paths of the three artifacts written by [`write_audit`].
#[derive(Debug, Clone)]
pub struct AuditArtifacts {
    pub evidence: PathBuf,
    pub report: PathBuf,
    pub summary: PathBuf,
}

/// Write evidence rows, the JSON report and the Markdown summary into `dir`.
pub fn write_audit(
    dir: &Path,
    run: &AuditRun,
    report: &AuditReport,
) -> Result<AuditArtifacts, LabelwiseError> {
    fs::create_dir_all(dir)?;
    let artifacts = AuditArtifacts {
        evidence: dir.join(EVIDENCE_FILE),
        report: dir.join(REPORT_FILE),
        summary: dir.join(SUMMARY_FILE),
    };
    write_jsonl(&artifacts.evidence, &run.rows)?;
    fs::write(&artifacts.report, serde_json::to_string_pretty(report)?)?;
    fs::write(&artifacts.summary, report.to_markdown())?;
    info!(dir = %dir.display(), run_id = %report.run_id, "audit artifacts written");
    Ok(artifacts)
}
