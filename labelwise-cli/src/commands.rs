//! CLI subcommand handlers.

use anyhow::{Context, bail};
use labelwise_ml::contract::ValidationLimits;
use labelwise_ml::eval::{AuditReport, write_audit, write_jsonl};
use labelwise_ml::{
    DecisionEngine, DecisionRecord, ExplanationGraph, InputExample, LabelwiseConfig,
    load_config, load_config_file, validate_value,
};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Commands, ConfigAction};

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub workspace: PathBuf,
    pub config: Option<PathBuf>,
    pub weights: Option<PathBuf>,
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, options: &GlobalOptions) -> anyhow::Result<()> {
    match command {
        Commands::Predict {
            text,
            input_jsonl,
            out_jsonl,
            graph,
        } => handle_predict(options, text, input_jsonl, out_jsonl, graph),
        Commands::Audit {
            input_jsonl,
            out_dir,
        } => handle_audit(options, &input_jsonl, &out_dir),
        Commands::Verify { input_jsonl } => handle_verify(options, &input_jsonl),
        Commands::Config { action } => handle_config(action, options),
    }
}

fn effective_config(options: &GlobalOptions) -> anyhow::Result<LabelwiseConfig> {
    let mut config = match &options.config {
        Some(path) => load_config_file(path)
            .map_err(|e| anyhow::anyhow!("Configuration error in {}: {}", path.display(), e))?,
        None => load_config(Some(&options.workspace), None)
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?,
    };
    if let Some(weights) = &options.weights {
        config.model.weights_path = Some(weights.clone());
    }
    Ok(config)
}

fn engine(options: &GlobalOptions) -> anyhow::Result<DecisionEngine> {
    let config = effective_config(options)?;
    DecisionEngine::from_config(config).map_err(|e| anyhow::anyhow!("Failed to load model: {}", e))
}

/// Examples from a JSONL file; blank lines are ignored.
pub fn read_examples(path: &Path) -> anyhow::Result<Vec<InputExample>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut examples = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let example: InputExample = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: not an input example", path.display(), i + 1))?;
        examples.push(example);
    }
    Ok(examples)
}

fn handle_predict(
    options: &GlobalOptions,
    text: Option<String>,
    input_jsonl: Option<PathBuf>,
    out_jsonl: Option<PathBuf>,
    graph: Option<PathBuf>,
) -> anyhow::Result<()> {
    let engine = engine(options)?;
    let records: Vec<DecisionRecord> = match (text, input_jsonl) {
        (Some(text), _) => vec![engine.infer(&InputExample::new(text))?],
        (None, Some(path)) => {
            let examples = read_examples(&path)?;
            let output = engine.run_batch(&examples)?;
            if !output.skipped.is_empty() {
                warn!(skipped = output.skipped.len(), "some examples produced no record");
            }
            output.records
        }
        (None, None) => bail!("predict needs --text or --input-jsonl"),
    };

    match &out_jsonl {
        Some(path) => {
            write_jsonl(path, &records)?;
            info!(records = records.len(), path = %path.display(), "records written");
        }
        None if records.len() == 1 => {
            println!("{}", serde_json::to_string_pretty(&records[0])?);
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            for record in &records {
                writeln!(stdout, "{}", record.to_json_line()?)?;
            }
        }
    }

    if let Some(path) = graph {
        let graphs: Vec<ExplanationGraph> = records.iter().map(ExplanationGraph::from_record).collect();
        write_jsonl(&path, &graphs)?;
        info!(graphs = graphs.len(), path = %path.display(), "explanation graphs written");
    }

    let abstained = records.iter().filter(|r| r.abstain.is_abstain).count();
    info!(records = records.len(), abstained, "prediction complete");
    Ok(())
}

fn handle_audit(options: &GlobalOptions, input: &Path, out_dir: &Path) -> anyhow::Result<()> {
    let engine = engine(options)?;
    let examples = read_examples(input)?;
    let run = engine.audit_batch(&examples)?;
    let config = engine.config();
    let report = AuditReport::from_run(&run, config.evidence.method, &config.baselines);
    let artifacts = write_audit(out_dir, &run, &report)?;
    println!("{}", report.to_markdown());
    println!("Evidence rows: {}", artifacts.evidence.display());
    println!("Report:        {}", artifacts.report.display());
    Ok(())
}

/// Per-line schema violations found by [`verify_file`].
#[derive(Debug, Default)]
pub struct VerifyOutcome {
    pub checked: usize,
    pub failures: Vec<(usize, Vec<String>)>,
}

/// Validate every non-blank line of a JSONL file as a decision record.
pub fn verify_file(path: &Path, limits: &ValidationLimits) -> anyhow::Result<VerifyOutcome> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut outcome = VerifyOutcome::default();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        outcome.checked += 1;
        let result = serde_json::from_str::<serde_json::Value>(&line)
            .map_err(|e| vec![format!("invalid JSON: {e}")])
            .and_then(|value| validate_value(&value, limits).map_err(|e| e.violations));
        if let Err(violations) = result {
            outcome.failures.push((i + 1, violations));
        }
    }
    Ok(outcome)
}

fn handle_verify(options: &GlobalOptions, input: &Path) -> anyhow::Result<()> {
    let config = effective_config(options)?;
    let outcome = verify_file(input, &ValidationLimits::from(&config))?;
    for (line, violations) in &outcome.failures {
        for violation in violations {
            println!("{}:{}: {}", input.display(), line, violation);
        }
    }
    println!(
        "{} record(s) checked, {} invalid",
        outcome.checked,
        outcome.failures.len()
    );
    if !outcome.failures.is_empty() {
        bail!("{} record(s) failed schema validation", outcome.failures.len());
    }
    Ok(())
}

fn handle_config(action: ConfigAction, options: &GlobalOptions) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = options.workspace.join(".labelwise");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&LabelwiseConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = effective_config(options)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelwise_ml::inference::BagOfEmbeddingsWeights;
    use pretty_assertions::assert_eq;

    fn write_weights(dir: &Path) -> PathBuf {
        let weights = BagOfEmbeddingsWeights::from_lexicon(
            "cli-test",
            &["adhd", "anxiety"],
            &[("restless", "adhd", 3.0), ("worry", "anxiety", 3.0)],
            6.0,
            -2.0,
        );
        let path = dir.join("weights.json");
        std::fs::write(&path, serde_json::to_string(&weights).unwrap()).unwrap();
        path
    }

    fn options(dir: &Path) -> GlobalOptions {
        GlobalOptions {
            workspace: dir.to_path_buf(),
            config: None,
            weights: Some(write_weights(dir)),
        }
    }

    #[test]
    fn test_read_examples_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        std::fs::write(
            &path,
            "{\"id\": \"a\", \"text\": \"so restless\"}\n\n{\"example_id\": \"b\", \"text\": \"worry\"}\n",
        )
        .unwrap();
        let examples = read_examples(&path).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1].id.as_deref(), Some("b"));
    }

    #[test]
    fn test_read_examples_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        std::fs::write(&path, "{\"text\": \"ok\"}\nnot json\n").unwrap();
        let err = read_examples(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }

    #[test]
    fn test_predicted_records_verify() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path());
        let input = dir.path().join("in.jsonl");
        std::fs::write(
            &input,
            "{\"id\": \"a\", \"text\": \"so restless all day\"}\n{\"id\": \"b\", \"text\": \"hi\"}\n",
        )
        .unwrap();
        let out = dir.path().join("out.jsonl");
        handle_predict(&opts, None, Some(input), Some(out.clone()), None).unwrap();

        let outcome = verify_file(&out, &ValidationLimits::from(&LabelwiseConfig::default())).unwrap();
        assert_eq!(outcome.checked, 2);
        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    }

    #[test]
    fn test_verify_reports_broken_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        std::fs::write(&path, "{\"version\": \"v1\"}\n{oops\n").unwrap();
        let outcome = verify_file(&path, &ValidationLimits::default()).unwrap();
        assert_eq!(outcome.checked, 2);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[1].0, 2);
    }

    #[test]
    fn test_audit_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path());
        let input = dir.path().join("in.jsonl");
        std::fs::write(&input, "{\"text\": \"so restless all day\"}\n").unwrap();
        let out_dir = dir.path().join("audit");
        handle_audit(&opts, &input, &out_dir).unwrap();
        assert!(out_dir.join("report.json").exists());
        assert!(out_dir.join("evidence.jsonl").exists());
        assert!(out_dir.join("summary.md").exists());
    }
}
