//! labelwise CLI: evidence-backed, abstaining multi-label decisions.
//!
//! Single-text and JSONL batch prediction, faithfulness baseline audits, and
//! offline verification of decision records.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// labelwise: auditable decisions for multi-label text classifiers
#[derive(Parser, Debug)]
#[command(name = "labelwise", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (reads `.labelwise/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path; replaces the layered lookup
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model weights (JSON); overrides `model.weights_path`
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Produce decision records for one text or a JSONL file of examples
    Predict {
        /// Text to classify
        #[arg(long, conflicts_with = "input_jsonl")]
        text: Option<String>,

        /// JSONL file with one `{"id": ..., "text": ...}` object per line
        #[arg(long)]
        input_jsonl: Option<PathBuf>,

        /// Write records here instead of stdout
        #[arg(long)]
        out_jsonl: Option<PathBuf>,

        /// Also write one explanation graph per record to this JSONL file
        #[arg(long)]
        graph: Option<PathBuf>,
    },
    /// Compare evidence against random-span and label-shuffle baselines
    Audit {
        /// JSONL file of examples
        #[arg(long)]
        input_jsonl: PathBuf,

        /// Directory for evidence.jsonl, report.json and summary.md
        #[arg(long, default_value = "audit")]
        out_dir: PathBuf,
    },
    /// Validate decision records against the v1 schema
    Verify {
        /// JSONL file of decision records
        #[arg(long)]
        input_jsonl: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to `.labelwise/config.toml`
    Init,
    /// Print the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr; stdout carries records
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "labelwise", "labelwise")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "labelwise.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = commands::GlobalOptions {
        workspace,
        config: cli.config,
        weights: cli.weights,
    };
    commands::handle_command(cli.command, &options)
}
