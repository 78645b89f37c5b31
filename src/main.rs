//! CLI entry point for `mail-analyzer`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use mail_analyzer::config::AnalyzerConfig;
use mail_analyzer::pipeline::MailProcessor;
use mail_analyzer::report;

#[derive(Parser)]
#[command(name = "mail-analyzer", version, about = "Analyze .eml files and their quoted threads")]
struct Cli {
    /// Directory scanned for .eml files (overrides MAIL_ANALYZER_MAIL_DIR)
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Output JSON file (overrides MAIL_ANALYZER_OUTPUT)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Reconstruct quoted threads and add timeline, dialogue and reply suggestions
    #[arg(short, long)]
    thread: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AnalyzerConfig::from_env().context("Invalid configuration")?;
    if let Some(input) = cli.input {
        config.mail_dir = input;
    }
    if let Some(output) = cli.output {
        config.output_json = output;
    }

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    setup_logging(level, &config.log_dir);

    tracing::info!(
        mail_dir = %config.mail_dir.display(),
        output = %config.output_json.display(),
        model = %config.llm.model,
        thread_aware = cli.thread,
        "Starting mail analysis"
    );

    let processor =
        MailProcessor::from_config(&config).context("Failed to create inference provider")?;

    let start = Instant::now();
    let reports = processor
        .process_dir(&config.mail_dir, cli.thread)
        .await
        .with_context(|| format!("Failed to scan {}", config.mail_dir.display()))?;
    report::save_json(&config.output_json, &reports).await?;

    eprintln!(
        "Analyzed {} message(s) in {:.1}s -> {}",
        reports.len(),
        start.elapsed().as_secs_f64(),
        config.output_json.display()
    );
    Ok(())
}

/// Stderr plus a daily-rolling file in `log_dir`. Falls back to stderr only
/// when the directory cannot be created.
fn setup_logging(level: &str, log_dir: &Path) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    if std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::daily(log_dir, "mail-analyzer.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}
