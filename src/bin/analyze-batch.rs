use std::{fs, path::PathBuf};

use clap::{Parser, ValueEnum};
use toolbench::analyze_batch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "analyze-batch")]
#[command(about = "Aggregate agent test result files into per-model precision/recall/F1")]
struct Args {
    /// Directories containing *_agent_test_results_*.json files
    #[arg(required = true)]
    batch_dirs: Vec<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let report = analyze_batch(&args.batch_dirs)?;

    let rendered = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
        OutputFormat::Text => report.render_text(),
    };

    match args.output {
        Some(path) => {
            fs::write(&path, rendered)?;
            println!("Analysis report written to: {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
