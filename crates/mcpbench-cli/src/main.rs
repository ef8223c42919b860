//! `mcpbench` — CLI entry point for running MCP agent tool-calling
//! evaluations (§6 ambient CLI addition).

mod loader;
mod runner;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use runner::{EvalRunner, Progress};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcpbench", about = "Evaluate MCP agent tool-calling behavior against declarative task suites")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an eval spec and report pass/fail per task.
    Run {
        /// Path to the eval spec file (YAML or JSON).
        #[arg(long)]
        eval: PathBuf,
        /// Only run tasks whose name matches this regex.
        #[arg(long)]
        filter: Option<String>,
        /// Write the `EvalResult[]` JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Colorize task start/pass/fail progress lines.
        #[arg(long, value_enum, default_value = "auto")]
        color: ColorMode,
    },
    /// Resolve and print the task set an eval spec would run, without executing anything.
    List {
        /// Path to the eval spec file (YAML or JSON).
        #[arg(long)]
        eval: PathBuf,
        /// Only list tasks whose name matches this regex.
        #[arg(long)]
        filter: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

fn colorize_enabled(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { eval, filter, out, color } => run(&eval, filter.as_deref(), out.as_deref(), color).await,
        Commands::List { eval, filter } => list(&eval, filter.as_deref()).await,
    }
}

async fn run(eval_path: &std::path::Path, filter: Option<&str>, out: Option<&std::path::Path>, color: ColorMode) -> anyhow::Result<()> {
    let colorize = colorize_enabled(color);
    let passed_count = Arc::new(AtomicUsize::new(0));
    let total_count = Arc::new(AtomicUsize::new(0));
    let passed_count_cb = passed_count.clone();
    let total_count_cb = total_count.clone();

    let runner = EvalRunner::load(eval_path, filter)
        .await?
        .with_progress(Arc::new(move |event| match event {
            Progress::TaskStart { name } => {
                eprintln!("{}", paint(colorize, "36", &format!("▶ {name}")));
            }
            Progress::TaskComplete { name, passed } => {
                total_count_cb.fetch_add(1, Ordering::Relaxed);
                if passed {
                    passed_count_cb.fetch_add(1, Ordering::Relaxed);
                    eprintln!("{}", paint(colorize, "32", &format!("✔ {name}")));
                } else {
                    eprintln!("{}", paint(colorize, "31", &format!("✘ {name}")));
                }
            }
        }));

    let results = runner.run().await?;
    let json = serde_json::to_string_pretty(&results)?;

    match out {
        Some(path) => tokio::fs::write(path, json).await?,
        None => println!("{json}"),
    }

    eprintln!(
        "{}/{} tasks passed",
        passed_count.load(Ordering::Relaxed),
        total_count.load(Ordering::Relaxed)
    );
    Ok(())
}

async fn list(eval_path: &std::path::Path, filter: Option<&str>) -> anyhow::Result<()> {
    let runner = EvalRunner::load(eval_path, filter).await?;
    for name in runner.task_names() {
        println!("{name}");
    }
    Ok(())
}

fn paint(enabled: bool, code: &str, text: &str) -> String {
    if enabled {
        format!("\x1b[{code}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}
