//! trainloop CLI — run the bundled demo experiment through the training driver.

mod commands;
mod demo;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// trainloop: epochs, evaluation cadence, checkpoints and metric logs.
#[derive(Parser, Debug)]
#[command(name = "trainloop", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train the linear-regression demo experiment
    Run(RunArgs),
    /// Print the resolved training configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Run description, used in run folder names
    #[arg(short, long, default_value = "linreg")]
    description: String,

    /// Do not create folders or write any files
    #[arg(long)]
    dry_run: bool,

    /// Number of epochs
    #[arg(long)]
    max_epochs: Option<u64>,

    /// Base directory for results/, checkpoints/ and tensorboard_logs/
    #[arg(short, long)]
    output_root: Option<PathBuf>,

    /// Disable the scalar log under tensorboard_logs/
    #[arg(long)]
    no_tensorboard: bool,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Number of input features of the synthetic problem
    #[arg(long, default_value = "4")]
    features: usize,

    /// Number of training samples
    #[arg(long, default_value = "2048")]
    train_samples: usize,

    /// Number of test samples
    #[arg(long, default_value = "256")]
    test_samples: usize,

    /// Mini-batch size
    #[arg(short, long, default_value = "32")]
    batch_size: usize,

    /// SGD learning rate
    #[arg(long, default_value = "0.05")]
    lr: f64,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "trainloop", "trainloop")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "trainloop.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let overrides = match &cli.command {
        Commands::Run(run) => Some(commands::run_overrides(run)),
        Commands::Config => None,
    };
    let args = trainloop_core::load_args(cli.config.as_deref(), overrides.as_ref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    match cli.command {
        Commands::Run(run) => commands::handle_run(run, args),
        Commands::Config => commands::handle_config(&args),
    }
}
