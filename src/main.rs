use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use signal_forge::config::{load as load_config, PipelineConfig};
use signal_forge::ml::{Architecture, ModelKey, ModelRegistry, SignalEngine};
use signal_forge::pipeline::{write_report, TrainingJob, TrainingPipeline};
use signal_forge::risk::RiskPolicy;
use signal_forge::types::{Bar, TimeFrame};

#[derive(Parser)]
#[command(name = "signal-forge")]
#[command(version = "0.1.0")]
#[command(about = "Train sequence models on OHLCV history and serve risk-adjusted signals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "signal_forge.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model from a JSON array of bars
    Train {
        /// Path to the bars JSON file
        #[arg(short, long)]
        bars: PathBuf,
        /// Instrument symbol (e.g., AAPL, BTC/USDT)
        #[arg(short, long)]
        instrument: String,
        /// Timeframe (1m, 5m, 15m, 1h, 4h, 1d)
        #[arg(short = 'f', long, default_value = "5m")]
        timeframe: String,
        /// lstm, gru, transformer or all
        #[arg(short, long, default_value = "lstm")]
        architecture: String,
        /// Epoch budget (defaults to the configured value)
        #[arg(short, long)]
        epochs: Option<usize>,
    },
    /// Predict the next signal from the most recent bars
    Predict {
        /// Path to the bars JSON file
        #[arg(short, long)]
        bars: PathBuf,
        /// Instrument symbol
        #[arg(short, long)]
        instrument: String,
        /// Timeframe (1m, 5m, 15m, 1h, 4h, 1d)
        #[arg(short = 'f', long, default_value = "5m")]
        timeframe: String,
        /// Risk tolerance, 1 (cautious) to 10 (aggressive)
        #[arg(short, long)]
        risk: Option<u8>,
        /// Model architecture (defaults to the configured value)
        #[arg(short, long)]
        architecture: Option<String>,
    },
    /// List stored model checkpoints
    Models,
    /// Write a default configuration file
    InitConfig {
        /// Output path (defaults to --config)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Train { bars, instrument, timeframe, architecture, epochs } => {
            let config = load_config(&cli.config)?;
            let epochs = epochs.unwrap_or(config.training.epochs);
            run_training(config, &bars, &instrument, &timeframe, &architecture, epochs)?;
        }
        Commands::Predict { bars, instrument, timeframe, risk, architecture } => {
            let config = load_config(&cli.config)?;
            run_prediction(config, &bars, &instrument, &timeframe, risk, architecture.as_deref())?;
        }
        Commands::Models => {
            list_models(&load_config(&cli.config)?)?;
        }
        Commands::InitConfig { output, force } => {
            init_config(&output.unwrap_or(cli.config), force)?;
        }
    }

    Ok(())
}

fn read_bars(path: &Path) -> Result<Vec<Bar>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bars from {}", path.display()))?;
    let bars: Vec<Bar> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of bars", path.display()))?;
    info!("Read {} bars from {}", bars.len(), path.display());
    Ok(bars)
}

fn run_training(
    config: PipelineConfig,
    bars_path: &Path,
    instrument: &str,
    timeframe: &str,
    architecture: &str,
    epochs: usize,
) -> Result<()> {
    let timeframe: TimeFrame = timeframe.parse()?;
    let architectures: Vec<Architecture> = if architecture.eq_ignore_ascii_case("all") {
        Architecture::ALL.to_vec()
    } else {
        vec![architecture.parse()?]
    };
    let bars = read_bars(bars_path)?;

    let report_dir = config.registry.root.clone();
    let registry = Arc::new(ModelRegistry::open(&report_dir)?);
    let pipeline = TrainingPipeline::new(registry, config)?;

    info!("Training {} {} on {:?} for up to {} epochs", instrument, timeframe, architectures, epochs);

    let jobs: Vec<TrainingJob> = architectures
        .iter()
        .map(|arch| TrainingJob {
            bars: bars.clone(),
            instrument: instrument.to_string(),
            timeframe,
            architecture: *arch,
            epoch_budget: epochs,
        })
        .collect();

    let mut failures = 0;
    for (job, result) in jobs.iter().zip(pipeline.train_many(&jobs)) {
        let key = ModelKey::new(&job.instrument, job.timeframe, job.architecture)?;
        match result {
            Ok(report) => {
                let path = write_report(&report_dir, &key, &report)?;
                println!(
                    "{}: val_acc={:.4} test_acc={:.4} epochs={} ({:?}) -> {}",
                    key,
                    report.best_validation_accuracy,
                    report.test_accuracy,
                    report.epochs_run,
                    report.stop_reason,
                    path.display()
                );
                if let Some(warning) = &report.class_imbalance_warning {
                    println!(
                        "  warning: Sell {:.1}% / Buy {:.1}% below {:.0}% floor",
                        warning.sell_ratio * 100.0,
                        warning.buy_ratio * 100.0,
                        warning.floor * 100.0
                    );
                }
            }
            Err(e) => {
                failures += 1;
                error!("Training {} failed: {}", key, e);
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} training runs failed", failures, jobs.len()));
    }
    Ok(())
}

fn run_prediction(
    config: PipelineConfig,
    bars_path: &Path,
    instrument: &str,
    timeframe: &str,
    risk: Option<u8>,
    architecture: Option<&str>,
) -> Result<()> {
    let timeframe: TimeFrame = timeframe.parse()?;
    let architecture = match architecture {
        Some(a) => a.parse()?,
        None => config.inference.architecture,
    };
    let risk = risk.unwrap_or(config.inference.default_risk_tolerance);
    let bars = read_bars(bars_path)?;

    let registry = Arc::new(ModelRegistry::open(&config.registry.root)?);
    let engine = SignalEngine::new(registry)
        .with_architecture(architecture)
        .with_sequence_length(config.sequence.length)
        .with_policy(RiskPolicy::new(config.risk));

    let prediction = engine.predict(&bars, instrument, timeframe, risk)?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

fn list_models(config: &PipelineConfig) -> Result<()> {
    let registry = ModelRegistry::open(&config.registry.root)?;
    let keys = registry.list_models()?;

    println!("\n=== Stored models in {} ===", config.registry.root.display());
    if keys.is_empty() {
        println!("(none)");
    }
    for key in keys {
        let normalizer = if registry.has_normalizer(&key.series())? { "yes" } else { "MISSING" };
        println!("{:<32} normalizer: {}", key.to_string(), normalizer);
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!("{} already exists (use --force to overwrite)", path.display()));
    }
    let text = PipelineConfig::default().to_toml()?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}
