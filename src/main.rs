use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use recoveryrs::config::AppConfig;
use recoveryrs::database::{CooldownStore, MemoryCooldownStore, SqliteCooldownStore};
use recoveryrs::engine::{run_refresh_loop, RecoveryEngine};
use recoveryrs::error::RecoveryRsError;
use recoveryrs::logging::{init_logging, log_error, LogLevel};
use recoveryrs::models::{DeltaTrend, RecoveryScore};
use recoveryrs::providers::StaticProvider;
use recoveryrs::recovery::RecoveryStatus;

/// RecoveryRS - Recovery Readiness CLI
///
/// Scores daily readiness from resting heart rate, HRV and sleep, and tracks
/// how recent workouts depress that score until you have recovered.
#[derive(Parser)]
#[command(name = "recoveryrs")]
#[command(author = "RecoveryRS Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Recovery Readiness CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON snapshot with activities and biometric samples
    #[arg(short, long, value_name = "FILE", global = true)]
    data: Option<PathBuf>,

    /// Cooldown state database (overrides the config file)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Keep cooldown state in memory only
    #[arg(long, global = true)]
    no_persist: bool,

    /// Evaluate at this RFC 3339 timestamp instead of now
    #[arg(long, value_name = "TIME", global = true)]
    at: Option<DateTime<Utc>>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute today's recovery score
    Score {
        /// Print the score as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show daily training volume and work:rest ratio
    Load,

    /// Show the post-activity cooldown
    Cooldown,

    /// Refresh periodically until interrupted
    Watch {
        /// Seconds between refreshes (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Manage the configuration file
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    title: String,
    #[tabled(rename = "Score")]
    score: u8,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Baseline")]
    baseline: String,
    #[tabled(rename = "Trend")]
    trend: String,
}

#[derive(Tabled)]
struct VolumeRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Activities")]
    activities: u16,
    #[tabled(rename = "Minutes")]
    minutes: String,
    #[tabled(rename = "Avg intensity")]
    intensity: String,
    #[tabled(rename = "Load")]
    load: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(AppConfig::default_config_path);
    let mut config = AppConfig::load_or_default(&config_path)?;

    if cli.verbose > 0 {
        config.logging.level = LogLevel::from_verbosity(cli.verbose);
    }
    init_logging(&config.logging)?;

    if let Commands::Config { init, show } = &cli.command {
        return manage_config(config, &config_path, *init, *show);
    }

    let now = cli.at.unwrap_or_else(Utc::now);
    let engine = Arc::new(open_engine(&cli, config)?);

    match cli.command {
        Commands::Score { json } => {
            let score = refresh(&engine, now)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&score)?);
            } else {
                print_score(&engine, &score);
            }
        }

        Commands::Load => {
            refresh(&engine, now)?;
            print_load(&engine, now);
        }

        Commands::Cooldown => {
            refresh(&engine, now)?;
            let summary = engine.cooldown_summary(now);
            println!("{}", "Cooldown".cyan().bold());
            println!("  Phase:      {}", summary.phase);
            println!("  Adjustment: {}%", summary.adjustment);
            println!("  Recovered:  {:.0}%", summary.percent_recovered);
            println!("  Remaining:  {}", summary.remaining_text);
            println!("  {}", summary.description.dimmed());
        }

        Commands::Watch { interval } => {
            let period = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| engine.config().refresh.interval());
            watch(engine, period)?;
        }

        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn open_engine(cli: &Cli, config: AppConfig) -> Result<RecoveryEngine> {
    let provider = match &cli.data {
        Some(path) => {
            StaticProvider::from_json_file(path).map_err(|e| user_error("load snapshot", e))?
        }
        None => StaticProvider::new(),
    };
    let provider = Arc::new(provider);

    let store: Box<dyn CooldownStore> = if cli.no_persist {
        Box::new(MemoryCooldownStore::new())
    } else {
        let db_path = cli
            .db
            .clone()
            .unwrap_or_else(|| config.storage.database_path.clone());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
        Box::new(
            SqliteCooldownStore::new(&db_path)
                .map_err(|e| user_error("open database", RecoveryRsError::Database(e)))?,
        )
    };

    RecoveryEngine::open(config, provider.clone(), provider, store)
        .map_err(|e| user_error("restore cooldown", e))
}

fn refresh(engine: &RecoveryEngine, now: DateTime<Utc>) -> Result<RecoveryScore> {
    engine.refresh(now).map_err(|e| user_error("refresh", e))
}

/// Log the full error and hand the user the friendly version
fn user_error(context: &str, error: RecoveryRsError) -> anyhow::Error {
    log_error(context, &error);
    anyhow!(error.user_message())
}

fn manage_config(mut config: AppConfig, path: &Path, init: bool, show: bool) -> Result<()> {
    if init {
        config.save_to_file(path)?;
        println!(
            "{}",
            format!("✓ Configuration written to {}", path.display()).green()
        );
    }
    if show || !init {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

fn print_score(engine: &RecoveryEngine, score: &RecoveryScore) {
    let status = RecoveryStatus::from_score(score.overall_score);
    let headline = format!("Recovery score: {}", score.overall_score);
    let headline = match status {
        RecoveryStatus::Primed => headline.green().bold(),
        RecoveryStatus::Ready => headline.blue().bold(),
        RecoveryStatus::Moderate => headline.yellow().bold(),
        RecoveryStatus::Strained => headline.red().bold(),
    };

    println!("{}", headline);
    if score.is_low_confidence() {
        println!("{}", "  Low confidence: no biometric data".yellow());
    } else {
        println!("  {}", status.description());
    }
    if score.cooldown_adjustment < 100 {
        println!(
            "  Biometric {} x cooldown {}%",
            score.biometric_score, score.cooldown_adjustment
        );
    }
    println!("  Training load: {}", score.training_load_score);

    if !score.metric_scores.is_empty() {
        let rows: Vec<MetricRow> = score
            .metric_scores
            .iter()
            .map(|m| MetricRow {
                title: m.title.clone(),
                score: m.score,
                current: format!("{:.1} {}", m.current_value, m.kind.unit()),
                baseline: format!("{:.1}", m.baseline),
                trend: match m.trend {
                    DeltaTrend::Favorable => m.trend.to_string().green().to_string(),
                    DeltaTrend::Stable => m.trend.to_string(),
                    DeltaTrend::Unfavorable => m.trend.to_string().red().to_string(),
                },
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    for recommendation in engine.recommendations(score) {
        println!("  • {}", recommendation);
    }
}

fn print_load(engine: &RecoveryEngine, now: DateTime<Utc>) {
    let volumes = engine.daily_volumes(now);
    let rows: Vec<VolumeRow> = volumes
        .iter()
        .map(|v| VolumeRow {
            date: v.date.to_string(),
            activities: v.activity_count,
            minutes: v.total_duration_minutes.round_dp(0).to_string(),
            intensity: v.average_intensity.round_dp(2).to_string(),
            load: v.training_load.round_dp(1).to_string(),
        })
        .collect();

    println!("{}", "Training volume".cyan().bold());
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("  Work:rest ratio: {}", engine.work_rest_ratio(now));
    if let Some(score) = engine.latest_score() {
        println!("  Training load: {}", score.training_load_score);
    }
}

fn watch(engine: Arc<RecoveryEngine>, period: std::time::Duration) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(run_refresh_loop(Arc::clone(&engine), period, shutdown_rx));

        println!(
            "{}",
            format!("Refreshing every {}s, press Ctrl-C to stop", period.as_secs()).dimmed()
        );
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        // Receiver may already be gone if the loop exited
        let _ = shutdown_tx.send(true);

        let refreshes = handle.await.context("Refresh loop failed")?;
        if let Some(score) = engine.latest_score() {
            println!(
                "{}",
                format!(
                    "✓ {} refreshes, last score {}",
                    refreshes, score.overall_score
                )
                .green()
            );
        }
        Ok(())
    })
}
