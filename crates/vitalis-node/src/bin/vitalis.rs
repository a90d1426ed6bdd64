//! Vitalis operator CLI
//!
//! Runs single engine operations against a data directory.
//!
//! ```bash
//! vitalis --data-dir ./vitalis-data sync --days 14
//! vitalis snapshot --history 7
//! vitalis complete drink_2l "Drink 2L" --target 2 --points 10 --tag hydration
//! vitalis streaks
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use vitalis_core::{HealthSnapshot, MAX_WINDOW_DAYS, QuestCompletion};
use vitalis_logging::VitalisSubscriberBuilder;
use vitalis_node::{EngineConfig, WellnessEngine};

/// Vitalis local wellness engine
#[derive(Parser)]
#[command(name = "vitalis")]
#[command(about = "Inspect and drive the Vitalis local wellness engine")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Human-readable debug logging instead of the configured output
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill and refresh recent days
    Sync {
        /// Window size in days; the configured window when omitted
        #[arg(
            short,
            long,
            value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_WINDOW_DAYS))
        )]
        days: Option<u32>,
    },
    /// Show the latest snapshot or recent history
    Snapshot {
        /// Show this many recent days instead
        #[arg(long)]
        history: Option<usize>,
    },
    /// Show the current energy estimate
    Energy {
        /// Also predict when energy falls to this level
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Complete a quest for today
    Complete {
        quest_id: String,
        title: String,
        #[arg(long, default_value_t = 1.0)]
        target: f64,
        #[arg(long, default_value_t = 10)]
        points: u32,
        #[arg(long)]
        tag: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// List quest streaks
    Streaks,
    /// List points per reward tag
    Points,
    /// Show the completion history, newest first
    Log {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = dir;
    }

    let _guard = if cli.dev {
        vitalis_logging::init_development()
    } else {
        VitalisSubscriberBuilder::new()
            .with_config(config.logging.clone())
            .with_level(cli.log_level.clone())
            .init()
    };

    let engine = WellnessEngine::new(config).context("creating engine")?;
    run(&engine, cli.command).await
}

async fn run(engine: &WellnessEngine, command: Commands) -> anyhow::Result<()> {
    let report = engine.open_report().await?;
    if report.key_origin.is_data_loss() || report.lost_data() {
        eprintln!("warning: the store key was regenerated; earlier data is no longer readable");
        if let Some(path) = &report.quarantined_file {
            eprintln!("warning: previous database moved to {}", path.display());
        }
    }

    match command {
        Commands::Sync { days } => {
            let days = days.unwrap_or(engine.config().sync.window_days);
            let report = engine.sync_needed(days).await?;
            println!(
                "synced {} day(s), {} finalized, {} degraded metric(s)",
                report.days_synced.len(),
                report.finalized.len(),
                report.failed_metrics.len()
            );
            for (day, metric) in &report.failed_metrics {
                println!("  {day}: {metric} unavailable");
            }
        }
        Commands::Snapshot { history } => match history {
            Some(limit) => {
                for snapshot in engine.history(limit).await? {
                    print_snapshot(&snapshot);
                }
            }
            None => match engine.latest_snapshot().await? {
                Some(snapshot) => print_snapshot(&snapshot),
                None => println!("no snapshots yet; run `vitalis sync`"),
            },
        },
        Commands::Energy { threshold } => {
            engine.sync_latest().await?;
            match engine.refresh_energy().await? {
                Some(pct) => println!("energy: {pct:.1}%"),
                None => println!("energy: unknown (no sleep recorded for today)"),
            }
            println!("last night: {} min asleep", engine.last_night_sleep_minutes().await?);
            if let Some(threshold) = threshold {
                match engine.predict_energy_crossing(threshold).await? {
                    Some(at) => println!("reaches {threshold:.0}% at {at}"),
                    None => println!("will not reach {threshold:.0}%"),
                }
            }
        }
        Commands::Complete {
            quest_id,
            title,
            target,
            points,
            tag,
            note,
        } => {
            let mut request = QuestCompletion::new(quest_id, title, target, points, tag);
            if let Some(note) = note {
                request = request.with_note(note);
            }
            let outcome = engine.complete_quest(&request).await?;
            println!(
                "+{} {} (total {}), streak {}",
                outcome.total_reward, request.reward_tag, outcome.tag_points, outcome.streak.count
            );
            for badge in &outcome.badges_awarded {
                println!("badge unlocked: {badge}");
            }
        }
        Commands::Streaks => {
            let today = engine.today();
            for streak in engine.streaks().await? {
                let last = streak
                    .last_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:>4} (last {}, current {})",
                    streak.quest_id,
                    streak.count,
                    last,
                    streak.current_as_of(today)
                );
            }
        }
        Commands::Points => {
            for (tag, points) in engine.points().await? {
                println!("{tag:<24} {points:>8}");
            }
        }
        Commands::Log { limit } => {
            for entry in engine.history_log(limit).await? {
                let note = entry.note.as_deref().unwrap_or("");
                println!(
                    "{} {:<24} +{:<4} {:<12} streak {:<3} {}",
                    entry.completed_at.format("%Y-%m-%d %H:%M"),
                    entry.title,
                    entry.reward_points,
                    entry.reward_tag,
                    entry.streak_count,
                    note
                );
            }
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &HealthSnapshot) {
    let fmt_opt = |value: Option<f64>| {
        value
            .map(|v| format!("{v:.1}"))
            .unwrap_or_else(|| "-".to_string())
    };
    println!(
        "{} steps {:>6} sleep {:>4}m hrv {:>6} rhr {:>6} kcal {:>7} {}",
        snapshot.date,
        snapshot.steps,
        snapshot.sleep_minutes,
        fmt_opt(snapshot.metrics.hrv_ms),
        fmt_opt(snapshot.metrics.resting_heart_rate_bpm),
        fmt_opt(snapshot.metrics.active_energy_kcal),
        if snapshot.finalized { "final" } else { "partial" }
    );
}
