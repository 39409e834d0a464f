use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::app::{self, App};
use cli::watch;
use intake_core::config;
use intake_core::models::Tier;
use intake_core::pipeline::{self, WorkerOptions};
use intake_core::{EnqueueHints, StatsSnapshot};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    let app = App::open(cfg).await?;
    let json = cli.json;

    match cli.command {
        Commands::Enqueue { paths, tier, bonus } => run_enqueue(&app, paths, tier, bonus, json).await?,
        Commands::Process { batch } => run_process(&app, batch, json).await?,
        Commands::Stats => print_stats(&app.scheduler.stats().await, json)?,
        Commands::Age => {
            let report = app.scheduler.run_aging_sweep().await;
            emit(&report, json, || {
                format!(
                    "aging: scanned {}, promoted {}, reprioritized {}, anomalies {}",
                    report.scanned,
                    report.promoted.len(),
                    report.reprioritized,
                    report.anomalies.len()
                )
            })?;
        }
        Commands::Unlock {
            file_type,
            extractor,
            confidence,
        } => {
            let ex = app::builtin_extractor(&extractor, app.config.queue.max_content_bytes)
                .with_context(|| format!("unknown extractor {extractor:?} (plaintext, noop)"))?;
            let report = app
                .scheduler
                .register_extractor(&file_type, ex, confidence)
                .await;
            emit(&report, json, || {
                format!(
                    "{}: newly supported {}, requeued {}",
                    report.file_type,
                    report.newly_supported,
                    report.requeued.len()
                )
            })?;
        }
        Commands::Cleanup => {
            let removed = app.scheduler.cleanup().await;
            emit(&serde_json::json!({ "removed": removed }), json, || {
                format!("removed {removed} terminal item(s)")
            })?;
        }
        Commands::Run { until_idle } => run_workers(&app, until_idle, json).await?,
        Commands::Watch { paths } => {
            let roots = roots_or_config(paths, &app.config.scan.include);
            let every = Duration::from_secs(app.config.queue.aging_interval_secs.max(1));
            let enqueued = watch::watch_paths(app.scheduler.clone(), roots, every).await?;
            emit(&serde_json::json!({ "enqueued": enqueued }), json, || {
                format!("watch enqueued {enqueued} file(s)")
            })?;
        }
        Commands::Export { file } => {
            let blob = app.scheduler.export_state().await?;
            std::fs::write(&file, &blob).with_context(|| format!("write {}", file.display()))?;
            emit(&serde_json::json!({ "bytes": blob.len(), "file": file }), json, || {
                format!("exported {} bytes to {}", blob.len(), file.display())
            })?;
        }
        Commands::Import { file } => {
            let blob = std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let report = app.scheduler.import_state(&blob).await?;
            emit(&report, json, || {
                format!(
                    "imported {} item(s), {} completed, {} history entries",
                    report.items, report.completed, report.history_entries
                )
            })?;
        }
    }

    app.persist().await
}

#[derive(Parser)]
#[command(name = "intake")]
#[command(about = "Capability-gated priority queue for file processing", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Output JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover files under the given paths and enqueue them
    Enqueue {
        paths: Vec<PathBuf>,
        /// Place every file in this tier instead of classifying
        #[arg(long)]
        tier: Option<Tier>,
        /// Flat bonus added to each item's priority score
        #[arg(long, default_value_t = 0.0)]
        bonus: f64,
    },
    /// Run processing attempts
    Process {
        /// Number of attempts to run concurrently
        #[arg(long, default_value_t = 1)]
        batch: usize,
    },
    /// Show queue statistics
    Stats,
    /// Run one aging sweep
    Age,
    /// Bind a built-in extractor to a file type and requeue its deferred items
    Unlock {
        file_type: String,
        #[arg(long, default_value = "plaintext")]
        extractor: String,
        #[arg(long, default_value_t = 0.8)]
        confidence: f32,
    },
    /// Drop completed and failed items
    Cleanup,
    /// Run workers and the aging ticker until ctrl-c
    Run {
        /// Stop when nothing is eligible
        #[arg(long, default_value_t = false)]
        until_idle: bool,
    },
    /// Watch paths and enqueue new or changed files while processing
    Watch { paths: Vec<PathBuf> },
    /// Write the queue state to a file
    Export { file: PathBuf },
    /// Replace the queue state from a file
    Import { file: PathBuf },
}

fn emit<T: Serialize>(value: &T, json: bool, human: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

fn roots_or_config(paths: Vec<PathBuf>, include: &[String]) -> Vec<PathBuf> {
    if !paths.is_empty() {
        return paths;
    }
    let roots: Vec<PathBuf> = include.iter().map(PathBuf::from).collect();
    if roots.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        roots
    }
}

async fn run_enqueue(
    app: &App,
    paths: Vec<PathBuf>,
    tier: Option<Tier>,
    bonus: f64,
    json: bool,
) -> Result<()> {
    let roots = roots_or_config(paths, &app.config.scan.include);
    let summary = if tier.is_none() && bonus == 0.0 {
        pipeline::enqueue_paths(&app.scheduler, &roots, &app.config.scan.exclude).await?
    } else {
        let files = intake_core::scanner::discover(&roots, &app.config.scan.exclude).await?;
        let mut summary = pipeline::EnqueueSummary {
            discovered: files.len(),
            ..Default::default()
        };
        for file in files {
            let path = file.path.display().to_string();
            let hints = EnqueueHints {
                force_tier: tier,
                priority_bonus: bonus,
                discovered_at: None,
            };
            match app.scheduler.enqueue(file, hints).await {
                Ok(id) => summary.enqueued.push(id),
                Err(e) => summary.rejected.push(format!("{path}: {e}")),
            }
        }
        summary
    };
    emit(&summary, json, || {
        format!(
            "discovered {}, enqueued {}, rejected {}",
            summary.discovered,
            summary.enqueued.len(),
            summary.rejected.len()
        )
    })
}

async fn run_process(app: &App, batch: usize, json: bool) -> Result<()> {
    let results = app.scheduler.process_batch(batch.max(1)).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("nothing eligible");
    }
    for r in &results {
        println!(
            "{} {} [{}] {} attempts={}{}",
            r.id,
            r.path.display(),
            r.tier,
            r.status,
            r.attempts,
            r.error
                .as_deref()
                .map(|e| format!(" error={e}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn run_workers(app: &App, until_idle: bool, json: bool) -> Result<()> {
    let scheduler = app.scheduler.clone();
    let opts = WorkerOptions {
        until_idle,
        ..WorkerOptions::from_scheduler(&scheduler)
    };
    let token = scheduler.cancellation_token();
    let every = Duration::from_secs(app.config.queue.aging_interval_secs.max(1));
    let ticker = pipeline::spawn_aging_ticker(scheduler.clone(), every, token.child_token());

    let workers = tokio::spawn(pipeline::run_workers(scheduler.clone(), opts));
    let stopper = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                scheduler.shutdown().await;
            }
        })
    };
    let summary = workers.await?;
    stopper.abort();
    token.cancel();
    ticker.await?;
    emit(&summary, json, || {
        format!(
            "attempts {}, completed {}, deferred {}, retried {}, failed {}",
            summary.attempts, summary.completed, summary.deferred, summary.retried, summary.failed
        )
    })
}

fn print_stats(stats: &StatsSnapshot, json: bool) -> Result<()> {
    emit(stats, json, || {
        let tiers = Tier::ALL
            .iter()
            .map(|t| format!("{t}={}", stats.tier(*t)))
            .collect::<Vec<_>>()
            .join(" ");
        let eta = stats
            .eta_minutes
            .map(|m| format!("{m:.1} min"))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "{tiers}\nqueued {} processing {} pending {} retrying {} processed {} failed {}\nrate {:.2}/min eta {eta}",
            stats.total_queued,
            stats.processing,
            stats.pending_capability,
            stats.retrying,
            stats.processed,
            stats.failed,
            stats.rate_per_minute
        )
    })
}
