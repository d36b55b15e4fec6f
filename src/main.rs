//! # filesweep — recurring file cleanup
//!
//! Usage:
//!   filesweep add --every 1 --unit days --directory /tmp/x --age-days 7 --formats .tmp .log
//!   filesweep list
//!   filesweep remove task_1
//!   filesweep                            # daemon: reload tasks and run until Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use filesweep_core::config::expand_path;
use filesweep_core::{SweepConfig, SweepError};
use filesweep_scheduler::{IntervalUnit, Scheduler, TaskManager, TaskStore, sink_from_config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "filesweep",
    version,
    about = "🧹 filesweep — delete aged files on a schedule"
)]
struct Cli {
    /// Config file (default: ~/.filesweep/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Task file, overrides the config
    #[arg(long, global = true)]
    tasks_file: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Add a recurring file deletion task
    Add {
        /// Run every N units
        #[arg(long)]
        every: u64,
        /// seconds, minutes, hours or days
        #[arg(long)]
        unit: IntervalUnit,
        /// Directory to scan for files
        #[arg(long)]
        directory: PathBuf,
        /// Delete files older than this number of days
        #[arg(long)]
        age_days: u64,
        /// File formats to delete (e.g. .log .tmp)
        #[arg(long, num_args = 1.., required = true)]
        formats: Vec<String>,
    },
    /// List scheduled file deletion tasks
    List,
    /// Remove a scheduled task
    Remove {
        /// Task id, as shown by `list`
        id: String,
    },
    /// Run the scheduler until interrupted (the default)
    Daemon,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "filesweep=debug,filesweep_scheduler=debug,filesweep_core=debug"
    } else {
        "filesweep=info,filesweep_scheduler=info,filesweep_core=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = match &cli.config {
        Some(path) => SweepConfig::load_from(&expand_path(path))?,
        None => SweepConfig::load()?,
    };
    if let Some(tasks_file) = &cli.tasks_file {
        config.tasks_file = tasks_file.clone();
    }

    let scheduler = Arc::new(Scheduler::new(config.scheduler.queue_capacity));
    let manager = Arc::new(TaskManager::new(
        TaskStore::new(config.tasks_path()),
        Arc::clone(&scheduler),
        sink_from_config(&config),
        config.job.clone(),
    ));

    match cli.command.unwrap_or(Command::Daemon) {
        Command::Add {
            every,
            unit,
            directory,
            age_days,
            formats,
        } => match manager.add(every, unit, directory, age_days, &formats).await {
            Ok(id) => println!("✅ File deletion task '{id}' added successfully."),
            Err(SweepError::DuplicateTask { existing }) => {
                println!("⚠️ Task with the same interval and details already exists ('{existing}').");
            }
            Err(e) => return Err(e.into()),
        },
        Command::List => {
            let tasks = manager.list().await;
            if tasks.is_empty() {
                println!("⚠️ No scheduled file deletion tasks found.");
            } else {
                println!("\n📌 Scheduled File Deletion Tasks:");
                for task in tasks {
                    println!(
                        "🔹 {} - Every {} {}",
                        task.id, task.spec.interval_value, task.spec.interval_unit
                    );
                    println!("   Directory: {}", task.spec.directory.display());
                    println!("   Age: {} days", task.spec.age_days);
                    println!("   Formats: {}", task.spec.formats_display());
                    if let Some(created) = task.created_at {
                        println!("   Created: {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
                    }
                }
            }
        }
        Command::Remove { id } => match manager.remove(&id).await {
            Ok(()) => println!("✅ Task '{id}' removed successfully."),
            Err(SweepError::NotFound(_)) => println!("⚠️ Task '{id}' not found."),
            Err(e) => return Err(e.into()),
        },
        Command::Daemon => run_daemon(&manager, &config).await,
    }

    Ok(())
}

async fn run_daemon(manager: &Arc<TaskManager>, config: &SweepConfig) {
    let restored = manager.reload().await;
    let scheduler = manager.scheduler();
    scheduler.start().await;

    println!("🧹 filesweep v{}", env!("CARGO_PKG_VERSION"));
    println!("   📂 Tasks file: {}", config.tasks_path().display());
    println!("   ⏰ Tasks scheduled: {restored}");
    println!("   Press Ctrl+C to stop.");

    let reconciler = (config.scheduler.reconcile_secs > 0).then(|| {
        let manager = Arc::clone(manager);
        let period = Duration::from_secs(config.scheduler.reconcile_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; reload already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.reconcile().await;
            }
        })
    });

    shutdown_signal().await;

    if let Some(reconciler) = reconciler {
        reconciler.abort();
    }
    scheduler.shutdown().await;
    println!("🛑 Scheduler stopped.");
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("⚠️ Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
