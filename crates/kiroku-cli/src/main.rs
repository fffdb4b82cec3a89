mod logging;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use kiroku_api::TrackingService;
use kiroku_core::config::AppConfig;
use kiroku_core::jobs::{JobFlags, JobPriority, JobQueue, JobStore, SyncJob};
use kiroku_core::scheduler::{Disposition, ExponentialBackoff, JobReport, Scheduler};
use kiroku_core::storage::Storage;
use kiroku_runtime::{trakt_client, Engine, RuntimeError};

#[derive(Parser, Debug)]
#[command(name = "kiroku", version)]
#[command(about = "Mirror Trakt lists into a local library")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync all lists, then backfill show, movie and person details.
    Sync {
        /// Only sync lists and their contents; leave detail jobs queued.
        #[arg(long)]
        lists_only: bool,
    },
    /// Keep syncing on the configured interval until interrupted.
    Daemon,
    /// Show the lists mirrored locally.
    Lists,
    /// Show pending jobs.
    Queue {
        /// Drop every pending job.
        #[arg(long)]
        clear: bool,
    },
    /// Save an access token for authenticated calls.
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the access token and drop jobs that need it.
    Logout,
    /// Print the path of the user config file.
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = logging::init(&config.logging);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: AppConfig) -> Result<(), RuntimeError> {
    match command {
        Command::Sync { lists_only } => sync(&config, lists_only).await,
        Command::Daemon => daemon(&config).await,
        Command::Lists => lists(),
        Command::Queue { clear } => queue(clear),
        Command::Login { token } => login(config, Some(token)),
        Command::Logout => login(config, None),
        Command::ConfigPath => {
            println!("{}", AppConfig::config_path().display());
            Ok(())
        }
    }
}

fn open_queue() -> Result<JobQueue, RuntimeError> {
    AppConfig::ensure_data_dir()?;
    Ok(JobQueue::open(JobStore::open(&AppConfig::jobs_db_path())?)?)
}

async fn sync(config: &AppConfig, lists_only: bool) -> Result<(), RuntimeError> {
    let client = trakt_client(config)?;
    if !client.is_authenticated() {
        warn!("No access token set; list jobs will wait. Run `kiroku login --token <token>`");
    }

    let queue = open_queue()?;
    let storage = Storage::open(&AppConfig::db_path())?;
    let mut scheduler = Scheduler::new(
        storage,
        queue,
        Arc::new(client),
        ExponentialBackoff::from_config(&config.queue),
    );
    scheduler.queue().submit(SyncJob::SyncLists)?;

    let floor = if lists_only {
        JobPriority::UserData
    } else {
        JobPriority::Extras
    };
    let reports = scheduler.run_until_idle_from(floor).await;
    print_reports(&reports);
    println!("{} job(s) still pending", scheduler.queue().len());
    Ok(())
}

fn print_reports(reports: &[JobReport]) {
    let succeeded = reports
        .iter()
        .filter(|r| r.disposition == Disposition::Succeeded)
        .count();
    println!("{succeeded} of {} job(s) succeeded", reports.len());
    for report in reports {
        match &report.disposition {
            Disposition::Succeeded => {}
            Disposition::Retrying {
                attempts,
                not_before,
            } => println!(
                "  {}: retry #{attempts} after {}",
                report.key,
                not_before.format("%H:%M:%S")
            ),
            Disposition::Held => println!("  {}: waiting for a valid access token", report.key),
            Disposition::Failed(reason) => println!("  {}: failed: {reason}", report.key),
        }
    }
}

async fn daemon(config: &AppConfig) -> Result<(), RuntimeError> {
    let engine = Engine::start(config)?;
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(key = %event.key, outcome = ?event.outcome, "Job finished"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped job events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let period = Duration::from_secs(config.sync.interval_minutes.max(1) * 60);
    let mut interval = tokio::time::interval(period);
    let store = engine.store();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match AppConfig::load() {
                    Ok(latest) => {
                        engine.reload_credentials(&latest);
                    }
                    Err(e) => warn!(error = %e, "Failed to reload config"),
                }
                if let Err(e) = engine.sync_now() {
                    error!(error = %e, "Failed to schedule sync");
                }
                match store.lists().await {
                    Ok(lists) => info!(lists = lists.len(), pending = engine.queue().len(), "Sync scheduled"),
                    Err(e) => warn!(error = %e, "Failed to read lists"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    info!("Shutting down");
    engine.shutdown().await;
    Ok(())
}

fn lists() -> Result<(), RuntimeError> {
    AppConfig::ensure_data_dir()?;
    let storage = Storage::open(&AppConfig::db_path())?;
    let lists = storage.lists()?;
    if lists.is_empty() {
        println!("No lists synced yet. Run `kiroku sync`.");
        return Ok(());
    }
    for list in lists {
        let local = storage.list_items(list.id)?.len();
        println!(
            "{:>10}  {:<32} {:>4} item(s){}",
            list.trakt_id,
            list.name,
            local,
            list.updated_at
                .map(|at| format!("  updated {}", at.format("%Y-%m-%d")))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn queue(clear: bool) -> Result<(), RuntimeError> {
    let queue = open_queue()?;
    if clear {
        let dropped = queue.clear()?;
        println!("Dropped {dropped} job(s)");
        return Ok(());
    }

    let stats = queue.stats();
    println!(
        "{} pending, {} backing off, {} waiting for a token",
        stats.pending, stats.backing_off, stats.held
    );
    for job in queue.snapshot() {
        let due = job
            .not_before
            .map(|at| format!("  after {}", at.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_default();
        println!(
            "  [{:<8}] {} (attempts: {}){due}",
            job.priority.to_string(),
            job.key,
            job.attempts
        );
    }
    Ok(())
}

fn login(mut config: AppConfig, token: Option<String>) -> Result<(), RuntimeError> {
    let logging_out = token.is_none();
    config.service.access_token = token;
    config.save()?;

    if logging_out {
        let dropped = open_queue()?.cancel_with_flags(JobFlags::REQUIRES_AUTH)?;
        println!("Logged out; dropped {dropped} job(s) that needed the token");
    } else {
        println!("Token saved to {}", AppConfig::config_path().display());
    }
    Ok(())
}
