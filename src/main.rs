//! proctrack - Background tracker for named processes
//!
//! Periodically checks whether registered process names are running for the
//! current user and records a running / not running / dormant status in SQLite.

mod cli;
mod core;
mod persistence;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use single_instance::SingleInstance;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, CommandArgs, RunArgs};
use crate::core::{
    resolve_username, ProcessRegistry, Reconciler, Scheduler, Settings, StatusRecord, StatusStore,
    SystemProbe, TrackerConfig,
};
use crate::persistence::Database;

/// Application name constant
pub const APP_NAME: &str = "proctrack";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommandArgs::parse_checked();

    // Initialize logging
    init_logging(args.verbose);

    let db_path = match args.database.clone() {
        Some(path) => path,
        None => Settings::default_database_path()?,
    };

    // Initialize database
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {:?}", db_path))?;
    db.initialize().context("Failed to initialize database schema")?;
    let db = Arc::new(db);

    match args.into_command() {
        Command::Add { names } => add_processes(&db, &names),
        Command::List { json } => list_statuses(&db, json),
        Command::Processes => list_processes(&db),
        Command::Run(run) => run_tracker(db, &db_path, run).await,
    }
}

/// Initialize the logging system
fn init_logging(verbose: bool) {
    let default = if verbose {
        "proctrack=debug"
    } else {
        "proctrack=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn add_processes(db: &Arc<Database>, names: &[String]) -> Result<()> {
    let registry = ProcessRegistry::new(Arc::clone(db));
    for name in names {
        let added = registry
            .register(name)
            .with_context(|| format!("Failed to add process '{}'", name))?;
        if added {
            println!("Added process '{}' to tracking table", name.trim());
        } else {
            println!("Process '{}' is already tracked", name.trim());
        }
    }
    Ok(())
}

fn list_processes(db: &Arc<Database>) -> Result<()> {
    let registry = ProcessRegistry::new(Arc::clone(db));
    for name in registry.list()? {
        println!("{}", name);
    }
    Ok(())
}

fn list_statuses(db: &Database, json: bool) -> Result<()> {
    let records = db.list_statuses().context("Failed to load statuses")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No statuses recorded yet");
        return Ok(());
    }

    println!(
        "{:<16} {:<24} {:<12} {:<28} {}",
        "USER", "PROCESS", "STATUS", "LAST CHECKED", "LAST ACTIVE"
    );
    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(())
}

fn format_record(record: &StatusRecord) -> String {
    let last_active = record
        .last_active
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<16} {:<24} {:<12} {:<28} {}",
        record.username,
        record.process_name,
        record.status.label(),
        record.last_checked.to_rfc3339(),
        last_active
    )
}

async fn run_tracker(db: Arc<Database>, db_path: &Path, args: RunArgs) -> Result<()> {
    // Defaults < persisted settings < command line
    let mut settings = db.load_settings()?.unwrap_or_default();
    args.apply_to(&mut settings);
    settings.validate()?;
    if args.save {
        db.save_settings(&settings)?;
        info!("Settings saved");
    }

    let username = resolve_username(args.user.clone())?;
    let config = TrackerConfig::from_settings(username, &settings)?;

    // Two trackers on one database would both write every key each cycle
    let lock_name = instance_lock_name(db_path);
    let instance = SingleInstance::new(&lock_name)
        .map_err(|e| anyhow::anyhow!("Failed to create single instance lock: {}", e))?;
    if !instance.is_single() {
        anyhow::bail!("Another {} is already tracking {:?}", APP_NAME, db_path);
    }

    let registry = ProcessRegistry::new(Arc::clone(&db));
    if registry.list()?.is_empty() {
        warn!("No processes are tracked yet; add some with `{} add <NAME>`", APP_NAME);
    }

    let reconciler = Reconciler::new(
        registry,
        db,
        Arc::new(SystemProbe::new()),
        config.dormant_timeout,
    );
    let scheduler = Scheduler::new(Arc::new(reconciler), config.clone());

    info!(
        "{} v{} started for {}. Checking every {} seconds.",
        APP_NAME,
        APP_VERSION,
        config.username,
        config.check_interval.as_secs()
    );

    if args.once {
        let outcomes = scheduler.run_cycles(1).await;
        if let Some(Err(e)) = outcomes.into_iter().next() {
            return Err(e).context("Reconciliation cycle failed");
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => warn!("Signal handling unavailable: {}", e),
        }
    });

    scheduler.run(cancel).await;
    info!("{} shutting down", APP_NAME);
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Longest path tail kept in a lock name; Linux abstract socket names are short
const LOCK_PATH_CHARS: usize = 80;

/// Lock name unique to one database file, identical across builds
fn instance_lock_name(db_path: &Path) -> String {
    let canonical = std::fs::canonicalize(db_path).unwrap_or_else(|_| PathBuf::from(db_path));
    let sanitized: Vec<char> = canonical
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let tail: String = sanitized[sanitized.len().saturating_sub(LOCK_PATH_CHARS)..]
        .iter()
        .collect();
    format!("{}-{}", APP_NAME, tail)
}
