//! Subcommand bodies.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use privacyd_config::ServiceConfig;
use privacyd_recon::{purge, PackagesList, PurgeError, PurgeReport};
use privacyd_store::{SettingsStore, StoreError, StoreOptions};
use privacyd_watch::{AccessNotification, MirrorWatcher, WatchError};

use crate::exit_codes::{EXIT_ENUMERATE, EXIT_STORE, EXIT_WATCH};

#[derive(Debug)]
pub enum DaemonError {
    Store(StoreError),
    Purge(PurgeError),
    Watch(WatchError),
}

impl DaemonError {
    pub fn code(&self) -> u8 {
        match self {
            Self::Store(_) => EXIT_STORE,
            Self::Purge(PurgeError::Store(_)) => EXIT_STORE,
            Self::Purge(_) => EXIT_ENUMERATE,
            Self::Watch(_) => EXIT_WATCH,
        }
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Purge(e) => write!(f, "purge: {e}"),
            Self::Watch(e) => write!(f, "watcher: {e}"),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<StoreError> for DaemonError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<PurgeError> for DaemonError {
    fn from(e: PurgeError) -> Self {
        Self::Purge(e)
    }
}

impl From<WatchError> for DaemonError {
    fn from(e: WatchError) -> Self {
        Self::Watch(e)
    }
}

pub fn store_options(config: &ServiceConfig) -> StoreOptions {
    let mut options = StoreOptions::new(&config.store.database_path, &config.store.mirror_root);
    options.read_retries = config.store.read_retries;
    options.busy_timeout = Duration::from_millis(config.store.busy_timeout_ms);
    options
}

fn open_store(config: &ServiceConfig) -> Result<SettingsStore, DaemonError> {
    let options = store_options(config);
    log::info!("opening store {}", options.database_path.display());
    Ok(SettingsStore::open(options)?)
}

pub fn migrate(config: &ServiceConfig) -> Result<bool, DaemonError> {
    open_store(config)?;
    log::info!("store is at the current schema version");
    Ok(true)
}

pub fn purge_once(config: &ServiceConfig) -> Result<PurgeReport, DaemonError> {
    let store = open_store(config)?;
    run_purge(&store, config)
}

fn run_purge(store: &SettingsStore, config: &ServiceConfig) -> Result<PurgeReport, DaemonError> {
    let packages = PackagesList::new(&config.purge.packages_list);
    let report = purge(store, &packages)?;
    if report.ok() {
        log::info!("purge: {} action(s), {} installed", report.actions.len(), report.installed);
    } else {
        log::warn!("purge: {} action(s), {} failure(s)", report.actions.len(), report.failures.len());
    }
    Ok(report)
}

/// Log each observed read.
pub fn log_notification(notification: &AccessNotification) {
    log::info!(
        "{} ({}) read {} [{}]",
        notification.application_name,
        notification.identity,
        notification.category,
        notification.state
    );
}

/// Serve until the process is terminated.
pub fn run(config: &ServiceConfig) -> Result<bool, DaemonError> {
    let store = Arc::new(open_store(config)?);

    let _watcher = if config.watcher.enabled {
        Some(MirrorWatcher::start(
            &config.store.mirror_root,
            Arc::clone(&store),
            log_notification,
            config.watcher.queue_depth,
        )?)
    } else {
        log::info!("watcher disabled");
        None
    };

    if !config.purge.enabled {
        log::info!("periodic purge disabled");
        loop {
            thread::park();
        }
    }

    let interval = Duration::from_secs(config.purge.interval_secs);
    loop {
        // A failed pass is retried on the next tick
        if let Err(e) = run_purge(&store, config) {
            log::error!("{e}");
        }
        thread::sleep(interval);
    }
}
