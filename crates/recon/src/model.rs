use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// An installed application as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledApp {
    pub name: String,
    pub identity: i64,
}

impl InstalledApp {
    pub fn new(name: impl Into<String>, identity: i64) -> Self {
        Self { name: name.into(), identity }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Which pass an action or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Directories,
    Records,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PurgeAction {
    /// Mirror tree of an uninstalled application.
    RemovedAppDir { application_name: String },
    /// Non-numeric, leftover or superseded identity directory.
    RemovedIdentityDir { application_name: String, entry: String },
    /// Identity directory moved to the application's current identity.
    RenamedIdentityDir { application_name: String, from: i64, to: i64 },
    /// Record of an uninstalled application.
    DeletedRecord { application_name: String, identity: i64 },
    /// Record moved to the application's current identity.
    RelabeledRecord { application_name: String, from: i64, to: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeFailure {
    pub pass: Pass,
    pub target: String,
    pub message: String,
}

/// Everything one purge did. Per-item failures do not stop the run; `ok`
/// is false when any occurred.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub installed: usize,
    pub actions: Vec<PurgeAction>,
    pub failures: Vec<PurgeFailure>,
}

impl PurgeReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, pass: Pass, target: impl Into<String>, error: impl std::fmt::Display) {
        let target = target.into();
        let message = error.to_string();
        log::warn!("purge ({pass:?}) {target}: {message}");
        self.failures.push(PurgeFailure { pass, target, message });
    }

    pub(crate) fn did(&mut self, action: PurgeAction) {
        log::info!("purge: {action:?}");
        self.actions.push(action);
    }
}
