use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record matched.
    NotFound { application_name: String },
    /// Several records matched and the identity could not narrow them to one.
    Ambiguous { application_name: String, rows: usize },
    /// The store file could not be opened.
    StoreUnavailable(String),
    /// Every attempt found its handle closed underneath it.
    StaleHandle { attempts: u32 },
    /// Caller-supplied data was rejected before touching storage.
    ValidationFailed(String),
    /// The mirror could not be written; the structured half was rolled back.
    MirrorWriteFailed { path: PathBuf, message: String },
    /// A schema upgrade failed; the pre-migration copy was restored.
    MigrationFailed { from: u32, to: u32, message: String },
    /// SQLite error outside the cases above.
    Sql(String),
    /// Filesystem error outside the cases above.
    Io(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { application_name } => write!(f, "no settings for '{application_name}'"),
            Self::Ambiguous { application_name, rows } => {
                write!(f, "'{application_name}' matches {rows} records")
            }
            Self::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::StaleHandle { attempts } => {
                write!(f, "store access failed: handle closed during {attempts} attempt(s)")
            }
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::MirrorWriteFailed { path, message } => {
                write!(f, "mirror write failed at {}: {message}", path.display())
            }
            Self::MigrationFailed { from, to, message } => {
                write!(f, "migration v{from} -> v{to} failed (backup restored): {message}")
            }
            Self::Sql(msg) => write!(f, "SQL error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sql(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
