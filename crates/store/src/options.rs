use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_READ_RETRIES: u32 = 3;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Where the store lives and how hard reads try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub database_path: PathBuf,
    pub mirror_root: PathBuf,
    /// Attempts per read before a stale handle is reported.
    pub read_retries: u32,
    /// How long SQLite waits on a locked database.
    pub busy_timeout: Duration,
}

impl StoreOptions {
    pub fn new(database_path: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            mirror_root: mirror_root.into(),
            read_retries: DEFAULT_READ_RETRIES,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// `<database_path>.bak`
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.database_path.clone().into_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }
}
