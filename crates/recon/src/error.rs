use std::fmt;

use privacyd_store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeError {
    /// The installed-application list could not be produced.
    Enumerate(String),
    /// A store operation failed.
    Store(StoreError),
}

impl fmt::Display for PurgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enumerate(msg) => write!(f, "cannot enumerate installed applications: {msg}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PurgeError {}

impl From<StoreError> for PurgeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
