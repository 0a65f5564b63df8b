use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// The platform watcher refused to start or to watch a path.
    Notify { path: String, message: String },
    /// The mirror root could not be created or listed.
    Io { path: String, message: String },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notify { path, message } => write!(f, "cannot watch {path}: {message}"),
            Self::Io { path, message } => write!(f, "{path}: {message}"),
        }
    }
}

impl std::error::Error for WatchError {}
