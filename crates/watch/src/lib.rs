//! Watches the mirror tree and reports reads of mirrored settings.

pub mod error;
#[cfg(target_os = "linux")]
pub mod inotify_target;
pub mod notification;
pub mod router;
pub mod watcher;

pub use error::WatchError;
#[cfg(target_os = "linux")]
pub use inotify_target::InotifyTarget;
pub use notification::{dispatch, AccessNotification, NotificationSink};
pub use router::{EventRouter, WatchTarget, DEBOUNCE};
pub use watcher::MirrorWatcher;
