use std::sync::mpsc::{SyncSender, TrySendError};

use serde::Serialize;

use privacyd_core::{Category, Resolution, SettingState};

/// One observed read of a mirrored setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessNotification {
    pub application_name: String,
    pub identity: i64,
    pub category: Category,
    pub state: SettingState,
    pub value: Resolution,
}

/// Receives access notifications on the watcher's sink thread.
pub trait NotificationSink: Send + 'static {
    fn notify(&self, notification: &AccessNotification);
}

impl<F> NotificationSink for F
where
    F: Fn(&AccessNotification) + Send + 'static,
{
    fn notify(&self, notification: &AccessNotification) {
        self(notification)
    }
}

/// Queue notifications without blocking. Returns how many were dropped
/// because the queue was full or the sink is gone.
pub fn dispatch(queue: &SyncSender<AccessNotification>, notifications: Vec<AccessNotification>) -> usize {
    let mut dropped = 0;
    for notification in notifications {
        match queue.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                dropped += 1;
                log::debug!("notification for {} dropped (backpressure)", n.application_name);
            }
            Err(TrySendError::Disconnected(n)) => {
                dropped += 1;
                log::debug!("notification for {} dropped (sink stopped)", n.application_name);
            }
        }
    }
    dropped
}
