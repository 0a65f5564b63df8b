//! `privacyd-core` - settings records and the value-resolution policy.
//!
//! Pure types crate: no IO. The store, the reconciliation engine and the
//! watcher all build on these.

pub mod category;
pub mod guard;
pub mod resolve;
pub mod settings;

pub use category::{Category, PayloadKind};
pub use guard::{DataGuard, SettingsSource};
pub use resolve::{random_payload, resolve, Payload, Resolution, SettingState};
pub use settings::{CategorySetting, PrivacySettings};
