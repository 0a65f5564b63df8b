//! `privacyd-store` - durable settings store.
//!
//! Records live in a SQLite file; the categories that low-level components
//! read directly are mirrored into a plain-file tree. Saves and deletes keep
//! the two in step.

pub mod engine;
pub mod error;
pub mod handle;
pub mod migrate;
pub mod mirror;
pub mod options;
pub mod schema;

pub use engine::{Lookup, SettingsStore};
pub use error::StoreError;
pub use mirror::MirrorWriter;
pub use options::StoreOptions;
pub use schema::{MigrationStep, CURRENT_VERSION};
