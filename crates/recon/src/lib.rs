//! `privacyd-recon` - reconciliation ("purge") of the settings store.
//!
//! Deletes or relabels records and mirror directories left behind when
//! applications are uninstalled or reinstalled under a new identity.

pub mod engine;
pub mod enumerator;
pub mod error;
pub mod model;

pub use engine::purge;
pub use enumerator::{AppEnumerator, PackagesList};
pub use error::PurgeError;
pub use model::{InstalledApp, PurgeAction, PurgeReport};
