// Configuration loading

pub mod error;
pub mod service;

pub use error::ConfigError;
pub use service::{LogSection, PurgeSection, ServiceConfig, StoreSection, WatcherSection};
