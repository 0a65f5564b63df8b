//! Interception façade.
//!
//! Call sites that hand sensitive data to applications wrap their real data
//! source in a [`DataGuard`]. The guard consults the settings for the calling
//! application and either falls through to the real source or answers from
//! the resolved setting. A missing record means no customization.

use crate::category::Category;
use crate::resolve::{Payload, Resolution};
use crate::settings::PrivacySettings;

/// Anything that can look up the settings of an application.
pub trait SettingsSource {
    /// Settings for `application_name`, or `None` when there are none or the
    /// store cannot be read.
    fn settings(&self, application_name: &str, identity: i64) -> Option<PrivacySettings>;
}

impl<S: SettingsSource + ?Sized> SettingsSource for std::sync::Arc<S> {
    fn settings(&self, application_name: &str, identity: i64) -> Option<PrivacySettings> {
        (**self).settings(application_name, identity)
    }
}

pub struct DataGuard<'a, S: ?Sized> {
    source: &'a S,
    application_name: &'a str,
    identity: i64,
}

impl<'a, S: SettingsSource + ?Sized> DataGuard<'a, S> {
    pub fn new(source: &'a S, application_name: &'a str, identity: i64) -> Self {
        Self { source, application_name, identity }
    }

    pub fn resolution(&self, category: Category) -> Resolution {
        self.source
            .settings(self.application_name, self.identity)
            .map(|s| s.resolve(category))
            .unwrap_or(Resolution::Real)
    }

    /// String-valued data (device id, phone number, ...).
    pub fn text<F>(&self, category: Category, real: F) -> Option<String>
    where
        F: FnOnce() -> Option<String>,
    {
        match self.resolution(category) {
            Resolution::Real => real(),
            other => other.as_text(),
        }
    }

    /// Location data. Empty means no fix.
    pub fn location<F>(&self, category: Category, real: F) -> Option<(f64, f64)>
    where
        F: FnOnce() -> Option<(f64, f64)>,
    {
        match self.resolution(category) {
            Resolution::Real => real(),
            Resolution::Value { payload: Payload::Location { lat, lon } } => {
                match (lat.trim().parse(), lon.trim().parse()) {
                    (Ok(lat), Ok(lon)) => Some((lat, lon)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Flag-style data: access is granted only while the category is Real.
    pub fn allowed(&self, category: Category) -> bool {
        self.resolution(category).is_real()
    }

    /// Whether a single contact may be shown.
    pub fn contact_visible(&self, contact_id: i64) -> bool {
        match self.resolution(Category::Contacts) {
            Resolution::Real => true,
            Resolution::Allowed { contacts } => contacts.contains(&contact_id),
            _ => false,
        }
    }
}
