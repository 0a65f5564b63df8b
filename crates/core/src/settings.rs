use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::resolve::{resolve, Payload, Resolution, SettingState};

/// State and stored payload of one category.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategorySetting {
    pub state: SettingState,
    pub payload: Payload,
}

impl CategorySetting {
    pub fn new(state: SettingState, payload: Payload) -> Self {
        Self { state, payload }
    }
}

/// Privacy settings of one application.
///
/// Every category starts out `Real`. The row id is assigned by the store on
/// first save and never changes afterwards. Records only come from the
/// constructors, which always hold one setting per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivacySettings {
    id: Option<i64>,
    pub application_name: String,
    pub identity: i64,
    categories: Vec<CategorySetting>,
    /// Contact ids visible to the application; meaningful only while
    /// `Category::Contacts` is `Custom`.
    pub allowed_contacts: Option<BTreeSet<i64>>,
}

impl PrivacySettings {
    /// A record that has never been saved.
    pub fn new(application_name: impl Into<String>, identity: i64) -> Self {
        Self {
            id: None,
            application_name: application_name.into(),
            identity,
            categories: vec![CategorySetting::default(); Category::COUNT],
            allowed_contacts: None,
        }
    }

    /// A record loaded from storage under row `id`.
    pub fn persisted(id: i64, application_name: impl Into<String>, identity: i64) -> Self {
        Self { id: Some(id), ..Self::new(application_name, identity) }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Record the row id given by the store. No effect once an id is set.
    pub fn assign_id(&mut self, id: i64) {
        if self.id.is_none() {
            self.id = Some(id);
        }
    }

    pub fn setting(&self, category: Category) -> &CategorySetting {
        &self.categories[category.index()]
    }

    pub fn state(&self, category: Category) -> SettingState {
        self.setting(category).state
    }

    pub fn set(&mut self, category: Category, setting: CategorySetting) {
        self.categories[category.index()] = setting;
    }

    /// Change the state, keeping whatever payload is stored.
    pub fn set_state(&mut self, category: Category, state: SettingState) {
        self.categories[category.index()].state = state;
    }

    /// `Custom` state with a text payload.
    pub fn set_custom_text(&mut self, category: Category, value: impl Into<String>) {
        self.set(category, CategorySetting::new(SettingState::Custom, Payload::text(value)));
    }

    /// `Custom` state with a location payload.
    pub fn set_custom_location(&mut self, category: Category, lat: impl Into<String>, lon: impl Into<String>) {
        self.set(category, CategorySetting::new(SettingState::Custom, Payload::location(lat, lon)));
    }

    /// Restrict contacts to `ids`.
    pub fn allow_contacts(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.set_state(Category::Contacts, SettingState::Custom);
        self.allowed_contacts = Some(ids.into_iter().collect());
    }

    /// Resolve a category. `Random` categories produce a fresh value on
    /// every call.
    pub fn resolve(&self, category: Category) -> Resolution {
        let setting = self.setting(category);
        resolve(category, setting.state, &setting.payload, self.allowed_contacts.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &CategorySetting)> {
        Category::ALL.into_iter().zip(self.categories.iter())
    }
}

impl std::fmt::Display for PrivacySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.application_name, self.identity)?;
        if let Some(id) = self.id {
            write!(f, " #{id}")?;
        }
        let restricted: Vec<String> = self
            .iter()
            .filter(|(_, s)| s.state != SettingState::Real)
            .map(|(c, s)| format!("{c}={}", s.state))
            .collect();
        if !restricted.is_empty() {
            write!(f, " [{}]", restricted.join(", "))?;
        }
        Ok(())
    }
}
