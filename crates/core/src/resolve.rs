// Four-state value resolution shared by every consumer of settings.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::category::{Category, PayloadKind};

/// How a category is answered when an application asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingState {
    /// Real value from the unfiltered source.
    #[default]
    Real,
    /// Empty or unavailable, depending on the category.
    Empty,
    /// Operator-supplied payload.
    Custom,
    /// Synthesized on every read.
    Random,
}

impl SettingState {
    /// Stored code; also the digit written to mirror files.
    pub fn code(self) -> u8 {
        match self {
            Self::Real => 0,
            Self::Empty => 1,
            Self::Custom => 2,
            Self::Random => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Real),
            1 => Some(Self::Empty),
            2 => Some(Self::Custom),
            3 => Some(Self::Random),
            _ => None,
        }
    }

    /// Decode a state column. NULL (column added by a migration and never
    /// written) means no customization; an unknown code fails closed.
    pub fn from_stored(code: Option<i64>) -> Self {
        match code {
            None => Self::Real,
            Some(c) => Self::from_code(c).unwrap_or(Self::Empty),
        }
    }
}

impl std::fmt::Display for SettingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Stored value of a category.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    None,
    Text { value: String },
    Location { lat: String, lon: String },
}

impl Payload {
    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text { value: value.into() }
    }

    pub fn location(lat: impl Into<String>, lon: impl Into<String>) -> Self {
        Payload::Location { lat: lat.into(), lon: lon.into() }
    }
}

/// Result of applying a category's state to its stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Defer to the real underlying value.
    Real,
    /// Answer with the category's empty representation.
    Empty,
    /// Answer with this value.
    Value { payload: Payload },
    /// Contacts in `Custom` state: only these contact ids are visible.
    Allowed { contacts: BTreeSet<i64> },
}

impl Resolution {
    pub fn is_real(&self) -> bool {
        matches!(self, Resolution::Real)
    }

    /// Plain-text form: `None` for Real, `""` for Empty.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Resolution::Real => None,
            Resolution::Value { payload: Payload::Text { value } } => Some(value.clone()),
            Resolution::Value { payload: Payload::Location { lat, lon } } => Some(format!("{lat},{lon}")),
            _ => Some(String::new()),
        }
    }
}

/// Resolve one category.
///
/// `allowed_contacts` is only consulted for `Category::Contacts`. Malformed
/// payloads resolve to `Empty`.
pub fn resolve(
    category: Category,
    state: SettingState,
    payload: &Payload,
    allowed_contacts: Option<&BTreeSet<i64>>,
) -> Resolution {
    match state {
        SettingState::Real => Resolution::Real,
        SettingState::Empty => Resolution::Empty,
        SettingState::Custom => resolve_custom(category, payload, allowed_contacts),
        SettingState::Random => match random_payload(category) {
            Some(payload) => Resolution::Value { payload },
            None => Resolution::Empty,
        },
    }
}

fn resolve_custom(
    category: Category,
    payload: &Payload,
    allowed_contacts: Option<&BTreeSet<i64>>,
) -> Resolution {
    match (category.kind(), payload) {
        (PayloadKind::Text, Payload::Text { .. }) => Resolution::Value { payload: payload.clone() },
        (PayloadKind::Location, Payload::Location { lat, lon }) => {
            if valid_coordinate(lat, 90.0) && valid_coordinate(lon, 180.0) {
                Resolution::Value { payload: payload.clone() }
            } else {
                Resolution::Empty
            }
        }
        (PayloadKind::Flag, _) if category == Category::Contacts => match allowed_contacts {
            Some(ids) => Resolution::Allowed { contacts: ids.clone() },
            None => Resolution::Empty,
        },
        _ => Resolution::Empty,
    }
}

fn valid_coordinate(raw: &str, bound: f64) -> bool {
    raw.trim()
        .parse::<f64>()
        .map(|v| v.is_finite() && (-bound..=bound).contains(&v))
        .unwrap_or(false)
}

/// Fresh random value in the category's form, or `None` when the category
/// has no random form.
pub fn random_payload(category: Category) -> Option<Payload> {
    let mut rng = rand::thread_rng();
    let payload = match category {
        Category::DeviceId => Payload::text(random_digits(&mut rng, 15)),
        Category::Line1Number => Payload::text(format!("+{}", random_digits(&mut rng, 12))),
        Category::SimSerialNumber => Payload::text(random_digits(&mut rng, 19)),
        Category::SubscriberId => Payload::text(random_digits(&mut rng, 15)),
        Category::AndroidId => Payload::text(random_hex(&mut rng, 16)),
        Category::LocationGps | Category::LocationNetwork => {
            let (lat, lon) = random_coordinates(&mut rng);
            Payload::location(lat, lon)
        }
        _ => return None,
    };
    Some(payload)
}

/// Uniform latitude in [-90, 90] and longitude in [-180, 180], six decimals.
pub fn random_coordinates<R: Rng + ?Sized>(rng: &mut R) -> (String, String) {
    let lat: f64 = rng.gen_range(-90.0..=90.0);
    let lon: f64 = rng.gen_range(-180.0..=180.0);
    (format!("{lat:.6}"), format!("{lon:.6}"))
}

fn random_digits<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}

fn random_hex<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    (0..len).map(|_| HEX[rng.gen_range(0..16usize)] as char).collect()
}
