use serde::{Deserialize, Serialize};

/// Shape of the payload a category carries when it is in `Custom` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// A single string (device id, phone number, ...).
    Text,
    /// A latitude/longitude pair stored as two strings.
    Location,
    /// No payload; the state alone decides access.
    Flag,
}

/// One sensitive-data domain with its own four-state policy.
///
/// Discriminants are stable: they index the per-record settings table and
/// must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    // Schema v1
    DeviceId,
    Line1Number,
    LocationGps,
    LocationNetwork,
    NetworkInfo,
    SimInfo,
    SimSerialNumber,
    SubscriberId,
    Accounts,
    AccountsAuthTokens,
    OutgoingCalls,
    // Schema v2
    IncomingCalls,
    Contacts,
    Calendar,
    Mms,
    Sms,
    CallLog,
    Bookmarks,
    SystemLogs,
    ExternalStorage,
    Camera,
    RecordAudio,
    // Schema v3
    AndroidId,
    WifiInfo,
    IpTableProtect,
    IccAccess,
    SmsSend,
    PhoneCall,
    SwitchConnectivity,
    SwitchWifiState,
    SendMms,
    ForceOnlineState,
}

impl Category {
    pub const COUNT: usize = 32;

    pub const ALL: [Category; Category::COUNT] = [
        Category::DeviceId,
        Category::Line1Number,
        Category::LocationGps,
        Category::LocationNetwork,
        Category::NetworkInfo,
        Category::SimInfo,
        Category::SimSerialNumber,
        Category::SubscriberId,
        Category::Accounts,
        Category::AccountsAuthTokens,
        Category::OutgoingCalls,
        Category::IncomingCalls,
        Category::Contacts,
        Category::Calendar,
        Category::Mms,
        Category::Sms,
        Category::CallLog,
        Category::Bookmarks,
        Category::SystemLogs,
        Category::ExternalStorage,
        Category::Camera,
        Category::RecordAudio,
        Category::AndroidId,
        Category::WifiInfo,
        Category::IpTableProtect,
        Category::IccAccess,
        Category::SmsSend,
        Category::PhoneCall,
        Category::SwitchConnectivity,
        Category::SwitchWifiState,
        Category::SendMms,
        Category::ForceOnlineState,
    ];

    /// Position in `Category::ALL`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Base column name in the settings table. The state lives in
    /// `<base>Setting`, payloads in `<base>` or `<base>Lat`/`<base>Lon`.
    pub fn column(self) -> &'static str {
        match self {
            Self::DeviceId => "deviceId",
            Self::Line1Number => "line1Number",
            Self::LocationGps => "locationGps",
            Self::LocationNetwork => "locationNetwork",
            Self::NetworkInfo => "networkInfo",
            Self::SimInfo => "simInfo",
            Self::SimSerialNumber => "simSerialNumber",
            Self::SubscriberId => "subscriberId",
            Self::Accounts => "accounts",
            Self::AccountsAuthTokens => "accountsAuthTokens",
            Self::OutgoingCalls => "outgoingCalls",
            Self::IncomingCalls => "incomingCalls",
            Self::Contacts => "contacts",
            Self::Calendar => "calendar",
            Self::Mms => "mms",
            Self::Sms => "sms",
            Self::CallLog => "callLog",
            Self::Bookmarks => "bookmarks",
            Self::SystemLogs => "systemLogs",
            Self::ExternalStorage => "externalStorage",
            Self::Camera => "camera",
            Self::RecordAudio => "recordAudio",
            Self::AndroidId => "androidId",
            Self::WifiInfo => "wifiInfo",
            Self::IpTableProtect => "ipTableProtect",
            Self::IccAccess => "iccAccess",
            Self::SmsSend => "smsSend",
            Self::PhoneCall => "phoneCall",
            Self::SwitchConnectivity => "switchConnectivity",
            Self::SwitchWifiState => "switchWifiState",
            Self::SendMms => "sendMms",
            Self::ForceOnlineState => "forceOnlineState",
        }
    }

    /// Column holding the `SettingState` code.
    pub fn state_column(self) -> String {
        format!("{}Setting", self.column())
    }

    /// Payload columns, in table order. Empty for flag categories.
    pub fn payload_columns(self) -> Vec<String> {
        match self.kind() {
            PayloadKind::Text => vec![self.column().to_string()],
            PayloadKind::Location => {
                vec![format!("{}Lat", self.column()), format!("{}Lon", self.column())]
            }
            PayloadKind::Flag => Vec::new(),
        }
    }

    pub fn kind(self) -> PayloadKind {
        match self {
            Self::DeviceId
            | Self::Line1Number
            | Self::SimSerialNumber
            | Self::SubscriberId
            | Self::AndroidId => PayloadKind::Text,
            Self::LocationGps | Self::LocationNetwork => PayloadKind::Location,
            _ => PayloadKind::Flag,
        }
    }

    /// Schema version that introduced this category's columns.
    pub fn since_version(self) -> u32 {
        match self.index() {
            0..=10 => 1,
            11..=21 => 2,
            _ => 3,
        }
    }

    /// Whether the category is mirrored to plain files for components that
    /// cannot reach the structured store.
    pub fn is_mirrored(self) -> bool {
        matches!(self, Self::DeviceId | Self::SystemLogs | Self::ExternalStorage)
    }

    /// All mirrored categories.
    pub fn mirrored() -> impl Iterator<Item = Category> {
        Self::ALL.into_iter().filter(|c| c.is_mirrored())
    }

    /// File name inside `<mirror_root>/<app>/<identity>/`.
    pub fn mirror_file_name(self) -> String {
        self.state_column()
    }

    /// Reverse of `mirror_file_name`, restricted to mirrored categories.
    pub fn from_mirror_file_name(name: &str) -> Option<Category> {
        Self::mirrored().find(|c| c.mirror_file_name() == name)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_discriminant_order() {
        for (i, c) in Category::ALL.iter().enumerate() {
            assert_eq!(c.index(), i, "{c} out of order");
        }
    }

    #[test]
    fn generations_split_eleven_eleven_ten() {
        let count = |v| Category::ALL.iter().filter(|c| c.since_version() == v).count();
        assert_eq!(count(1), 11);
        assert_eq!(count(2), 11);
        assert_eq!(count(3), 10);
    }

    #[test]
    fn column_names_match_stored_layout() {
        assert_eq!(Category::DeviceId.state_column(), "deviceIdSetting");
        assert_eq!(Category::LocationGps.payload_columns(), vec!["locationGpsLat", "locationGpsLon"]);
        assert!(Category::SystemLogs.payload_columns().is_empty());
    }

    #[test]
    fn mirror_file_names_round_trip() {
        assert_eq!(Category::DeviceId.mirror_file_name(), "deviceIdSetting");
        assert_eq!(Category::from_mirror_file_name("systemLogsSetting"), Some(Category::SystemLogs));
        // Not mirrored
        assert_eq!(Category::from_mirror_file_name("cameraSetting"), None);
        assert_eq!(Category::from_mirror_file_name("bogus"), None);
    }
}
