//! Defines shared data structures for the Bluetooth module.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::connection::ConnectionState;

/// Platform-stable identifier of a physical peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(Uuid);

impl DeviceIdentity {
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Maps a platform device id onto an identity. Ids that already are UUIDs
    /// are used as is; anything else (addresses, object paths) gets a stable
    /// name-based UUID.
    pub fn from_platform_id(id: &str) -> Self {
        match Uuid::parse_str(id) {
            Ok(uuid) => Self(uuid),
            Err(_) => Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes())),
        }
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DeviceIdentity {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Device Information fields kept on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoField {
    Manufacturer,
    ModelNumber,
    FirmwareRevision,
    HardwareRevision,
    SoftwareRevision,
}

impl InfoField {
    /// Key under which the field is stored in `DeviceRecord::info`.
    pub const fn key(self) -> &'static str {
        match self {
            InfoField::Manufacturer => "manufacturer",
            InfoField::ModelNumber => "model_number",
            InfoField::FirmwareRevision => "firmware_revision",
            InfoField::HardwareRevision => "hardware_revision",
            InfoField::SoftwareRevision => "software_revision",
        }
    }
}

/// The three device rosters tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Roster {
    /// Paired previously, persisted.
    Known,
    /// Seen during the current discovery session.
    Discovered,
    /// Known devices eligible for opportunistic reconnect.
    Connectable,
}

/// A peripheral as tracked by the sensor core.
///
/// Equality is by identity only; everything else is a mutable attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub identity: DeviceIdentity,
    pub name: String,
    #[serde(default)]
    pub services: BTreeSet<Uuid>,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
    /// Never persisted; a loaded record always starts out disconnected.
    #[serde(skip)]
    pub state: ConnectionState,
    #[serde(default)]
    pub battery_level: Option<u8>,
}

impl DeviceRecord {
    pub fn new(identity: DeviceIdentity, name: impl Into<String>) -> Self {
        Self {
            identity,
            name: name.into(),
            services: BTreeSet::new(),
            info: BTreeMap::new(),
            state: ConnectionState::Disconnected,
            battery_level: None,
        }
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.services.extend(services);
        self
    }

    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    pub fn info_value(&self, field: InfoField) -> Option<&str> {
        self.info.get(field.key()).map(String::as_str)
    }

    pub fn offers(&self, service: &Uuid) -> bool {
        self.services.contains(service)
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for DeviceRecord {}

/// A peripheral observed by the platform during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub identity: DeviceIdentity,
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Advertised service UUIDs
    pub services: Vec<Uuid>,
    /// The signal strength (RSSI) of the advertisement
    pub rssi: Option<i16>,
}

impl Advertisement {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            name: None,
            services: Vec::new(),
            rssi: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.services.extend(services);
        self
    }

    /// Record for a device first seen through this advertisement.
    pub fn to_record(&self) -> DeviceRecord {
        DeviceRecord::new(
            self.identity,
            self.name.clone().unwrap_or_else(|| "Unknown".to_string()),
        )
        .with_services(self.services.iter().copied())
    }
}
