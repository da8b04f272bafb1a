//! Bluetooth functionality for the sensor core
//! This module tracks sensors across scans, drives their connection lifecycle
//! and routes characteristic values to the decoder.

pub mod connection;
pub mod constants;
pub mod manager;
pub mod notification;
pub mod platform;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod types;

#[cfg(feature = "bluest")]
pub mod bluest_backend;

// Re-export types that should be publicly accessible
pub use connection::{ConnectionEvent, ConnectionState, Transition};
pub use constants::*; // Re-export all constants
pub use manager::BluetoothManager;
pub use notification::{NotificationHandler, SubscriptionId};
pub use platform::{BlePlatform, PlatformEvent};
pub use registry::{DeviceRegistry, RegistryError};
pub use scanner::{ScanCoordinator, ScanDecision};
pub use store::{FileStore, KnownStore, MemoryStore};
pub use types::{Advertisement, DeviceIdentity, DeviceRecord, InfoField, Roster};

#[cfg(feature = "bluest")]
pub use bluest_backend::BluestPlatform;
