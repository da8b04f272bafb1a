//! BLE sensor integration core
//! Finds heart-rate, cycling power and cadence sensors, keeps track of the ones
//! the user paired, reconnects to them and decodes what they send.
//!
//! The entry point is [`BluetoothManager`], driven either directly or through
//! the serialized loop in [`core::event_loop`]. [`state::AppState`] wires both
//! up from a config directory.

pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use crate::config::SensorConfig;
pub use crate::core::bluetooth::{
    BlePlatform, BluetoothManager, ConnectionState, DeviceIdentity, DeviceRecord, PlatformEvent,
    Roster,
};
pub use crate::core::decoder::{Characteristic, CharacteristicReading, DecodeError};
pub use crate::core::event_loop::ControllerHandle;
