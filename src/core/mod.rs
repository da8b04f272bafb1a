//! Core functionality for the sensor core
//! Bluetooth lifecycle, GATT payload decoding and the serialized controller loop.

pub mod bluetooth;
pub mod decoder;
pub mod event_loop;

// Re-export commonly used types
pub use bluetooth::BluetoothManager;
pub use decoder::{Characteristic, CharacteristicReading, DecodeError};
pub use event_loop::{ControllerClosed, ControllerHandle, ControllerInbox};
