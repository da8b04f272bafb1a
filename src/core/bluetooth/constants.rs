//! Constants used throughout the crate
//! Bluetooth SIG assigned numbers for the services and characteristics
//! the sensor core understands, expanded to full 128-bit UUIDs.

use uuid::Uuid;

/// Expands a 16-bit assigned number onto the Bluetooth base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

/// Standard Bluetooth Service UUIDs
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = uuid_from_u16(0x180A);
pub const UUID_HEART_RATE_SERVICE: Uuid = uuid_from_u16(0x180D);
pub const UUID_BATTERY_SERVICE: Uuid = uuid_from_u16(0x180F);
pub const UUID_CYCLING_SPEED_CADENCE_SERVICE: Uuid = uuid_from_u16(0x1816);
pub const UUID_CYCLING_POWER_SERVICE: Uuid = uuid_from_u16(0x1818);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_BATTERY_LEVEL: Uuid = uuid_from_u16(0x2A19);
pub const UUID_MODEL_NUMBER: Uuid = uuid_from_u16(0x2A24);
pub const UUID_FIRMWARE_REVISION: Uuid = uuid_from_u16(0x2A26);
pub const UUID_HARDWARE_REVISION: Uuid = uuid_from_u16(0x2A27);
pub const UUID_SOFTWARE_REVISION: Uuid = uuid_from_u16(0x2A28);
pub const UUID_MANUFACTURER_NAME: Uuid = uuid_from_u16(0x2A29);
pub const UUID_HEART_RATE_MEASUREMENT: Uuid = uuid_from_u16(0x2A37);
pub const UUID_BODY_SENSOR_LOCATION: Uuid = uuid_from_u16(0x2A38);
pub const UUID_CSC_MEASUREMENT: Uuid = uuid_from_u16(0x2A5B);
pub const UUID_SENSOR_LOCATION: Uuid = uuid_from_u16(0x2A5D);
pub const UUID_CYCLING_POWER_MEASUREMENT: Uuid = uuid_from_u16(0x2A63);
pub const UUID_CYCLING_POWER_FEATURE: Uuid = uuid_from_u16(0x2A65);

/// Services scanned for when no configuration overrides it.
pub const DEFAULT_SERVICE_FILTER: [Uuid; 4] = [
    UUID_HEART_RATE_SERVICE,
    UUID_CYCLING_POWER_SERVICE,
    UUID_CYCLING_SPEED_CADENCE_SERVICE,
    UUID_BATTERY_SERVICE,
];

/// Name of the file holding the known-device roster.
pub const KNOWN_DEVICES_FILE_NAME: &str = "known_devices.json";

/// Version tag written into the persisted roster.
pub const KNOWN_ROSTER_VERSION: u32 = 1;

/// Battery level characteristic values above this are clamped.
pub const MAX_BATTERY_PERCENT: u8 = 100;
