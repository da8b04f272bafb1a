//! GATT characteristic decoding
//! Stateless translation of raw characteristic values into typed readings.
//! Every decoder reads through [`cursor::ByteCursor`], so a short buffer is
//! always reported as [`DecodeError::BufferTooShort`].

pub mod cursor;
pub mod cycling_power;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::constants::*;
use crate::core::bluetooth::types::InfoField;
use cursor::ByteCursor;
pub use cycling_power::{
    CrankRevolutions, CyclingPowerField, CyclingPowerMeasurement, CyclingPowerValue, Extremes,
    WheelRevolutions, decode_cycling_power,
};

/// Errors raised while decoding a characteristic value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Ran out of bytes for a mandatory or announced optional field.
    #[error("buffer too short: needed {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// No decoding rule exists for this characteristic.
    #[error("no decoder for characteristic {0}")]
    UnknownCharacteristic(Uuid),
}

/// Characteristics the decoder has a rule for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Characteristic {
    HeartRateMeasurement,
    BodySensorLocation,
    BatteryLevel,
    ManufacturerName,
    ModelNumber,
    FirmwareRevision,
    HardwareRevision,
    SoftwareRevision,
    CyclingPowerMeasurement,
    CyclingPowerFeature,
    SensorLocation,
    CscMeasurement,
}

impl Characteristic {
    pub const ALL: [Characteristic; 12] = [
        Characteristic::HeartRateMeasurement,
        Characteristic::BodySensorLocation,
        Characteristic::BatteryLevel,
        Characteristic::ManufacturerName,
        Characteristic::ModelNumber,
        Characteristic::FirmwareRevision,
        Characteristic::HardwareRevision,
        Characteristic::SoftwareRevision,
        Characteristic::CyclingPowerMeasurement,
        Characteristic::CyclingPowerFeature,
        Characteristic::SensorLocation,
        Characteristic::CscMeasurement,
    ];

    pub const fn uuid(self) -> Uuid {
        match self {
            Characteristic::HeartRateMeasurement => UUID_HEART_RATE_MEASUREMENT,
            Characteristic::BodySensorLocation => UUID_BODY_SENSOR_LOCATION,
            Characteristic::BatteryLevel => UUID_BATTERY_LEVEL,
            Characteristic::ManufacturerName => UUID_MANUFACTURER_NAME,
            Characteristic::ModelNumber => UUID_MODEL_NUMBER,
            Characteristic::FirmwareRevision => UUID_FIRMWARE_REVISION,
            Characteristic::HardwareRevision => UUID_HARDWARE_REVISION,
            Characteristic::SoftwareRevision => UUID_SOFTWARE_REVISION,
            Characteristic::CyclingPowerMeasurement => UUID_CYCLING_POWER_MEASUREMENT,
            Characteristic::CyclingPowerFeature => UUID_CYCLING_POWER_FEATURE,
            Characteristic::SensorLocation => UUID_SENSOR_LOCATION,
            Characteristic::CscMeasurement => UUID_CSC_MEASUREMENT,
        }
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == *uuid)
    }

    /// Streams values through notifications.
    pub const fn notifies(self) -> bool {
        matches!(
            self,
            Characteristic::HeartRateMeasurement
                | Characteristic::CyclingPowerMeasurement
                | Characteristic::CscMeasurement
                | Characteristic::BatteryLevel
        )
    }

    /// Worth one read right after discovery.
    pub const fn read_once(self) -> bool {
        !matches!(
            self,
            Characteristic::HeartRateMeasurement
                | Characteristic::CyclingPowerMeasurement
                | Characteristic::CscMeasurement
        )
    }

    /// Device information field this characteristic fills in, if any.
    pub const fn info_field(self) -> Option<InfoField> {
        match self {
            Characteristic::ManufacturerName => Some(InfoField::Manufacturer),
            Characteristic::ModelNumber => Some(InfoField::ModelNumber),
            Characteristic::FirmwareRevision => Some(InfoField::FirmwareRevision),
            Characteristic::HardwareRevision => Some(InfoField::HardwareRevision),
            Characteristic::SoftwareRevision => Some(InfoField::SoftwareRevision),
            _ => None,
        }
    }
}

/// Where a heart rate sensor is worn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodySensorLocation {
    Other,
    Chest,
    Wrist,
    Finger,
    Hand,
    EarLobe,
    Foot,
    Reserved,
}

impl From<u8> for BodySensorLocation {
    fn from(value: u8) -> Self {
        match value {
            0 => BodySensorLocation::Other,
            1 => BodySensorLocation::Chest,
            2 => BodySensorLocation::Wrist,
            3 => BodySensorLocation::Finger,
            4 => BodySensorLocation::Hand,
            5 => BodySensorLocation::EarLobe,
            6 => BodySensorLocation::Foot,
            _ => BodySensorLocation::Reserved,
        }
    }
}

/// Mounting position of a cycling power or cadence sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorLocation {
    Other,
    TopOfShoe,
    InShoe,
    Hip,
    FrontWheel,
    LeftCrank,
    RightCrank,
    LeftPedal,
    RightPedal,
    FrontHub,
    RearDropout,
    Chainstay,
    RearWheel,
    RearHub,
    Chest,
    Spider,
    ChainRing,
    Reserved,
}

impl From<u8> for SensorLocation {
    fn from(value: u8) -> Self {
        match value {
            0 => SensorLocation::Other,
            1 => SensorLocation::TopOfShoe,
            2 => SensorLocation::InShoe,
            3 => SensorLocation::Hip,
            4 => SensorLocation::FrontWheel,
            5 => SensorLocation::LeftCrank,
            6 => SensorLocation::RightCrank,
            7 => SensorLocation::LeftPedal,
            8 => SensorLocation::RightPedal,
            9 => SensorLocation::FrontHub,
            10 => SensorLocation::RearDropout,
            11 => SensorLocation::Chainstay,
            12 => SensorLocation::RearWheel,
            13 => SensorLocation::RearHub,
            14 => SensorLocation::Chest,
            15 => SensorLocation::Spider,
            16 => SensorLocation::ChainRing,
            _ => SensorLocation::Reserved,
        }
    }
}

/// A decoded Heart Rate Measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateMeasurement {
    pub beats_per_minute: u16,
    /// `None` when the sensor does not support contact detection.
    pub sensor_contact: Option<bool>,
    /// Kilojoules since the last reset.
    pub energy_expended: Option<u16>,
    /// RR intervals in units of 1/1024 s.
    pub rr_intervals: Vec<u16>,
}

/// Supported-feature bitmask of a cycling power sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclingPowerFeature(pub u32);

impl CyclingPowerFeature {
    pub const PEDAL_POWER_BALANCE: u32 = 1 << 0;
    pub const ACCUMULATED_TORQUE: u32 = 1 << 1;
    pub const WHEEL_REVOLUTION_DATA: u32 = 1 << 2;
    pub const CRANK_REVOLUTION_DATA: u32 = 1 << 3;
    pub const EXTREME_MAGNITUDES: u32 = 1 << 4;
    pub const EXTREME_ANGLES: u32 = 1 << 5;
    pub const DEAD_SPOT_ANGLES: u32 = 1 << 6;
    pub const ACCUMULATED_ENERGY: u32 = 1 << 7;

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn supports(self, feature: u32) -> bool {
        self.0 & feature == feature
    }
}

/// A decoded Cycling Speed and Cadence Measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CscMeasurement {
    pub wheel: Option<WheelRevolutions>,
    pub crank: Option<CrankRevolutions>,
}

/// A typed reading produced from one characteristic value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CharacteristicReading {
    HeartRate(HeartRateMeasurement),
    /// Percent, 0-100.
    BatteryLevel(u8),
    BodySensorLocation(BodySensorLocation),
    InfoString(String),
    CyclingPower(CyclingPowerMeasurement),
    CyclingPowerFeature(CyclingPowerFeature),
    SensorLocation(SensorLocation),
    CscMeasurement(CscMeasurement),
}

/// Decodes a Heart Rate Measurement. Flag bit 0 selects an 8-bit or a
/// 16-bit little-endian rate.
pub fn decode_heart_rate(bytes: &[u8]) -> Result<HeartRateMeasurement, DecodeError> {
    let mut cursor = ByteCursor::new(bytes);
    let flags = cursor.u8()?;
    let beats_per_minute = if flags & 0x01 != 0 {
        cursor.u16_le()?
    } else {
        u16::from(cursor.u8()?)
    };
    let sensor_contact = (flags & 0x04 != 0).then_some(flags & 0x02 != 0);
    let energy_expended = if flags & 0x08 != 0 {
        Some(cursor.u16_le()?)
    } else {
        None
    };
    let mut rr_intervals = Vec::new();
    if flags & 0x10 != 0 {
        while cursor.remaining() >= 2 {
            rr_intervals.push(cursor.u16_le()?);
        }
    }
    Ok(HeartRateMeasurement {
        beats_per_minute,
        sensor_contact,
        energy_expended,
        rr_intervals,
    })
}

/// Decodes a Battery Level value, clamped to 100 %.
pub fn decode_battery_level(bytes: &[u8]) -> Result<u8, DecodeError> {
    let level = ByteCursor::new(bytes).u8()?;
    Ok(level.min(MAX_BATTERY_PERCENT))
}

/// Decodes a Body Sensor Location. Unknown codes map to `Reserved`.
pub fn decode_body_sensor_location(bytes: &[u8]) -> Result<BodySensorLocation, DecodeError> {
    Ok(BodySensorLocation::from(ByteCursor::new(bytes).u8()?))
}

pub fn decode_sensor_location(bytes: &[u8]) -> Result<SensorLocation, DecodeError> {
    Ok(SensorLocation::from(ByteCursor::new(bytes).u8()?))
}

/// Decodes a UTF-8 information string. Invalid UTF-8 yields an empty string.
pub fn decode_info_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_end_matches('\0').to_string(),
        Err(_) => String::new(),
    }
}

pub fn decode_cycling_power_feature(bytes: &[u8]) -> Result<CyclingPowerFeature, DecodeError> {
    Ok(CyclingPowerFeature(ByteCursor::new(bytes).u32_le()?))
}

/// Decodes a Cycling Speed and Cadence Measurement.
pub fn decode_csc_measurement(bytes: &[u8]) -> Result<CscMeasurement, DecodeError> {
    let mut cursor = ByteCursor::new(bytes);
    let flags = cursor.u8()?;
    let wheel = if flags & 0x01 != 0 {
        Some(WheelRevolutions {
            cumulative: cursor.u32_le()?,
            last_event_time: cursor.u16_le()?,
        })
    } else {
        None
    };
    let crank = if flags & 0x02 != 0 {
        Some(CrankRevolutions {
            cumulative: cursor.u16_le()?,
            last_event_time: cursor.u16_le()?,
        })
    } else {
        None
    };
    Ok(CscMeasurement { wheel, crank })
}

/// Decodes a value of a known characteristic.
pub fn decode(
    characteristic: Characteristic,
    bytes: &[u8],
) -> Result<CharacteristicReading, DecodeError> {
    let reading = match characteristic {
        Characteristic::HeartRateMeasurement => {
            CharacteristicReading::HeartRate(decode_heart_rate(bytes)?)
        }
        Characteristic::BodySensorLocation => {
            CharacteristicReading::BodySensorLocation(decode_body_sensor_location(bytes)?)
        }
        Characteristic::BatteryLevel => {
            CharacteristicReading::BatteryLevel(decode_battery_level(bytes)?)
        }
        Characteristic::ManufacturerName
        | Characteristic::ModelNumber
        | Characteristic::FirmwareRevision
        | Characteristic::HardwareRevision
        | Characteristic::SoftwareRevision => {
            CharacteristicReading::InfoString(decode_info_string(bytes))
        }
        Characteristic::CyclingPowerMeasurement => {
            CharacteristicReading::CyclingPower(decode_cycling_power(bytes)?)
        }
        Characteristic::CyclingPowerFeature => {
            CharacteristicReading::CyclingPowerFeature(decode_cycling_power_feature(bytes)?)
        }
        Characteristic::SensorLocation => {
            CharacteristicReading::SensorLocation(decode_sensor_location(bytes)?)
        }
        Characteristic::CscMeasurement => {
            CharacteristicReading::CscMeasurement(decode_csc_measurement(bytes)?)
        }
    };
    Ok(reading)
}

/// Decodes a value identified only by its characteristic UUID.
pub fn decode_uuid(uuid: &Uuid, bytes: &[u8]) -> Result<CharacteristicReading, DecodeError> {
    let characteristic =
        Characteristic::from_uuid(uuid).ok_or(DecodeError::UnknownCharacteristic(*uuid))?;
    decode(characteristic, bytes)
}
