//! Cycling Power Measurement decoding.
//!
//! The payload is a 16-bit flags word, the mandatory instantaneous power and
//! then a run of optional fields. Which optional fields follow is selected by
//! the flag bits, and they always appear in the order of [`CyclingPowerField::WIRE_ORDER`].
//! All multi-byte values are read as unsigned little-endian integers, including
//! the extreme force/torque magnitudes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::DecodeError;
use super::cursor::ByteCursor;

/// Optional fields of a Cycling Power Measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclingPowerField {
    PedalPowerBalance,
    AccumulatedTorque,
    WheelRevolutionData,
    CrankRevolutionData,
    ExtremeForceMagnitudes,
    ExtremeTorqueMagnitudes,
    ExtremeAngles,
    TopDeadSpotAngle,
    BottomDeadSpotAngle,
    AccumulatedEnergy,
}

impl CyclingPowerField {
    /// Order in which present fields appear on the wire. Must not be reordered.
    pub const WIRE_ORDER: [CyclingPowerField; 10] = [
        CyclingPowerField::PedalPowerBalance,
        CyclingPowerField::AccumulatedTorque,
        CyclingPowerField::WheelRevolutionData,
        CyclingPowerField::CrankRevolutionData,
        CyclingPowerField::ExtremeForceMagnitudes,
        CyclingPowerField::ExtremeTorqueMagnitudes,
        CyclingPowerField::ExtremeAngles,
        CyclingPowerField::TopDeadSpotAngle,
        CyclingPowerField::BottomDeadSpotAngle,
        CyclingPowerField::AccumulatedEnergy,
    ];

    /// Bit of the flags word announcing this field.
    pub const fn flag_bit(self) -> u8 {
        match self {
            CyclingPowerField::PedalPowerBalance => 0,
            CyclingPowerField::AccumulatedTorque => 2,
            CyclingPowerField::WheelRevolutionData => 4,
            CyclingPowerField::CrankRevolutionData => 5,
            CyclingPowerField::ExtremeForceMagnitudes => 6,
            CyclingPowerField::ExtremeTorqueMagnitudes => 7,
            CyclingPowerField::ExtremeAngles => 8,
            CyclingPowerField::TopDeadSpotAngle => 9,
            CyclingPowerField::BottomDeadSpotAngle => 10,
            CyclingPowerField::AccumulatedEnergy => 11,
        }
    }

    pub const fn mask(self) -> u16 {
        1 << self.flag_bit()
    }

    /// Encoded size of the field in bytes.
    pub const fn width(self) -> usize {
        match self {
            CyclingPowerField::PedalPowerBalance => 1,
            CyclingPowerField::AccumulatedTorque => 2,
            CyclingPowerField::WheelRevolutionData => 6,
            CyclingPowerField::CrankRevolutionData => 4,
            CyclingPowerField::ExtremeForceMagnitudes => 4,
            CyclingPowerField::ExtremeTorqueMagnitudes => 4,
            CyclingPowerField::ExtremeAngles => 3,
            CyclingPowerField::TopDeadSpotAngle => 2,
            CyclingPowerField::BottomDeadSpotAngle => 2,
            CyclingPowerField::AccumulatedEnergy => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CyclingPowerField::PedalPowerBalance => "pedal_power_balance",
            CyclingPowerField::AccumulatedTorque => "accumulated_torque",
            CyclingPowerField::WheelRevolutionData => "wheel_revolution_data",
            CyclingPowerField::CrankRevolutionData => "crank_revolution_data",
            CyclingPowerField::ExtremeForceMagnitudes => "extreme_force_magnitudes",
            CyclingPowerField::ExtremeTorqueMagnitudes => "extreme_torque_magnitudes",
            CyclingPowerField::ExtremeAngles => "extreme_angles",
            CyclingPowerField::TopDeadSpotAngle => "top_dead_spot_angle",
            CyclingPowerField::BottomDeadSpotAngle => "bottom_dead_spot_angle",
            CyclingPowerField::AccumulatedEnergy => "accumulated_energy",
        }
    }

    /// Reads exactly `width()` bytes and interprets them for this field.
    fn read(self, cursor: &mut ByteCursor<'_>) -> Result<CyclingPowerValue, DecodeError> {
        let mut raw = ByteCursor::new(cursor.take_bytes(self.width())?);
        let value = match self {
            CyclingPowerField::PedalPowerBalance => CyclingPowerValue::PedalPowerBalance(raw.u8()?),
            CyclingPowerField::AccumulatedTorque => CyclingPowerValue::AccumulatedTorque(raw.u16_le()?),
            CyclingPowerField::WheelRevolutionData => CyclingPowerValue::WheelRevolutions(WheelRevolutions {
                cumulative: raw.u32_le()?,
                last_event_time: raw.u16_le()?,
            }),
            CyclingPowerField::CrankRevolutionData => CyclingPowerValue::CrankRevolutions(CrankRevolutions {
                cumulative: raw.u16_le()?,
                last_event_time: raw.u16_le()?,
            }),
            CyclingPowerField::ExtremeForceMagnitudes => CyclingPowerValue::ExtremeForceMagnitudes(Extremes {
                maximum: raw.u16_le()?,
                minimum: raw.u16_le()?,
            }),
            CyclingPowerField::ExtremeTorqueMagnitudes => CyclingPowerValue::ExtremeTorqueMagnitudes(Extremes {
                maximum: raw.u16_le()?,
                minimum: raw.u16_le()?,
            }),
            CyclingPowerField::ExtremeAngles => {
                // Two packed 12-bit angles: maximum in the low bits, minimum in the high bits.
                let packed = raw.u24_le()?;
                CyclingPowerValue::ExtremeAngles(Extremes {
                    maximum: (packed & 0x0FFF) as u16,
                    minimum: (packed >> 12) as u16,
                })
            }
            CyclingPowerField::TopDeadSpotAngle => CyclingPowerValue::TopDeadSpotAngle(raw.u16_le()?),
            CyclingPowerField::BottomDeadSpotAngle => CyclingPowerValue::BottomDeadSpotAngle(raw.u16_le()?),
            CyclingPowerField::AccumulatedEnergy => CyclingPowerValue::AccumulatedEnergy(raw.u16_le()?),
        };
        Ok(value)
    }
}

/// Cumulative wheel revolutions. Event time is 1/2048 s for cycling power
/// and 1/1024 s for speed and cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelRevolutions {
    pub cumulative: u32,
    pub last_event_time: u16,
}

/// Cumulative crank revolutions; event time in 1/1024 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrankRevolutions {
    pub cumulative: u16,
    pub last_event_time: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extremes {
    pub maximum: u16,
    pub minimum: u16,
}

/// Decoded value of one optional field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclingPowerValue {
    /// Percentage in units of 1/2 %.
    PedalPowerBalance(u8),
    /// Newton metres in units of 1/32.
    AccumulatedTorque(u16),
    WheelRevolutions(WheelRevolutions),
    CrankRevolutions(CrankRevolutions),
    /// Newtons.
    ExtremeForceMagnitudes(Extremes),
    /// Newton metres in units of 1/32.
    ExtremeTorqueMagnitudes(Extremes),
    /// Degrees.
    ExtremeAngles(Extremes),
    /// Degrees.
    TopDeadSpotAngle(u16),
    /// Degrees.
    BottomDeadSpotAngle(u16),
    /// Kilojoules.
    AccumulatedEnergy(u16),
}

/// A decoded Cycling Power Measurement.
///
/// Only fields whose flag bit was set are present; an absent field is not the
/// same thing as a zero reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclingPowerMeasurement {
    pub flags: u16,
    pub instantaneous_watts: u16,
    fields: BTreeMap<CyclingPowerField, CyclingPowerValue>,
}

impl CyclingPowerMeasurement {
    pub fn get(&self, field: CyclingPowerField) -> Option<&CyclingPowerValue> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: CyclingPowerField) -> bool {
        self.fields.contains_key(&field)
    }

    /// Present fields in wire order.
    pub fn present_fields(&self) -> impl Iterator<Item = CyclingPowerField> + '_ {
        self.fields.keys().copied()
    }

    pub fn fields(&self) -> &BTreeMap<CyclingPowerField, CyclingPowerValue> {
        &self.fields
    }

    pub fn pedal_power_balance(&self) -> Option<u8> {
        match self.get(CyclingPowerField::PedalPowerBalance)? {
            CyclingPowerValue::PedalPowerBalance(v) => Some(*v),
            _ => None,
        }
    }

    pub fn accumulated_torque(&self) -> Option<u16> {
        match self.get(CyclingPowerField::AccumulatedTorque)? {
            CyclingPowerValue::AccumulatedTorque(v) => Some(*v),
            _ => None,
        }
    }

    pub fn wheel_revolutions(&self) -> Option<WheelRevolutions> {
        match self.get(CyclingPowerField::WheelRevolutionData)? {
            CyclingPowerValue::WheelRevolutions(v) => Some(*v),
            _ => None,
        }
    }

    pub fn crank_revolutions(&self) -> Option<CrankRevolutions> {
        match self.get(CyclingPowerField::CrankRevolutionData)? {
            CyclingPowerValue::CrankRevolutions(v) => Some(*v),
            _ => None,
        }
    }

    pub fn accumulated_energy(&self) -> Option<u16> {
        match self.get(CyclingPowerField::AccumulatedEnergy)? {
            CyclingPowerValue::AccumulatedEnergy(v) => Some(*v),
            _ => None,
        }
    }
}

/// Decodes a Cycling Power Measurement payload.
pub fn decode_cycling_power(bytes: &[u8]) -> Result<CyclingPowerMeasurement, DecodeError> {
    let mut cursor = ByteCursor::new(bytes);
    let flags = cursor.u16_le()?;
    let instantaneous_watts = cursor.u16_le()?;

    let mut fields = BTreeMap::new();
    for field in CyclingPowerField::WIRE_ORDER {
        if flags & field.mask() == 0 {
            continue;
        }
        fields.insert(field, field.read(&mut cursor)?);
    }

    Ok(CyclingPowerMeasurement {
        flags,
        instantaneous_watts,
        fields,
    })
}
