// Core value types for the relay protocol.
//
// These are shared by `message.rs` (wire messages), the relay's session
// registry, and client applications. `DriverSlot` is chosen by each client
// and is unique within a session; pit-stop driver swaps are expressed as the
// signed difference between two slots.
//
// `PitStrategy` and `CarInfo` are immutable once built. Their wire layouts
// are fixed-width (see the `Wire` impls at the bottom of this file).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::codec::{Wire, WireReader, WireWriter};
use crate::error::CodecError;

/// Driver slot number claimed at connect time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DriverSlot(pub i32);

impl DriverSlot {
    /// Signed offset from this (current) driver to the driver taking over,
    /// as carried in `PitStrategy::driver_offset`.
    pub fn offset_to(self, next: DriverSlot) -> i32 {
        next.0.wrapping_sub(self.0)
    }
}

impl std::fmt::Display for DriverSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One value per wheel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Wheels {
    pub front_left: f32,
    pub front_right: f32,
    pub rear_left: f32,
    pub rear_right: f32,
}

impl Wheels {
    pub fn new(front_left: f32, front_right: f32, rear_left: f32, rear_right: f32) -> Self {
        Self {
            front_left,
            front_right,
            rear_left,
            rear_right,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TyreCompound {
    Dry,
    Wet,
}

impl TyreCompound {
    /// Three ASCII bytes on the wire.
    pub fn to_wire(self) -> [u8; 3] {
        match self {
            TyreCompound::Dry => *b"Dry",
            TyreCompound::Wet => *b"Wet",
        }
    }

    pub fn from_wire(bytes: [u8; 3]) -> Result<Self, CodecError> {
        match &bytes {
            b"Dry" => Ok(TyreCompound::Dry),
            b"Wet" => Ok(TyreCompound::Wet),
            _ => Err(CodecError::UnknownCompound(bytes)),
        }
    }
}

/// Pit-relevant car state, shared by the driving participant
/// (`CarData`) and relayed to the rest of the team (`ServerData`).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CarInfo {
    pub tyre_pressures: Wheels,
    pub fuel_to_add: f32,
    pub max_fuel: f32,
    pub tyre_set: i32,
}

/// Width of the strategy timestamp field.
pub const STRATEGY_TIMESTAMP_LEN: usize = 8;

/// A proposed pit-stop configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PitStrategy {
    /// Human-readable creation time (e.g. `"14:32:07"`), at most 8 bytes and
    /// free of NUL.
    pub timestamp: String,
    pub fuel: f32,
    pub tyre_set: i32,
    pub tyre_compound: TyreCompound,
    pub tyre_pressures: Wheels,
    /// `next_driver.0 - current_driver.0`, see `DriverSlot::offset_to`.
    pub driver_offset: i32,
    pub brake_pad: i32,
    pub repair_bodywork: bool,
    pub repair_suspension: bool,
}

/// One roster line: who is connected and in which slot.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RosterEntry {
    pub name: String,
    pub driver: DriverSlot,
}

impl Wire for Wheels {
    fn write(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        w.put_f32(self.front_left);
        w.put_f32(self.front_right);
        w.put_f32(self.rear_left);
        w.put_f32(self.rear_right);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Wheels {
            front_left: r.get_f32()?,
            front_right: r.get_f32()?,
            rear_left: r.get_f32()?,
            rear_right: r.get_f32()?,
        })
    }
}

impl Wire for CarInfo {
    fn write(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        self.tyre_pressures.write(w)?;
        w.put_f32(self.fuel_to_add);
        w.put_f32(self.max_fuel);
        w.put_i32(self.tyre_set);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(CarInfo {
            tyre_pressures: Wheels::read(r)?,
            fuel_to_add: r.get_f32()?,
            max_fuel: r.get_f32()?,
            tyre_set: r.get_i32()?,
        })
    }
}

impl Wire for PitStrategy {
    fn write(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        let stamp = self.timestamp.as_bytes();
        if stamp.len() > STRATEGY_TIMESTAMP_LEN {
            return Err(CodecError::TimestampTooLong(self.timestamp.clone()));
        }
        if stamp.contains(&0) {
            return Err(CodecError::TimestampContainsNul(self.timestamp.clone()));
        }
        let mut padded = [0u8; STRATEGY_TIMESTAMP_LEN];
        padded[..stamp.len()].copy_from_slice(stamp);
        w.put_bytes(&padded);
        w.put_f32(self.fuel);
        w.put_i32(self.tyre_set);
        w.put_bytes(&self.tyre_compound.to_wire());
        self.tyre_pressures.write(w)?;
        w.put_i32(self.driver_offset);
        w.put_i32(self.brake_pad);
        w.put_bool(self.repair_bodywork);
        w.put_bool(self.repair_suspension);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let padded: [u8; STRATEGY_TIMESTAMP_LEN] = r.get_fixed()?;
        let end = padded.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let timestamp = std::str::from_utf8(&padded[..end])
            .map_err(|_| CodecError::InvalidUtf8 {
                context: "strategy timestamp",
            })?
            .to_owned();
        Ok(PitStrategy {
            timestamp,
            fuel: r.get_f32()?,
            tyre_set: r.get_i32()?,
            tyre_compound: TyreCompound::from_wire(r.get_fixed()?)?,
            tyre_pressures: Wheels::read(r)?,
            driver_offset: r.get_i32()?,
            brake_pad: r.get_i32()?,
            repair_bodywork: r.get_bool()?,
            repair_suspension: r.get_bool()?,
        })
    }
}

impl Wire for RosterEntry {
    fn write(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        w.put_name(&self.name)?;
        w.put_i32(self.driver.0);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(RosterEntry {
            name: r.get_name("roster entry")?,
            driver: DriverSlot(r.get_i32()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_strategy() -> PitStrategy {
        PitStrategy {
            timestamp: "14:32:07".into(),
            fuel: 55.0,
            tyre_set: 3,
            tyre_compound: TyreCompound::Dry,
            tyre_pressures: Wheels::new(27.0, 27.0, 26.8, 26.8),
            driver_offset: 0,
            brake_pad: 1,
            repair_bodywork: true,
            repair_suspension: false,
        }
    }

    #[test]
    fn strategy_payload_is_45_bytes() {
        let mut w = WireWriter::new();
        sample_strategy().write(&mut w).unwrap();
        assert_eq!(w.into_bytes().len(), 8 + 4 + 4 + 3 + 16 + 4 + 4 + 2);
    }

    #[test]
    fn short_timestamp_is_nul_padded_and_trimmed() {
        let strategy = PitStrategy {
            timestamp: "9:05".into(),
            ..sample_strategy()
        };
        let mut w = WireWriter::new();
        strategy.write(&mut w).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..8], b"9:05\0\0\0\0");

        let decoded = PitStrategy::read(&mut WireReader::new(&bytes)).unwrap();
        assert_eq!(decoded.timestamp, "9:05");
    }

    #[test]
    fn long_timestamp_rejected() {
        let strategy = PitStrategy {
            timestamp: "2024-01-01 10:00".into(),
            ..sample_strategy()
        };
        let mut w = WireWriter::new();
        assert!(matches!(
            strategy.write(&mut w),
            Err(CodecError::TimestampTooLong(_))
        ));
    }

    #[test]
    fn nul_in_timestamp_rejected() {
        for stamp in ["10:00\0", "\0", "1\02"] {
            let strategy = PitStrategy {
                timestamp: stamp.into(),
                ..sample_strategy()
            };
            let mut w = WireWriter::new();
            assert_eq!(
                strategy.write(&mut w),
                Err(CodecError::TimestampContainsNul(stamp.into()))
            );
        }
    }

    #[test]
    fn unknown_compound_rejected() {
        let mut w = WireWriter::new();
        sample_strategy().write(&mut w).unwrap();
        let mut bytes = w.into_bytes();
        bytes[16..19].copy_from_slice(b"Int");
        assert_eq!(
            PitStrategy::read(&mut WireReader::new(&bytes)),
            Err(CodecError::UnknownCompound(*b"Int"))
        );
    }

    #[test]
    fn car_info_layout() {
        let info = CarInfo {
            tyre_pressures: Wheels::new(1.0, 2.0, 3.0, 4.0),
            fuel_to_add: 5.0,
            max_fuel: 120.0,
            tyre_set: 7,
        };
        let mut w = WireWriter::new();
        info.write(&mut w).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 6 * 4 + 4);
        assert_eq!(&bytes[24..], &7i32.to_be_bytes());
    }

    #[test]
    fn driver_offset_math() {
        assert_eq!(DriverSlot(1).offset_to(DriverSlot(3)), 2);
        assert_eq!(DriverSlot(3).offset_to(DriverSlot(1)), -2);
        assert_eq!(DriverSlot(2).offset_to(DriverSlot(2)), 0);
    }
}
