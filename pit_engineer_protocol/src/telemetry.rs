// Telemetry value types carried over the unreliable channel.
//
// Two cadences of the same car state:
// - `TelemetrySample`: low frequency (a few per second), the dashboard view.
// - `RealtimeSample`: every network tick, driver inputs only.
//
// `TelemetrySample` is the payload most likely to grow, so it is versioned:
// `revision:u8, body_len:u16, body`. A decoder reads the revision-1 fields it
// knows and skips any extra body bytes appended by a newer sender. The
// session/grip/rain enums keep unrecognised codes rather than failing.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::codec::{Wire, WireReader, WireWriter};
use crate::error::CodecError;
use crate::types::Wheels;

/// Telemetry body revision written by this crate.
pub const TELEMETRY_REVISION: u8 = 1;

/// Driver inputs sampled every network tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RealtimeSample {
    pub gas: f32,
    pub brake: f32,
    pub steering_angle: f32,
    pub gear: i32,
    pub speed: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CarDamage {
    pub front: f32,
    pub rear: f32,
    pub left: f32,
    pub right: f32,
    pub centre: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SessionType {
    Practice,
    Qualify,
    Superpole,
    Race,
    Hotlap,
    Hotstint,
    HotlapSuperpole,
    Replay,
    Other(u8),
}

impl From<u8> for SessionType {
    fn from(code: u8) -> Self {
        match code {
            0 => SessionType::Practice,
            1 => SessionType::Qualify,
            2 => SessionType::Superpole,
            3 => SessionType::Race,
            4 => SessionType::Hotlap,
            5 => SessionType::Hotstint,
            6 => SessionType::HotlapSuperpole,
            7 => SessionType::Replay,
            other => SessionType::Other(other),
        }
    }
}

impl From<SessionType> for u8 {
    fn from(session: SessionType) -> Self {
        match session {
            SessionType::Practice => 0,
            SessionType::Qualify => 1,
            SessionType::Superpole => 2,
            SessionType::Race => 3,
            SessionType::Hotlap => 4,
            SessionType::Hotstint => 5,
            SessionType::HotlapSuperpole => 6,
            SessionType::Replay => 7,
            SessionType::Other(code) => code,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TrackGrip {
    Green,
    Fast,
    Optimum,
    Greasy,
    Damp,
    Wet,
    Flooded,
    Other(u8),
}

impl From<u8> for TrackGrip {
    fn from(code: u8) -> Self {
        match code {
            0 => TrackGrip::Green,
            1 => TrackGrip::Fast,
            2 => TrackGrip::Optimum,
            3 => TrackGrip::Greasy,
            4 => TrackGrip::Damp,
            5 => TrackGrip::Wet,
            6 => TrackGrip::Flooded,
            other => TrackGrip::Other(other),
        }
    }
}

impl From<TrackGrip> for u8 {
    fn from(grip: TrackGrip) -> Self {
        match grip {
            TrackGrip::Green => 0,
            TrackGrip::Fast => 1,
            TrackGrip::Optimum => 2,
            TrackGrip::Greasy => 3,
            TrackGrip::Damp => 4,
            TrackGrip::Wet => 5,
            TrackGrip::Flooded => 6,
            TrackGrip::Other(code) => code,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RainIntensity {
    NoRain,
    Drizzle,
    Light,
    Medium,
    Heavy,
    Thunderstorm,
    Other(u8),
}

impl From<u8> for RainIntensity {
    fn from(code: u8) -> Self {
        match code {
            0 => RainIntensity::NoRain,
            1 => RainIntensity::Drizzle,
            2 => RainIntensity::Light,
            3 => RainIntensity::Medium,
            4 => RainIntensity::Heavy,
            5 => RainIntensity::Thunderstorm,
            other => RainIntensity::Other(other),
        }
    }
}

impl From<RainIntensity> for u8 {
    fn from(rain: RainIntensity) -> Self {
        match rain {
            RainIntensity::NoRain => 0,
            RainIntensity::Drizzle => 1,
            RainIntensity::Light => 2,
            RainIntensity::Medium => 3,
            RainIntensity::Heavy => 4,
            RainIntensity::Thunderstorm => 5,
            RainIntensity::Other(code) => code,
        }
    }
}

/// Low-frequency car and session state for the team dashboard.
///
/// Times are in milliseconds; `session_time_left` is in seconds.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TelemetrySample {
    pub driver: String,
    pub lap: i32,
    pub fuel: f32,
    pub fuel_per_lap: f32,
    pub fuel_estimated_laps: f32,
    pub pad_wear: Wheels,
    pub disc_wear: Wheels,
    pub lap_time: i32,
    pub best_time: i32,
    pub previous_time: i32,
    pub in_pit: bool,
    pub in_pit_lane: bool,
    pub session: SessionType,
    pub driver_stint_time_left: i32,
    pub tyre_pressure: Wheels,
    pub tyre_temp: Wheels,
    pub brake_temp: Wheels,
    pub has_wet_tyres: bool,
    pub session_time_left: f32,
    pub grip: TrackGrip,
    pub front_pad: u8,
    pub rear_pad: u8,
    pub damage: CarDamage,
    pub rain: RainIntensity,
    pub suspension_damage: Wheels,
    pub current_sector_index: i32,
    pub last_sector_time: i32,
    pub is_lap_valid: bool,
    pub air_temp: f32,
    pub road_temp: f32,
}

impl Wire for RealtimeSample {
    fn write(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        w.put_f32(self.gas);
        w.put_f32(self.brake);
        w.put_f32(self.steering_angle);
        w.put_i32(self.gear);
        w.put_f32(self.speed);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(RealtimeSample {
            gas: r.get_f32()?,
            brake: r.get_f32()?,
            steering_angle: r.get_f32()?,
            gear: r.get_i32()?,
            speed: r.get_f32()?,
        })
    }
}

impl Wire for CarDamage {
    fn write(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        w.put_f32(self.front);
        w.put_f32(self.rear);
        w.put_f32(self.left);
        w.put_f32(self.right);
        w.put_f32(self.centre);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(CarDamage {
            front: r.get_f32()?,
            rear: r.get_f32()?,
            left: r.get_f32()?,
            right: r.get_f32()?,
            centre: r.get_f32()?,
        })
    }
}

impl TelemetrySample {
    fn write_body(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        w.put_name(&self.driver)?;
        w.put_i32(self.lap);
        w.put_f32(self.fuel);
        w.put_f32(self.fuel_per_lap);
        w.put_f32(self.fuel_estimated_laps);
        self.pad_wear.write(w)?;
        self.disc_wear.write(w)?;
        w.put_i32(self.lap_time);
        w.put_i32(self.best_time);
        w.put_i32(self.previous_time);
        w.put_bool(self.in_pit);
        w.put_bool(self.in_pit_lane);
        w.put_u8(self.session.into());
        w.put_i32(self.driver_stint_time_left);
        self.tyre_pressure.write(w)?;
        self.tyre_temp.write(w)?;
        self.brake_temp.write(w)?;
        w.put_bool(self.has_wet_tyres);
        w.put_f32(self.session_time_left);
        w.put_u8(self.grip.into());
        w.put_u8(self.front_pad);
        w.put_u8(self.rear_pad);
        self.damage.write(w)?;
        w.put_u8(self.rain.into());
        self.suspension_damage.write(w)?;
        w.put_i32(self.current_sector_index);
        w.put_i32(self.last_sector_time);
        w.put_bool(self.is_lap_valid);
        w.put_f32(self.air_temp);
        w.put_f32(self.road_temp);
        Ok(())
    }

    fn read_body(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(TelemetrySample {
            driver: r.get_name("telemetry driver")?,
            lap: r.get_i32()?,
            fuel: r.get_f32()?,
            fuel_per_lap: r.get_f32()?,
            fuel_estimated_laps: r.get_f32()?,
            pad_wear: Wheels::read(r)?,
            disc_wear: Wheels::read(r)?,
            lap_time: r.get_i32()?,
            best_time: r.get_i32()?,
            previous_time: r.get_i32()?,
            in_pit: r.get_bool()?,
            in_pit_lane: r.get_bool()?,
            session: r.get_u8()?.into(),
            driver_stint_time_left: r.get_i32()?,
            tyre_pressure: Wheels::read(r)?,
            tyre_temp: Wheels::read(r)?,
            brake_temp: Wheels::read(r)?,
            has_wet_tyres: r.get_bool()?,
            session_time_left: r.get_f32()?,
            grip: r.get_u8()?.into(),
            front_pad: r.get_u8()?,
            rear_pad: r.get_u8()?,
            damage: CarDamage::read(r)?,
            rain: r.get_u8()?.into(),
            suspension_damage: Wheels::read(r)?,
            current_sector_index: r.get_i32()?,
            last_sector_time: r.get_i32()?,
            is_lap_valid: r.get_bool()?,
            air_temp: r.get_f32()?,
            road_temp: r.get_f32()?,
        })
    }
}

impl Wire for TelemetrySample {
    fn write(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        let mut body = WireWriter::new();
        self.write_body(&mut body)?;
        let body = body.into_bytes();
        let len = u16::try_from(body.len()).map_err(|_| CodecError::BodyTooLarge(body.len()))?;
        w.put_u8(TELEMETRY_REVISION);
        w.put_u16(len);
        w.put_bytes(&body);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let revision = r.get_u8()?;
        if revision == 0 {
            return Err(CodecError::UnsupportedRevision(revision));
        }
        let len = usize::from(r.get_u16()?);
        let body = r.take(len)?;
        let mut body_reader = WireReader::new(body);
        // Newer revisions only append fields, so the known prefix still parses.
        Self::read_body(&mut body_reader)
    }
}
