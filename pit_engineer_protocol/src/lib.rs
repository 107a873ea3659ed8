// pit_engineer_protocol: wire protocol for the pit engineer session relay.
//
// This crate defines the message types and the binary codec used by the
// relay server (`pit_engineer_relay::server`) and team clients
// (`pit_engineer_relay::client`). It is shared by both sides and does no I/O
// beyond the `Read`/`Write` framing helpers.
//
// Module overview:
// - `types.rs`:     Value types: `DriverSlot`, `Wheels`, `CarInfo`,
//                   `PitStrategy`, `RosterEntry`.
// - `telemetry.rs`: `TelemetrySample` (versioned, extensible body) and
//                   `RealtimeSample`, plus the session/grip/rain enums.
// - `message.rs`:   `PacketType` opcodes and the `Message` enum with
//                   `encode` / `decode` / `try_decode`.
// - `codec.rs`:     Big-endian field reader/writer and the internal `Wire`
//                   trait every payload type implements.
// - `framing.rs`:   2-byte big-endian length-prefixed framing for the
//                   reliable stream.
// - `error.rs`:     `CodecError`.
//
// Design decisions:
// - **Fixed binary layout.** Every field has a fixed width in network byte
//   order; names carry a one-byte length, so they are capped at 255 bytes.
// - **Decode is total.** `Message::decode` maps unknown opcodes and malformed
//   payloads to `Message::Unknown` so a bad packet is dropped, not fatal.
// - **Optional serde.** The `serde` feature derives `Serialize`/`Deserialize`
//   on the value types for consumers that store or display them as JSON.

mod codec;
pub mod error;
pub mod framing;
pub mod message;
pub mod telemetry;
pub mod types;

pub use error::CodecError;
pub use framing::{MAX_FRAME_SIZE, read_frame, read_message, write_frame, write_message};
pub use message::{Message, PacketType};
pub use telemetry::{
    CarDamage, RainIntensity, RealtimeSample, SessionType, TELEMETRY_REVISION, TelemetrySample,
    TrackGrip,
};
pub use types::{
    CarInfo, DriverSlot, PitStrategy, RosterEntry, STRATEGY_TIMESTAMP_LEN, TyreCompound, Wheels,
};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Encode a message, frame it, read it back through the stream framing.
    fn framed_roundtrip(msg: &Message) {
        let mut wire = Vec::new();
        write_message(&mut wire, msg).unwrap();

        let mut cursor = Cursor::new(&wire);
        let recovered = read_message(&mut cursor).unwrap();
        assert_eq!(&recovered, msg);
        assert_eq!(cursor.position() as usize, wire.len());
    }

    fn dry_strategy() -> PitStrategy {
        PitStrategy {
            timestamp: "21:04:55".into(),
            fuel: 55.0,
            tyre_set: 3,
            tyre_compound: TyreCompound::Dry,
            tyre_pressures: Wheels::new(27.0, 27.0, 26.8, 26.8),
            driver_offset: 0,
            brake_pad: 1,
            repair_bodywork: true,
            repair_suspension: true,
        }
    }

    #[test]
    fn framed_connect() {
        framed_roundtrip(&Message::Connect {
            name: "Alice".into(),
            driver: DriverSlot(1),
        });
    }

    #[test]
    fn framed_connect_reply() {
        framed_roundtrip(&Message::ConnectReply {
            success: false,
            message: "This username is already connected.".into(),
        });
    }

    #[test]
    fn framed_strategy() {
        framed_roundtrip(&Message::Strategy(dry_strategy()));
    }

    #[test]
    fn framed_history_of_255_strategies() {
        let history = vec![dry_strategy(); 255];
        framed_roundtrip(&Message::StrategyHistorySnapshot(history));
    }

    #[test]
    fn framed_car_data() {
        framed_roundtrip(&Message::CarData(CarInfo {
            tyre_pressures: Wheels::new(27.3, 27.3, 26.9, 26.9),
            fuel_to_add: 42.0,
            max_fuel: 120.0,
            tyre_set: 4,
        }));
    }

    #[test]
    fn framed_roster() {
        framed_roundtrip(&Message::RosterSnapshot(vec![RosterEntry {
            name: "Zoë".into(),
            driver: DriverSlot(-3),
        }]));
    }

    #[test]
    fn framed_reregister_request() {
        framed_roundtrip(&Message::UnreliableReRegisterRequest);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn strategy_serializes_to_json() {
        let json = serde_json::to_string(&dry_strategy()).unwrap();
        let back: PitStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dry_strategy());
    }
}
