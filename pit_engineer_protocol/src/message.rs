// Protocol messages for client-relay communication.
//
// A message is one opcode byte (`PacketType`) followed by its payload. The
// same `Message` enum is used in both directions and on both transports; the
// client decides which transport carries which variant (see
// `Message::is_unreliable`).
//
// `Message::decode` never fails. An unknown opcode or a payload that does not
// parse yields `Message::Unknown`, which the caller logs and skips so a
// malformed or future packet cannot take down a session. `try_decode` keeps
// the precise `CodecError` for that log line.

use crate::codec::{Wire, WireReader, WireWriter};
use crate::error::CodecError;
use crate::telemetry::{RealtimeSample, TelemetrySample};
use crate::types::{CarInfo, DriverSlot, PitStrategy, RosterEntry};

/// One-byte opcode at the start of every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    CarData = 2,
    ServerData = 3,
    Disconnect = 4,
    ConnectReply = 5,
    Strategy = 6,
    StrategyAck = 7,
    Telemetry = 8,
    RosterSnapshot = 9,
    RegisterUnreliableEndpoint = 10,
    RealtimeTelemetry = 11,
    UnreliableHeartbeat = 12,
    UnreliableReRegisterRequest = 13,
    StrategyHistorySnapshot = 14,
}

impl PacketType {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => PacketType::Connect,
            2 => PacketType::CarData,
            3 => PacketType::ServerData,
            4 => PacketType::Disconnect,
            5 => PacketType::ConnectReply,
            6 => PacketType::Strategy,
            7 => PacketType::StrategyAck,
            8 => PacketType::Telemetry,
            9 => PacketType::RosterSnapshot,
            10 => PacketType::RegisterUnreliableEndpoint,
            11 => PacketType::RealtimeTelemetry,
            12 => PacketType::UnreliableHeartbeat,
            13 => PacketType::UnreliableReRegisterRequest,
            14 => PacketType::StrategyHistorySnapshot,
            _ => return None,
        })
    }
}

/// Every message exchanged between clients and the relay.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Handshake: claim a display name and driver slot.
    Connect { name: String, driver: DriverSlot },
    /// Handshake answer; `message` is user-visible.
    ConnectReply { success: bool, message: String },
    /// Car data from the driving participant.
    CarData(CarInfo),
    /// `CarData` as relayed to the rest of the team.
    ServerData(CarInfo),
    /// Graceful leave.
    Disconnect,
    /// A new pit strategy proposal.
    Strategy(PitStrategy),
    /// The driver accepted the last strategy.
    StrategyAck,
    /// Low-frequency dashboard telemetry (unreliable).
    Telemetry(TelemetrySample),
    /// Per-tick driver inputs (unreliable).
    RealtimeTelemetry(RealtimeSample),
    /// Full roster, sent whenever membership changes.
    RosterSnapshot(Vec<RosterEntry>),
    /// Bind the datagram's source address to this participant (unreliable).
    RegisterUnreliableEndpoint { name: String },
    /// Liveness ping for the unreliable endpoint.
    UnreliableHeartbeat,
    /// The relay lost track of the unreliable endpoint; re-register it.
    UnreliableReRegisterRequest,
    /// Strategy history replayed to a late joiner, in creation order.
    StrategyHistorySnapshot(Vec<PitStrategy>),
    /// Decode sentinel for unknown opcodes and malformed payloads.
    Unknown { opcode: u8 },
}

impl Message {
    /// The opcode this message is written with. `None` for `Unknown`.
    pub fn packet_type(&self) -> Option<PacketType> {
        Some(match self {
            Message::Connect { .. } => PacketType::Connect,
            Message::ConnectReply { .. } => PacketType::ConnectReply,
            Message::CarData(_) => PacketType::CarData,
            Message::ServerData(_) => PacketType::ServerData,
            Message::Disconnect => PacketType::Disconnect,
            Message::Strategy(_) => PacketType::Strategy,
            Message::StrategyAck => PacketType::StrategyAck,
            Message::Telemetry(_) => PacketType::Telemetry,
            Message::RealtimeTelemetry(_) => PacketType::RealtimeTelemetry,
            Message::RosterSnapshot(_) => PacketType::RosterSnapshot,
            Message::RegisterUnreliableEndpoint { .. } => PacketType::RegisterUnreliableEndpoint,
            Message::UnreliableHeartbeat => PacketType::UnreliableHeartbeat,
            Message::UnreliableReRegisterRequest => PacketType::UnreliableReRegisterRequest,
            Message::StrategyHistorySnapshot(_) => PacketType::StrategyHistorySnapshot,
            Message::Unknown { .. } => return None,
        })
    }

    /// The raw opcode byte, including the one carried by `Unknown`.
    pub fn opcode(&self) -> u8 {
        match (self, self.packet_type()) {
            (Message::Unknown { opcode }, _) => *opcode,
            (_, Some(packet_type)) => packet_type as u8,
            (_, None) => 0,
        }
    }

    /// True for the message kinds that travel over the unreliable channel:
    /// the two telemetry streams, plus endpoint registration and heartbeats,
    /// which must come from the datagram socket whose address they bind.
    pub fn is_unreliable(&self) -> bool {
        matches!(
            self,
            Message::Telemetry(_)
                | Message::RealtimeTelemetry(_)
                | Message::RegisterUnreliableEndpoint { .. }
                | Message::UnreliableHeartbeat
        )
    }

    /// Serialize to `opcode + payload`. No length prefix; see `framing.rs`
    /// for the reliable transport's framing.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.packet_type().is_none() {
            return Err(CodecError::EncodeUnknown(self.opcode()));
        }

        let mut w = WireWriter::new();
        w.put_u8(self.opcode());
        match self {
            Message::Connect { name, driver } => {
                w.put_name(name)?;
                w.put_i32(driver.0);
            }
            Message::ConnectReply { success, message } => {
                w.put_bool(*success);
                w.put_name(message)?;
            }
            Message::CarData(info) | Message::ServerData(info) => info.write(&mut w)?,
            Message::Strategy(strategy) => strategy.write(&mut w)?,
            Message::Telemetry(sample) => sample.write(&mut w)?,
            Message::RealtimeTelemetry(sample) => sample.write(&mut w)?,
            Message::RosterSnapshot(entries) => {
                w.put_count("roster", entries.len())?;
                for entry in entries {
                    entry.write(&mut w)?;
                }
            }
            Message::RegisterUnreliableEndpoint { name } => w.put_name(name)?,
            Message::StrategyHistorySnapshot(strategies) => {
                w.put_count("strategy history", strategies.len())?;
                for strategy in strategies {
                    strategy.write(&mut w)?;
                }
            }
            Message::Disconnect
            | Message::StrategyAck
            | Message::UnreliableHeartbeat
            | Message::UnreliableReRegisterRequest
            | Message::Unknown { .. } => {}
        }
        Ok(w.into_bytes())
    }

    /// Parse `opcode + payload`, reporting exactly what went wrong.
    pub fn try_decode(bytes: &[u8]) -> Result<Message, CodecError> {
        let mut r = WireReader::new(bytes);
        let opcode = r.get_u8().map_err(|_| CodecError::Empty)?;
        let packet_type = PacketType::from_u8(opcode).ok_or(CodecError::UnknownOpcode(opcode))?;

        let message = match packet_type {
            PacketType::Connect => Message::Connect {
                name: r.get_name("connect name")?,
                driver: DriverSlot(r.get_i32()?),
            },
            PacketType::ConnectReply => Message::ConnectReply {
                success: r.get_bool()?,
                message: r.get_name("connect reply")?,
            },
            PacketType::CarData => Message::CarData(CarInfo::read(&mut r)?),
            PacketType::ServerData => Message::ServerData(CarInfo::read(&mut r)?),
            PacketType::Disconnect => Message::Disconnect,
            PacketType::Strategy => Message::Strategy(PitStrategy::read(&mut r)?),
            PacketType::StrategyAck => Message::StrategyAck,
            PacketType::Telemetry => Message::Telemetry(TelemetrySample::read(&mut r)?),
            PacketType::RealtimeTelemetry => {
                Message::RealtimeTelemetry(RealtimeSample::read(&mut r)?)
            }
            PacketType::RosterSnapshot => {
                let count = r.get_u8()?;
                let entries = (0..count)
                    .map(|_| RosterEntry::read(&mut r))
                    .collect::<Result<Vec<_>, _>>()?;
                Message::RosterSnapshot(entries)
            }
            PacketType::RegisterUnreliableEndpoint => Message::RegisterUnreliableEndpoint {
                name: r.get_name("endpoint name")?,
            },
            PacketType::UnreliableHeartbeat => Message::UnreliableHeartbeat,
            PacketType::UnreliableReRegisterRequest => Message::UnreliableReRegisterRequest,
            PacketType::StrategyHistorySnapshot => {
                let count = r.get_u8()?;
                let strategies = (0..count)
                    .map(|_| PitStrategy::read(&mut r))
                    .collect::<Result<Vec<_>, _>>()?;
                Message::StrategyHistorySnapshot(strategies)
            }
        };
        Ok(message)
    }

    /// Parse `opcode + payload`. Never fails: anything unparseable becomes
    /// `Message::Unknown` carrying the offending opcode (0 for an empty packet).
    pub fn decode(bytes: &[u8]) -> Message {
        Self::try_decode(bytes).unwrap_or_else(|_| Message::Unknown {
            opcode: bytes.first().copied().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::telemetry::{CarDamage, RainIntensity, SessionType, TrackGrip};
    use crate::types::{TyreCompound, Wheels};

    fn roundtrip(msg: &Message) {
        let bytes = msg.encode().unwrap();
        assert_eq!(&Message::decode(&bytes), msg);
    }

    fn alice_strategy() -> PitStrategy {
        PitStrategy {
            timestamp: "20:15:00".into(),
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
    fn connect_wire_layout() {
        let bytes = Message::Connect {
            name: "Alice".into(),
            driver: DriverSlot(1),
        }
        .encode()
        .unwrap();
        assert_eq!(
            bytes,
            vec![1, 5, b'A', b'l', b'i', b'c', b'e', 0, 0, 0, 1]
        );
    }

    #[test]
    fn connect_reply_wire_layout() {
        let bytes = Message::ConnectReply {
            success: false,
            message: "no".into(),
        }
        .encode()
        .unwrap();
        assert_eq!(bytes, vec![5, 0, 2, b'n', b'o']);
    }

    #[test]
    fn empty_messages_are_one_byte() {
        for (msg, opcode) in [
            (Message::Disconnect, 4u8),
            (Message::StrategyAck, 7),
            (Message::UnreliableHeartbeat, 12),
            (Message::UnreliableReRegisterRequest, 13),
        ] {
            assert_eq!(msg.encode().unwrap(), vec![opcode]);
            roundtrip(&msg);
        }
    }

    #[test]
    fn roster_snapshot_roundtrip() {
        roundtrip(&Message::RosterSnapshot(vec![
            RosterEntry {
                name: "Alice".into(),
                driver: DriverSlot(1),
            },
            RosterEntry {
                name: "Bob".into(),
                driver: DriverSlot(2),
            },
        ]));
        roundtrip(&Message::RosterSnapshot(vec![]));
    }

    #[test]
    fn strategy_history_roundtrip_keeps_order() {
        let first = alice_strategy();
        let second = PitStrategy {
            timestamp: "20:40:12".into(),
            tyre_compound: TyreCompound::Wet,
            driver_offset: 1,
            ..alice_strategy()
        };
        let msg = Message::StrategyHistorySnapshot(vec![first.clone(), second.clone()]);
        let Message::StrategyHistorySnapshot(decoded) =
            Message::decode(&msg.encode().unwrap())
        else {
            panic!("expected StrategyHistorySnapshot");
        };
        assert_eq!(decoded, vec![first, second]);
    }

    #[test]
    fn server_data_reuses_car_data_payload() {
        let info = CarInfo {
            tyre_pressures: Wheels::new(27.5, 27.5, 27.1, 27.1),
            fuel_to_add: 30.0,
            max_fuel: 120.0,
            tyre_set: 2,
        };
        let car = Message::CarData(info).encode().unwrap();
        let server = Message::ServerData(info).encode().unwrap();
        assert_eq!(car[0], PacketType::CarData as u8);
        assert_eq!(server[0], PacketType::ServerData as u8);
        assert_eq!(car[1..], server[1..]);
    }

    #[test]
    fn unknown_opcode_decodes_to_sentinel() {
        assert_eq!(
            Message::decode(&[0xEE, 1, 2, 3]),
            Message::Unknown { opcode: 0xEE }
        );
        assert_eq!(
            Message::try_decode(&[0xEE]),
            Err(CodecError::UnknownOpcode(0xEE))
        );
    }

    #[test]
    fn empty_packet_decodes_to_sentinel() {
        assert_eq!(Message::decode(&[]), Message::Unknown { opcode: 0 });
        assert_eq!(Message::try_decode(&[]), Err(CodecError::Empty));
    }

    #[test]
    fn truncated_known_packet_decodes_to_sentinel() {
        let mut bytes = Message::Strategy(alice_strategy()).encode().unwrap();
        bytes.truncate(10);
        assert_eq!(
            Message::decode(&bytes),
            Message::Unknown {
                opcode: PacketType::Strategy as u8
            }
        );
    }

    #[test]
    fn unknown_cannot_be_encoded() {
        assert_eq!(
            Message::Unknown { opcode: 99 }.encode(),
            Err(CodecError::EncodeUnknown(99))
        );
    }

    #[test]
    fn oversized_roster_rejected() {
        let entries = (0..256)
            .map(|i| RosterEntry {
                name: format!("d{i}"),
                driver: DriverSlot(i),
            })
            .collect();
        assert!(matches!(
            Message::RosterSnapshot(entries).encode(),
            Err(CodecError::TooManyEntries { count: 256, .. })
        ));
    }

    #[test]
    fn transport_routing() {
        assert!(Message::RealtimeTelemetry(RealtimeSample::default()).is_unreliable());
        assert!(Message::UnreliableHeartbeat.is_unreliable());
        assert!(
            Message::RegisterUnreliableEndpoint {
                name: "Alice".into()
            }
            .is_unreliable()
        );
        assert!(!Message::Strategy(alice_strategy()).is_unreliable());
        assert!(!Message::CarData(CarInfo::default()).is_unreliable());
        assert!(!Message::StrategyAck.is_unreliable());
    }

    // --- Property tests ---

    fn finite_f32() -> impl Strategy<Value = f32> {
        any::<f32>().prop_filter("finite", |f| f.is_finite())
    }

    prop_compose! {
        fn arb_wheels()(a in finite_f32(), b in finite_f32(), c in finite_f32(), d in finite_f32()) -> Wheels {
            Wheels::new(a, b, c, d)
        }
    }

    /// Printable names, multi-byte characters included. At most 60 chars,
    /// so never more than 240 bytes.
    fn arb_name() -> impl Strategy<Value = String> {
        "\\PC{0,60}"
    }

    prop_compose! {
        fn arb_strategy()(
            timestamp in "[0-9:]{0,8}",
            fuel in finite_f32(),
            tyre_set in any::<i32>(),
            wet in any::<bool>(),
            tyre_pressures in arb_wheels(),
            driver_offset in any::<i32>(),
            brake_pad in any::<i32>(),
            repair_bodywork in any::<bool>(),
            repair_suspension in any::<bool>()
        ) -> PitStrategy {
            PitStrategy {
                timestamp,
                fuel,
                tyre_set,
                tyre_compound: if wet { TyreCompound::Wet } else { TyreCompound::Dry },
                tyre_pressures,
                driver_offset,
                brake_pad,
                repair_bodywork,
                repair_suspension,
            }
        }
    }

    prop_compose! {
        fn arb_car_info()(
            tyre_pressures in arb_wheels(),
            fuel_to_add in finite_f32(),
            max_fuel in finite_f32(),
            tyre_set in any::<i32>()
        ) -> CarInfo {
            CarInfo { tyre_pressures, fuel_to_add, max_fuel, tyre_set }
        }
    }

    prop_compose! {
        fn arb_realtime()(
            gas in finite_f32(),
            brake in finite_f32(),
            steering_angle in finite_f32(),
            gear in any::<i32>(),
            speed in finite_f32()
        ) -> RealtimeSample {
            RealtimeSample { gas, brake, steering_angle, gear, speed }
        }
    }

    prop_compose! {
        fn arb_telemetry()(
            driver in arb_name(),
            ints in prop::array::uniform8(any::<i32>()),
            floats in prop::array::uniform8(finite_f32()),
            wheels in prop::array::uniform8(arb_wheels()),
            flags in prop::array::uniform5(any::<bool>()),
            codes in prop::array::uniform5(any::<u8>())
        ) -> TelemetrySample {
            TelemetrySample {
                driver,
                lap: ints[0],
                fuel: floats[0],
                fuel_per_lap: floats[1],
                fuel_estimated_laps: floats[2],
                pad_wear: wheels[0],
                disc_wear: wheels[1],
                lap_time: ints[1],
                best_time: ints[2],
                previous_time: ints[3],
                in_pit: flags[0],
                in_pit_lane: flags[1],
                session: SessionType::from(codes[0]),
                driver_stint_time_left: ints[4],
                tyre_pressure: wheels[2],
                tyre_temp: wheels[3],
                brake_temp: wheels[4],
                has_wet_tyres: flags[2],
                session_time_left: floats[3],
                grip: TrackGrip::from(codes[1]),
                front_pad: codes[2],
                rear_pad: codes[3],
                damage: CarDamage {
                    front: floats[4],
                    rear: floats[5],
                    left: floats[6],
                    right: floats[7],
                    centre: wheels[7].front_left,
                },
                rain: RainIntensity::from(codes[4]),
                suspension_damage: wheels[5],
                current_sector_index: ints[5],
                last_sector_time: ints[6],
                is_lap_valid: flags[3],
                air_temp: wheels[6].front_left,
                road_temp: wheels[6].rear_right,
            }
        }
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        prop_oneof![arb_control_message(), arb_data_message()]
    }

    fn arb_control_message() -> impl Strategy<Value = Message> {
        prop_oneof![
            (arb_name(), any::<i32>()).prop_map(|(name, d)| Message::Connect {
                name,
                driver: DriverSlot(d)
            }),
            (any::<bool>(), arb_name())
                .prop_map(|(success, message)| Message::ConnectReply { success, message }),
            Just(Message::Disconnect),
            Just(Message::StrategyAck),
            arb_name().prop_map(|name| Message::RegisterUnreliableEndpoint { name }),
            Just(Message::UnreliableHeartbeat),
            Just(Message::UnreliableReRegisterRequest),
        ]
    }

    fn arb_data_message() -> impl Strategy<Value = Message> {
        prop_oneof![
            arb_car_info().prop_map(Message::CarData),
            arb_car_info().prop_map(Message::ServerData),
            arb_strategy().prop_map(Message::Strategy),
            arb_telemetry().prop_map(Message::Telemetry),
            arb_realtime().prop_map(Message::RealtimeTelemetry),
            prop::collection::vec(
                (arb_name(), any::<i32>()).prop_map(|(name, d)| RosterEntry {
                    name,
                    driver: DriverSlot(d)
                }),
                0..6
            )
            .prop_map(Message::RosterSnapshot),
            prop::collection::vec(arb_strategy(), 0..12).prop_map(Message::StrategyHistorySnapshot),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(msg in arb_message()) {
            let bytes = msg.encode().unwrap();
            prop_assert_eq!(Message::decode(&bytes), msg);
        }

        /// NaN payloads and infinities survive bit-for-bit.
        #[test]
        fn prop_realtime_floats_are_bit_exact(bits in prop::array::uniform4(any::<u32>()), gear in any::<i32>()) {
            let msg = Message::RealtimeTelemetry(RealtimeSample {
                gas: f32::from_bits(bits[0]),
                brake: f32::from_bits(bits[1]),
                steering_angle: f32::from_bits(bits[2]),
                gear,
                speed: f32::from_bits(bits[3]),
            });
            let bytes = msg.encode().unwrap();
            prop_assert_eq!(Message::decode(&bytes).encode().unwrap(), bytes);
        }

        /// Arbitrary bytes never panic the decoder.
        #[test]
        fn prop_decode_total(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = Message::decode(&bytes);
        }

        #[test]
        fn prop_long_names_roundtrip(len in 0usize..=255) {
            let name = "n".repeat(len);
            let msg = Message::RegisterUnreliableEndpoint { name };
            let bytes = msg.encode().unwrap();
            prop_assert_eq!(Message::decode(&bytes), msg);
        }
    }
}
