// Consumer-side session state folded from `ClientEvent`s.
//
// `SessionView` is what a dashboard renders: the roster, the team's latest
// car data and telemetry, and the strategy list. Every event kind is applied
// idempotently, so a duplicated datagram or a history snapshot overlapping a
// live strategy leaves the view unchanged.

use std::collections::BTreeMap;

use pit_engineer_protocol::{CarInfo, PitStrategy, RealtimeSample, RosterEntry, TelemetrySample};

use crate::client::ClientEvent;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connected,
    Disconnected {
        reason: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionView {
    pub roster: Vec<RosterEntry>,
    /// Latest car data relayed from a teammate.
    pub car: Option<CarInfo>,
    /// Latest low-frequency sample per driver name.
    pub telemetry: BTreeMap<String, TelemetrySample>,
    pub realtime: Option<RealtimeSample>,
    /// Strategies in the order first seen.
    pub strategies: Vec<PitStrategy>,
    /// A strategy arrived and nobody has confirmed applying it yet.
    pub awaiting_ack: bool,
    pub connection: ConnectionState,
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::Roster(roster) => self.roster = roster.clone(),
            ClientEvent::CarData(info) => self.car = Some(*info),
            ClientEvent::Strategy(strategy) => {
                self.insert_strategy(strategy);
                self.awaiting_ack = true;
            }
            ClientEvent::StrategyAck => self.awaiting_ack = false,
            ClientEvent::StrategyHistory(history) => {
                for strategy in history {
                    self.insert_strategy(strategy);
                }
            }
            ClientEvent::Telemetry(sample) => {
                self.telemetry
                    .insert(sample.driver.clone(), sample.clone());
            }
            ClientEvent::Realtime(sample) => self.realtime = Some(*sample),
            ClientEvent::Disconnected { reason } => {
                self.connection = ConnectionState::Disconnected {
                    reason: reason.clone(),
                };
            }
        }
    }

    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a ClientEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    pub fn latest_strategy(&self) -> Option<&PitStrategy> {
        self.strategies.last()
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    fn insert_strategy(&mut self, strategy: &PitStrategy) {
        if !self.strategies.contains(strategy) {
            self.strategies.push(strategy.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pit_engineer_protocol::{DriverSlot, TyreCompound, Wheels};

    fn strategy(stamp: &str, fuel: f32) -> PitStrategy {
        PitStrategy {
            timestamp: stamp.into(),
            fuel,
            tyre_set: 3,
            tyre_compound: TyreCompound::Dry,
            tyre_pressures: Wheels::new(27.0, 27.0, 26.8, 26.8),
            driver_offset: 0,
            brake_pad: 1,
            repair_bodywork: false,
            repair_suspension: false,
        }
    }

    fn realtime(speed: f32) -> RealtimeSample {
        RealtimeSample {
            gas: 0.8,
            brake: 0.0,
            steering_angle: -0.1,
            gear: 4,
            speed,
        }
    }

    #[test]
    fn duplicate_realtime_is_idempotent() {
        let event = ClientEvent::Realtime(realtime(212.0));
        let mut once = SessionView::new();
        once.apply(&event);
        let mut twice = SessionView::new();
        twice.apply(&event);
        twice.apply(&event);
        assert_eq!(once, twice);
    }

    #[test]
    fn newer_realtime_wins() {
        let mut view = SessionView::new();
        view.apply(&ClientEvent::Realtime(realtime(100.0)));
        view.apply(&ClientEvent::Realtime(realtime(150.0)));
        assert_eq!(view.realtime.map(|s| s.speed), Some(150.0));
    }

    #[test]
    fn history_overlapping_live_strategy_not_duplicated() {
        let first = strategy("10:00:00", 40.0);
        let second = strategy("10:10:00", 55.0);
        let mut view = SessionView::new();
        view.apply(&ClientEvent::Strategy(second.clone()));
        view.apply(&ClientEvent::StrategyHistory(vec![
            first.clone(),
            second.clone(),
        ]));
        assert_eq!(view.strategies, vec![second.clone(), first]);
        assert_eq!(view.latest_strategy(), Some(&strategy("10:00:00", 40.0)));
    }

    #[test]
    fn ack_clears_pending_flag() {
        let mut view = SessionView::new();
        view.apply(&ClientEvent::Strategy(strategy("10:00:00", 40.0)));
        assert!(view.awaiting_ack);
        view.apply(&ClientEvent::StrategyAck);
        assert!(!view.awaiting_ack);
    }

    #[test]
    fn roster_replaced_wholesale() {
        let mut view = SessionView::new();
        let alice = RosterEntry {
            name: "Alice".into(),
            driver: DriverSlot(1),
        };
        let bob = RosterEntry {
            name: "Bob".into(),
            driver: DriverSlot(2),
        };
        view.apply(&ClientEvent::Roster(vec![alice.clone(), bob]));
        view.apply(&ClientEvent::Roster(vec![alice.clone()]));
        assert_eq!(view.roster, vec![alice]);
    }

    #[test]
    fn disconnect_recorded() {
        let mut view = SessionView::new();
        assert!(view.is_connected());
        view.apply_all(&[ClientEvent::Disconnected {
            reason: "relay closed the connection".into(),
        }]);
        assert!(!view.is_connected());
    }
}
