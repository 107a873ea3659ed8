// Session registry for the relay server.
//
// `SessionRegistry` is the pure-data heart of the relay: who is connected,
// which driver slot each participant claimed, where their unreliable
// (UDP) endpoint currently is, and the strategy history. It owns no sockets.
// `server.rs` keeps the reliable writers next to it, keyed by the same
// `ConnectionId`, and is the only caller; all mutation happens on the
// server's event-loop thread, so there is no internal locking.
//
// Invariants kept by every method:
// - Names are unique and non-empty; driver slots are unique.
// - At most `max_participants` entries.
// - An unreliable endpoint belongs to at most one participant.
// - The strategy history only grows, in arrival order.
//
// Liveness: each participant has a `last_seen` instant, set on join and
// refreshed by any datagram from its endpoint. `prune_stale_endpoints`
// drops endpoints silent for longer than the window and reports each owner
// once per window of silence. Reporting restarts the clock, so an owner
// whose registration datagram got lost is reported again one window later
// rather than never.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use pit_engineer_protocol::{DriverSlot, PitStrategy, RosterEntry};

use crate::error::{JoinRejection, RegistryError};

/// Relay-assigned id for one reliable connection, in accept order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Participant {
    name: String,
    driver: DriverSlot,
    unreliable_endpoint: Option<SocketAddr>,
    last_seen: Instant,
    /// Re-registration requests since the last successful registration.
    reregister_requests: u32,
}

impl Participant {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> DriverSlot {
        self.driver
    }

    pub fn unreliable_endpoint(&self) -> Option<SocketAddr> {
        self.unreliable_endpoint
    }

    pub fn reregister_requests(&self) -> u32 {
        self.reregister_requests
    }
}

pub struct SessionRegistry {
    participants: BTreeMap<ConnectionId, Participant>,
    strategies: Vec<PitStrategy>,
    max_participants: usize,
}

impl SessionRegistry {
    pub fn new(max_participants: usize) -> Self {
        Self {
            participants: BTreeMap::new(),
            strategies: Vec::new(),
            max_participants,
        }
    }

    /// Check a Connect request without changing anything.
    pub fn validate_join(&self, name: &str, driver: DriverSlot) -> Result<(), JoinRejection> {
        if name.is_empty() {
            return Err(JoinRejection::EmptyName);
        }
        if self.is_full() {
            return Err(JoinRejection::SessionFull);
        }
        if self.participants.values().any(|p| p.name == name) {
            return Err(JoinRejection::NameTaken);
        }
        if self.participants.values().any(|p| p.driver == driver) {
            return Err(JoinRejection::DriverTaken(driver));
        }
        Ok(())
    }

    /// Admit a participant. On any error the registry is unchanged.
    pub fn add_participant(
        &mut self,
        id: ConnectionId,
        name: String,
        driver: DriverSlot,
        now: Instant,
    ) -> Result<(), RegistryError> {
        debug_assert!(
            !self.participants.contains_key(&id),
            "connection {id} added twice"
        );
        if self.participants.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }
        self.validate_join(&name, driver)?;
        self.participants.insert(
            id,
            Participant {
                name,
                driver,
                unreliable_endpoint: None,
                last_seen: now,
                reregister_requests: 0,
            },
        );
        Ok(())
    }

    pub fn remove_participant(&mut self, id: ConnectionId) -> Option<Participant> {
        self.participants.remove(&id)
    }

    pub fn participant(&self, id: ConnectionId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_participants
    }

    /// Connected participants in join order.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.participants
            .values()
            .map(|p| RosterEntry {
                name: p.name.clone(),
                driver: p.driver,
            })
            .collect()
    }

    /// Append to the history; returns the new history length.
    pub fn record_strategy(&mut self, strategy: PitStrategy) -> usize {
        self.strategies.push(strategy);
        self.strategies.len()
    }

    pub fn strategy_history(&self) -> &[PitStrategy] {
        &self.strategies
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Bind `addr` as the unreliable endpoint of the participant called
    /// `name`, replacing any previous endpoint. Another participant holding
    /// the same address loses it. Returns the owner's id, or `None` if no
    /// participant has that name.
    pub fn register_endpoint(
        &mut self,
        name: &str,
        addr: SocketAddr,
        now: Instant,
    ) -> Option<ConnectionId> {
        let id = self
            .participants
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(id, _)| *id)?;
        for (other_id, other) in self.participants.iter_mut() {
            if *other_id != id && other.unreliable_endpoint == Some(addr) {
                other.unreliable_endpoint = None;
            }
        }
        let participant = self.participants.get_mut(&id)?;
        participant.unreliable_endpoint = Some(addr);
        participant.last_seen = now;
        participant.reregister_requests = 0;
        Some(id)
    }

    /// Refresh liveness for whoever owns `addr`.
    pub fn touch_endpoint(&mut self, addr: SocketAddr, now: Instant) -> Option<ConnectionId> {
        let (id, participant) = self
            .participants
            .iter_mut()
            .find(|(_, p)| p.unreliable_endpoint == Some(addr))?;
        participant.last_seen = now;
        Some(*id)
    }

    /// Every registered unreliable endpoint except `addr`.
    pub fn endpoints_except(&self, addr: SocketAddr) -> Vec<SocketAddr> {
        self.participants
            .values()
            .filter_map(|p| p.unreliable_endpoint)
            .filter(|endpoint| *endpoint != addr)
            .collect()
    }

    /// Drop endpoints silent for longer than `window` and return their
    /// owners, who should be asked to re-register. A participant that never
    /// registered an endpoint is reported once its join is older than
    /// `window`. An owner that stays silent after being reported is
    /// reported again one full window later.
    pub fn prune_stale_endpoints(&mut self, now: Instant, window: Duration) -> Vec<ConnectionId> {
        let mut pruned = Vec::new();
        for (id, participant) in self.participants.iter_mut() {
            if now.saturating_duration_since(participant.last_seen) > window {
                participant.unreliable_endpoint = None;
                participant.last_seen = now;
                participant.reregister_requests += 1;
                pruned.push(*id);
            }
        }
        pruned
    }
}
