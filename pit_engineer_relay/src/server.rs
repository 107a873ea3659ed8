// TCP/UDP server and main event loop for the session relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop, non-blocking with a
//   short sleep): assigns a `ConnectionId` and spawns a connection thread.
// - **Connection threads** (one per TCP client): read the Connect handshake
//   frame with a timeout, hand the write half to the main thread in
//   `InternalEvent::Connect`, then read frames until Disconnect, EOF, or
//   error. CarData is parked in a per-connection `LatestValue` slot under a
//   sequence number, and a marker carrying that number is queued in arrival
//   order. Only the marker of the newest sample finds it in the slot, so a
//   burst collapses to the newest sample, relayed at its own position in
//   the stream.
// - **Datagram thread**: `recv` with a timeout on the UDP socket, forwarding
//   each datagram with its source address.
// - **Main thread**: owns the `SessionRegistry`, every reliable writer, and
//   the UDP socket for sending. Uses `recv_timeout` with the tick period so
//   history replays and liveness pruning run even when idle.
//
// The main thread is the only writer to client sockets. Connection threads
// only read. Every write is bounded by `write_timeout`: a participant that
// stops reading costs the loop at most that long once. A write failure
// drops the writer and closes the socket, which makes that connection's
// reader fail and report `Closed`, so teardown always goes through one path.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; the main loop exits,
// closes every socket, and the other threads wind down on their next wake.

use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pit_engineer_protocol::{CarInfo, DriverSlot, Message, PitStrategy};
use tracing::{debug, error, info, warn};

use crate::coalesce::LatestValue;
use crate::config::RelayConfig;
use crate::error::RegistryError;
use crate::registry::{ConnectionId, SessionRegistry};
use crate::transport::{
    ReliableChannel, ReliableReader, ReliableWriter, ServerEndpoints, UnreliableChannel,
};

/// How long a new connection may take to send its Connect frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// A history snapshot carries a one-byte count.
const HISTORY_CHUNK: usize = u8::MAX as usize;

const WELCOME: &str = "Connected to the relay.";

/// Newest CarData of one connection, tagged with its arrival sequence.
type CarDataSlot = LatestValue<(u64, CarInfo)>;

/// Events sent from listener/connection/datagram threads to the main thread.
enum InternalEvent {
    Connect {
        id: ConnectionId,
        name: String,
        driver: DriverSlot,
        writer: ReliableWriter,
        car_data: CarDataSlot,
    },
    Inbound {
        id: ConnectionId,
        message: Message,
    },
    CarDataPending {
        id: ConnectionId,
        seq: u64,
    },
    Closed {
        id: ConnectionId,
        graceful: bool,
    },
    Datagram {
        bytes: Vec<u8>,
        from: SocketAddr,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay's main loop exits.
    pub fn join(mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("relay main thread panicked");
            }
        }
    }
}

/// Start the relay on background threads. Returns a handle for stopping it
/// and the actual bound addresses (useful when port 0 lets the OS pick).
pub fn start_relay(config: RelayConfig) -> io::Result<(RelayHandle, ServerEndpoints)> {
    let listener = TcpListener::bind(SocketAddr::new(config.bind_ip, config.tcp_port))?;
    let udp = UnreliableChannel::bind(SocketAddr::new(config.bind_ip, config.udp_port))?;
    let endpoints = ServerEndpoints {
        reliable: listener.local_addr()?,
        unreliable: udp.local_addr()?,
    };

    // Non-blocking so the accept thread can check keep_running periodically.
    listener.set_nonblocking(true)?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel();

    spawn_listener(listener, tx.clone(), keep_running.clone())?;
    spawn_datagram_receiver(udp.try_clone()?, tx, keep_running.clone(), config.tick())?;

    info!(
        tcp = %endpoints.reliable,
        udp = %endpoints.unreliable,
        max_participants = config.max_participants,
        "relay listening"
    );

    let keep_running_main = keep_running.clone();
    let thread = thread::Builder::new()
        .name("relay-main".into())
        .spawn(move || {
            let mut relay = Relay::new(config, udp);
            relay.run(&rx, &keep_running_main);
        })?;

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        endpoints,
    ))
}

fn spawn_listener(
    listener: TcpListener,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("relay-accept".into())
        .spawn(move || {
            let mut next_id = 0u64;
            while keep_running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let id = ConnectionId(next_id);
                        next_id += 1;
                        let channel = match stream
                            .set_nonblocking(false)
                            .and_then(|()| ReliableChannel::from_stream(stream))
                        {
                            Ok(channel) => channel,
                            Err(e) => {
                                warn!(%peer, error = %e, "failed to set up connection");
                                continue;
                            }
                        };
                        debug!(conn = %id, %peer, "accepted connection");
                        let tx = tx.clone();
                        let keep_running = keep_running.clone();
                        let spawned = thread::Builder::new()
                            .name(format!("relay-conn-{}", id.0))
                            .spawn(move || connection_loop(id, channel, &tx, &keep_running));
                        if let Err(e) = spawned {
                            error!(conn = %id, error = %e, "failed to spawn connection thread");
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL);
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed; listener stopped");
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

fn spawn_datagram_receiver(
    mut udp: UnreliableChannel,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
    poll: Duration,
) -> io::Result<()> {
    thread::Builder::new()
        .name("relay-udp".into())
        .spawn(move || {
            while keep_running.load(Ordering::SeqCst) {
                match udp.recv(poll) {
                    Ok(Some((bytes, from))) => {
                        if tx.send(InternalEvent::Datagram { bytes, from }).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "datagram receive failed");
                        thread::sleep(poll);
                    }
                }
            }
        })?;
    Ok(())
}

/// Reader side of one TCP connection. Runs in its own thread.
fn connection_loop(
    id: ConnectionId,
    channel: ReliableChannel,
    tx: &Sender<InternalEvent>,
    keep_running: &AtomicBool,
) {
    let peer = channel.peer_addr();
    let (writer, mut reader) = match channel.split() {
        Ok(halves) => halves,
        Err(e) => {
            warn!(conn = %id, %peer, error = %e, "failed to split connection");
            return;
        }
    };

    let Some((name, driver)) = read_handshake(id, &mut reader) else {
        writer.close();
        return;
    };

    // Clear the handshake timeout for the long-lived reader loop.
    if let Err(e) = reader.set_timeout(None) {
        warn!(conn = %id, error = %e, "failed to clear read timeout");
        writer.close();
        return;
    }

    let car_data = CarDataSlot::new();
    let mut car_seq = 0u64;
    let connect = InternalEvent::Connect {
        id,
        name,
        driver,
        writer,
        car_data: car_data.clone(),
    };
    if tx.send(connect).is_err() {
        return;
    }

    while keep_running.load(Ordering::SeqCst) {
        match reader.recv_message() {
            Ok(Message::Disconnect) => {
                let _ = tx.send(InternalEvent::Closed { id, graceful: true });
                return;
            }
            Ok(Message::CarData(info)) => {
                car_seq += 1;
                if !forward_car_data(id, &car_data, car_seq, info, tx) {
                    return;
                }
            }
            Ok(message) => {
                if tx.send(InternalEvent::Inbound { id, message }).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(conn = %id, error = %e, "connection read ended");
                let _ = tx.send(InternalEvent::Closed {
                    id,
                    graceful: false,
                });
                return;
            }
        }
    }
}

/// The first frame must be Connect; anything else ends the connection.
fn read_handshake(id: ConnectionId, reader: &mut ReliableReader) -> Option<(String, DriverSlot)> {
    if let Err(e) = reader.set_timeout(Some(HANDSHAKE_TIMEOUT)) {
        warn!(conn = %id, error = %e, "failed to set handshake timeout");
        return None;
    }
    match reader.recv_message() {
        Ok(Message::Connect { name, driver }) => Some((name, driver)),
        Ok(other) => {
            warn!(conn = %id, opcode = other.opcode(), "first frame was not Connect; closing");
            None
        }
        Err(e) => {
            debug!(conn = %id, error = %e, "no handshake received");
            None
        }
    }
}

/// Park `info` in the connection's slot, overwriting an unrelayed older
/// sample, and queue its marker. Returns `false` once the main thread is
/// gone.
fn forward_car_data(
    id: ConnectionId,
    slot: &CarDataSlot,
    seq: u64,
    info: CarInfo,
    tx: &Sender<InternalEvent>,
) -> bool {
    slot.replace((seq, info));
    tx.send(InternalEvent::CarDataPending { id, seq }).is_ok()
}

/// The sample parked under `seq`, unless a newer one has replaced it.
fn claim_car_data(slot: &CarDataSlot, seq: u64) -> Option<CarInfo> {
    slot.take_if(|(parked, _)| *parked == seq).map(|(_, info)| info)
}

/// Split a history into wire-sized snapshots. An empty history still yields
/// one (empty) snapshot so the joiner knows the replay is complete.
fn history_snapshots(history: &[PitStrategy]) -> Vec<Message> {
    if history.is_empty() {
        return vec![Message::StrategyHistorySnapshot(Vec::new())];
    }
    history
        .chunks(HISTORY_CHUNK)
        .map(|chunk| Message::StrategyHistorySnapshot(chunk.to_vec()))
        .collect()
}

struct Connection {
    writer: ReliableWriter,
    car_data: CarDataSlot,
}

/// A joiner's pending history replay: only strategies that were already
/// recorded when it became active (`cutoff`); later ones reached it live.
struct HistoryReplay {
    due: Instant,
    cutoff: usize,
}

/// State owned by the main thread.
struct Relay {
    config: RelayConfig,
    registry: SessionRegistry,
    connections: BTreeMap<ConnectionId, Connection>,
    pending_history: BTreeMap<ConnectionId, HistoryReplay>,
    udp: UnreliableChannel,
}

impl Relay {
    fn new(config: RelayConfig, udp: UnreliableChannel) -> Self {
        Self {
            registry: SessionRegistry::new(config.max_participants),
            config,
            connections: BTreeMap::new(),
            pending_history: BTreeMap::new(),
            udp,
        }
    }

    /// Main relay loop. Runs until `keep_running` is set to false.
    fn run(&mut self, rx: &Receiver<InternalEvent>, keep_running: &AtomicBool) {
        let tick = self.config.tick();
        let mut next_tick = Instant::now() + tick;

        while keep_running.load(Ordering::SeqCst) {
            match rx.recv_timeout(tick) {
                Ok(event) => {
                    self.handle_event(event, Instant::now());
                    // Drain any additional events that arrived during handling.
                    while let Ok(event) = rx.try_recv() {
                        self.handle_event(event, Instant::now());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            if now >= next_tick {
                self.on_tick(now);
                next_tick = now + tick;
            }
        }

        self.shutdown();
    }

    fn handle_event(&mut self, event: InternalEvent, now: Instant) {
        match event {
            InternalEvent::Connect {
                id,
                name,
                driver,
                writer,
                car_data,
            } => self.on_connect(id, name, driver, writer, car_data, now),
            InternalEvent::Inbound { id, message } => self.on_inbound(id, message),
            InternalEvent::CarDataPending { id, seq } => self.on_car_data(id, seq),
            InternalEvent::Closed { id, graceful } => self.on_closed(id, graceful),
            InternalEvent::Datagram { bytes, from } => self.on_datagram(&bytes, from, now),
        }
    }

    fn on_connect(
        &mut self,
        id: ConnectionId,
        name: String,
        driver: DriverSlot,
        mut writer: ReliableWriter,
        car_data: CarDataSlot,
        now: Instant,
    ) {
        if let Err(e) = writer.set_timeout(Some(self.config.write_timeout())) {
            warn!(conn = %id, error = %e, "failed to set write timeout");
            writer.close();
            return;
        }
        match self
            .registry
            .add_participant(id, name.clone(), driver, now)
        {
            Ok(()) => {
                let reply = Message::ConnectReply {
                    success: true,
                    message: WELCOME.into(),
                };
                if let Err(e) = writer.send_message(&reply) {
                    warn!(conn = %id, error = %e, "failed to send connect reply");
                    self.registry.remove_participant(id);
                    writer.close();
                    return;
                }
                info!(
                    conn = %id,
                    name = %name,
                    driver = %driver,
                    peer = %writer.peer_addr(),
                    participants = self.registry.len(),
                    "participant joined"
                );
                self.pending_history.insert(
                    id,
                    HistoryReplay {
                        due: now + self.config.history_delay(),
                        cutoff: self.registry.strategy_count(),
                    },
                );
                self.connections
                    .insert(id, Connection { writer, car_data });
                self.broadcast_roster();
            }
            Err(RegistryError::Rejected(reason)) => {
                info!(conn = %id, name = %name, driver = %driver, %reason, "connect rejected");
                let reply = Message::ConnectReply {
                    success: false,
                    message: reason.to_string(),
                };
                if let Err(e) = writer.send_message(&reply) {
                    debug!(conn = %id, error = %e, "failed to send rejection");
                }
                writer.close();
            }
            Err(err) => {
                error!(conn = %id, error = %err, "registry refused connection");
                writer.close();
            }
        }
    }

    fn on_inbound(&mut self, id: ConnectionId, message: Message) {
        if !self.connections.contains_key(&id) {
            debug!(conn = %id, "message from inactive connection dropped");
            return;
        }
        match message {
            Message::Strategy(strategy) => {
                let count = self.registry.record_strategy(strategy.clone());
                info!(
                    conn = %id,
                    timestamp = %strategy.timestamp,
                    history = count,
                    "strategy recorded"
                );
                self.broadcast(Some(id), &Message::Strategy(strategy));
            }
            Message::StrategyAck => {
                debug!(conn = %id, "strategy acknowledged");
                self.broadcast(Some(id), &Message::StrategyAck);
            }
            Message::Unknown { opcode } => {
                warn!(conn = %id, opcode, "dropping undecodable frame");
            }
            other => {
                warn!(
                    conn = %id,
                    opcode = other.opcode(),
                    "unexpected message on reliable channel dropped"
                );
            }
        }
    }

    fn on_car_data(&mut self, id: ConnectionId, seq: u64) {
        let Some(info) = self
            .connections
            .get(&id)
            .and_then(|c| claim_car_data(&c.car_data, seq))
        else {
            return;
        };
        self.broadcast(Some(id), &Message::ServerData(info));
    }

    fn on_closed(&mut self, id: ConnectionId, graceful: bool) {
        self.pending_history.remove(&id);
        if let Some(connection) = self.connections.remove(&id) {
            connection.writer.close();
        }
        let Some(participant) = self.registry.remove_participant(id) else {
            return;
        };
        if graceful {
            info!(conn = %id, name = %participant.name(), "participant disconnected");
        } else {
            warn!(conn = %id, name = %participant.name(), "participant connection lost");
        }
        if self.registry.is_empty() {
            info!("session is empty");
        }
        self.broadcast_roster();
    }

    fn on_datagram(&mut self, bytes: &[u8], from: SocketAddr, now: Instant) {
        match Message::decode(bytes) {
            Message::RegisterUnreliableEndpoint { name } => {
                match self.registry.register_endpoint(&name, from, now) {
                    Some(id) => info!(conn = %id, name = %name, endpoint = %from, "unreliable endpoint registered"),
                    None => warn!(name = %name, endpoint = %from, "endpoint registration for unknown participant"),
                }
            }
            Message::UnreliableHeartbeat => {
                if self.registry.touch_endpoint(from, now).is_none() {
                    debug!(endpoint = %from, "heartbeat from unregistered endpoint");
                }
            }
            Message::Telemetry(_) | Message::RealtimeTelemetry(_) => {
                if self.registry.touch_endpoint(from, now).is_none() {
                    debug!(endpoint = %from, "telemetry from unregistered endpoint dropped");
                    return;
                }
                for target in self.registry.endpoints_except(from) {
                    if let Err(e) = self.udp.send_to(bytes, target) {
                        debug!(endpoint = %target, error = %e, "telemetry relay failed");
                    }
                }
            }
            Message::Unknown { opcode } => {
                warn!(endpoint = %from, opcode, "dropping undecodable datagram");
            }
            other => {
                warn!(
                    endpoint = %from,
                    opcode = other.opcode(),
                    "reliable-only message received as datagram; dropped"
                );
            }
        }
    }

    /// Timers: history replays that are due, then liveness pruning.
    fn on_tick(&mut self, now: Instant) {
        let due: Vec<ConnectionId> = self
            .pending_history
            .iter()
            .filter(|(_, replay)| replay.due <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            if let Some(replay) = self.pending_history.remove(&id) {
                self.send_history(id, replay.cutoff);
            }
        }

        for id in self
            .registry
            .prune_stale_endpoints(now, self.config.liveness_window())
        {
            let attempt = self
                .registry
                .participant(id)
                .map_or(1, |p| p.reregister_requests());
            if attempt > 1 {
                warn!(conn = %id, attempt, "still no unreliable endpoint; asking again");
            } else {
                info!(conn = %id, "unreliable endpoint silent; requesting re-registration");
            }
            self.send_to(id, &Message::UnreliableReRegisterRequest);
        }
    }

    fn send_history(&mut self, id: ConnectionId, cutoff: usize) {
        let history = self
            .registry
            .strategy_history()
            .get(..cutoff)
            .unwrap_or_default();
        debug!(conn = %id, strategies = history.len(), "replaying strategy history");
        let snapshots = history_snapshots(history);
        for snapshot in snapshots {
            if !self.send_to(id, &snapshot) {
                break;
            }
        }
    }

    /// Returns `false` if the connection is gone or the write failed.
    fn send_to(&mut self, id: ConnectionId, msg: &Message) -> bool {
        match msg.encode() {
            Ok(bytes) => self.write_to(id, &bytes),
            Err(e) => {
                error!(conn = %id, error = %e, "failed to encode outbound message");
                false
            }
        }
    }

    fn write_to(&mut self, id: ConnectionId, bytes: &[u8]) -> bool {
        let Some(connection) = self.connections.get_mut(&id) else {
            return false;
        };
        let Err(e) = connection.writer.send(bytes) else {
            return true;
        };
        // A timed-out write may have left half a frame behind, so the stream
        // is unusable either way. The reader thread sees the closed socket
        // and reports Closed, which updates the registry and roster.
        if matches!(
            e.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ) {
            warn!(conn = %id, "participant stopped reading; closing connection");
        } else {
            warn!(conn = %id, error = %e, "write failed; closing connection");
        }
        if let Some(connection) = self.connections.remove(&id) {
            connection.writer.close();
        }
        self.pending_history.remove(&id);
        false
    }

    /// Send to every active connection except `except`.
    fn broadcast(&mut self, except: Option<ConnectionId>, msg: &Message) {
        let bytes = match msg.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode broadcast");
                return;
            }
        };
        let targets: Vec<ConnectionId> = self
            .connections
            .keys()
            .copied()
            .filter(|id| Some(*id) != except)
            .collect();
        for id in targets {
            self.write_to(id, &bytes);
        }
    }

    fn broadcast_roster(&mut self) {
        let roster = Message::RosterSnapshot(self.registry.roster());
        self.broadcast(None, &roster);
    }

    fn shutdown(&mut self) {
        for connection in self.connections.values() {
            connection.writer.close();
        }
        self.connections.clear();
        self.pending_history.clear();
        info!("relay stopped");
    }
}
