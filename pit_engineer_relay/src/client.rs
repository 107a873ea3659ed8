// Team client for the session relay.
//
// Provides a non-blocking interface for the application thread. Architecture:
// - `connect()` performs TCP connect + Connect handshake on the calling
//   thread with a short timeout. Only on success does it open the UDP socket
//   and register it with the relay.
// - A reliable reader thread decodes frames into `ClientEvent`s and pushes
//   them into an `mpsc` inbox. A re-registration request from the relay is
//   forwarded to the worker instead.
// - A worker thread owns the TCP write half and the UDP socket. It sends
//   queued strategy traffic in order, drains the latest-value slots for car
//   data and telemetry, and heartbeats over UDP.
// - A datagram reader thread per UDP socket pushes relayed telemetry into
//   the same inbox. Re-registration replaces the socket and its reader.
// - `poll()` drains the inbox without blocking.
//
// `send()` never blocks: car data and telemetry overwrite an unsent older
// sample, strategy and acks queue behind each other.
//
// Shutdown (`disconnect()`, also run on drop): the worker sends Disconnect
// and half-closes; we then wait, bounded by `drain_timeout`, for the relay
// to close its side before releasing both sockets.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pit_engineer_protocol::{
    CarInfo, DriverSlot, Message, PitStrategy, RealtimeSample, RosterEntry, TelemetrySample,
};
use tracing::{debug, info, warn};

use crate::coalesce::LatestValue;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::{
    ReliableChannel, ReliableReader, ReliableWriter, ServerEndpoints, UnreliableChannel,
};

/// Datagram reader wake-up period, bounding how long socket replacement
/// and shutdown wait for it.
const UDP_POLL: Duration = Duration::from_millis(100);

/// What the application hands to `NetClient::send`.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundEvent {
    CarData(CarInfo),
    Strategy(PitStrategy),
    StrategyAck,
    Telemetry(TelemetrySample),
    Realtime(RealtimeSample),
}

/// What `NetClient::poll` returns.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Roster(Vec<RosterEntry>),
    /// Another participant's car data (`ServerData` on the wire).
    CarData(CarInfo),
    Strategy(PitStrategy),
    StrategyAck,
    StrategyHistory(Vec<PitStrategy>),
    Telemetry(TelemetrySample),
    Realtime(RealtimeSample),
    Disconnected { reason: String },
}

enum WorkerCommand {
    /// A latest-value slot went from empty to full.
    Flush,
    /// Already-encoded reliable message, sent in queue order.
    Reliable(Vec<u8>),
    ReRegister,
    Shutdown,
}

#[derive(Clone, Default)]
struct OutboundSlots {
    car_data: LatestValue<CarInfo>,
    telemetry: LatestValue<TelemetrySample>,
    realtime: LatestValue<RealtimeSample>,
}

/// Client connection to a relay.
pub struct NetClient {
    name: String,
    driver: DriverSlot,
    drain_timeout: Duration,
    slots: OutboundSlots,
    commands: Sender<WorkerCommand>,
    inbox: Receiver<ClientEvent>,
    /// Control handle on the TCP socket for the final shutdown.
    socket: TcpStream,
    closing: Arc<AtomicBool>,
    /// Set by the reliable reader when the relay connection ends.
    reader_closed: Arc<AtomicBool>,
    /// Disconnects when the reliable reader thread exits.
    reader_done: Receiver<()>,
    reader_thread: Option<JoinHandle<()>>,
    worker_thread: Option<JoinHandle<()>>,
}

impl NetClient {
    /// Connect with default timings. Returns the client and the relay's
    /// welcome text.
    pub fn connect(
        endpoints: ServerEndpoints,
        name: &str,
        driver: DriverSlot,
    ) -> Result<(Self, String), ClientError> {
        Self::connect_with(endpoints, name, driver, ClientConfig::default())
    }

    pub fn connect_with(
        endpoints: ServerEndpoints,
        name: &str,
        driver: DriverSlot,
        config: ClientConfig,
    ) -> Result<(Self, String), ClientError> {
        let hello = Message::Connect {
            name: name.to_owned(),
            driver,
        }
        .encode()?;

        let channel = ReliableChannel::open(endpoints.reliable, config.handshake_timeout)
            .map_err(|source| ClientError::Connect {
                addr: endpoints.reliable,
                source,
            })?;
        let (mut writer, mut reader) = channel.split().map_err(ClientError::Handshake)?;

        reader
            .set_timeout(Some(config.handshake_timeout))
            .map_err(ClientError::Handshake)?;
        writer.send(&hello).map_err(ClientError::Handshake)?;

        let welcome = match reader.recv_message().map_err(ClientError::Handshake)? {
            Message::ConnectReply {
                success: true,
                message,
            } => message,
            Message::ConnectReply {
                success: false,
                message,
            } => {
                info!(name, reason = %message, "connect rejected by relay");
                return Err(ClientError::Rejected(message));
            }
            other => return Err(ClientError::UnexpectedReply(other)),
        };

        // Clear read timeout for the long-lived reader loop.
        reader.set_timeout(None).map_err(ClientError::Handshake)?;
        let socket = writer.try_clone_socket().map_err(ClientError::Handshake)?;

        let (inbox_tx, inbox) = mpsc::channel();
        let (commands, command_rx) = mpsc::channel();
        let udp = UdpLink::open(endpoints.unreliable, name, inbox_tx.clone())
            .map_err(ClientError::Unreliable)?;

        let closing = Arc::new(AtomicBool::new(false));
        let reader_closed = Arc::new(AtomicBool::new(false));
        let (done_tx, reader_done) = mpsc::channel();
        let reader_thread = {
            let inbox = inbox_tx.clone();
            let commands = commands.clone();
            let closing = closing.clone();
            let reader_closed = reader_closed.clone();
            thread::Builder::new()
                .name(format!("client-{name}-tcp"))
                .spawn(move || {
                    let _done = done_tx;
                    reliable_reader_loop(reader, &inbox, &commands, &closing, &reader_closed);
                })
                .map_err(ClientError::Spawn)?
        };

        let slots = OutboundSlots::default();
        let worker = Worker {
            writer,
            udp,
            server: endpoints.unreliable,
            name: name.to_owned(),
            slots: slots.clone(),
            inbox: inbox_tx,
            heartbeat_interval: config.heartbeat_interval,
        };
        let worker_thread = thread::Builder::new()
            .name(format!("client-{name}-out"))
            .spawn(move || worker.run(&command_rx))
            .map_err(ClientError::Spawn)?;

        info!(name, driver = %driver, relay = %endpoints.reliable, "connected");

        Ok((
            Self {
                name: name.to_owned(),
                driver,
                drain_timeout: config.drain_timeout,
                slots,
                commands,
                inbox,
                socket,
                closing,
                reader_closed,
                reader_done,
                reader_thread: Some(reader_thread),
                worker_thread: Some(worker_thread),
            },
            welcome,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> DriverSlot {
        self.driver
    }

    /// False once `disconnect()` ran or the relay connection ended.
    pub fn is_connected(&self) -> bool {
        self.worker_thread.is_some() && !self.reader_closed.load(Ordering::SeqCst)
    }

    /// Queue an outbound event. Never blocks. Fails with
    /// `ClientError::Disconnected` once the connection is gone.
    pub fn send(&self, event: OutboundEvent) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }
        let wake = match event {
            OutboundEvent::CarData(info) => self.slots.car_data.replace(info),
            OutboundEvent::Telemetry(sample) => self.slots.telemetry.replace(sample),
            OutboundEvent::Realtime(sample) => self.slots.realtime.replace(sample),
            OutboundEvent::Strategy(strategy) => {
                let bytes = Message::Strategy(strategy).encode()?;
                return self.command(WorkerCommand::Reliable(bytes));
            }
            OutboundEvent::StrategyAck => {
                let bytes = Message::StrategyAck.encode()?;
                return self.command(WorkerCommand::Reliable(bytes));
            }
        };
        if wake {
            self.command(WorkerCommand::Flush)
        } else {
            Ok(())
        }
    }

    /// Drain all queued events (non-blocking).
    pub fn poll(&self) -> Vec<ClientEvent> {
        self.inbox.try_iter().collect()
    }

    /// Send Disconnect, wait briefly for the relay to close, release sockets.
    /// Idempotent.
    pub fn disconnect(&mut self) {
        let Some(worker) = self.worker_thread.take() else {
            return;
        };
        info!(name = %self.name, "disconnecting");
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.commands.send(WorkerCommand::Shutdown);
        let _ = worker.join();

        match self.reader_done.recv_timeout(self.drain_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                debug!(name = %self.name, "relay did not close in time");
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        }
        let _ = self.socket.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader_thread.take() {
            let _ = reader.join();
        }
    }

    fn command(&self, command: WorkerCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Disconnected)
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Reliable reader thread: decode frames, push events to the inbox.
fn reliable_reader_loop(
    mut reader: ReliableReader,
    inbox: &Sender<ClientEvent>,
    commands: &Sender<WorkerCommand>,
    closing: &AtomicBool,
    reader_closed: &AtomicBool,
) {
    loop {
        let message = match reader.recv_message() {
            Ok(message) => message,
            Err(e) => {
                reader_closed.store(true, Ordering::SeqCst);
                let reason = if closing.load(Ordering::SeqCst) {
                    "disconnected".to_owned()
                } else if e.kind() == io::ErrorKind::UnexpectedEof {
                    "relay closed the connection".to_owned()
                } else {
                    e.to_string()
                };
                debug!(%reason, "reliable channel ended");
                let _ = inbox.send(ClientEvent::Disconnected { reason });
                return;
            }
        };
        let event = match message {
            Message::RosterSnapshot(roster) => ClientEvent::Roster(roster),
            Message::ServerData(info) => ClientEvent::CarData(info),
            Message::Strategy(strategy) => ClientEvent::Strategy(strategy),
            Message::StrategyAck => ClientEvent::StrategyAck,
            Message::StrategyHistorySnapshot(history) => ClientEvent::StrategyHistory(history),
            Message::UnreliableReRegisterRequest => {
                info!("relay requested unreliable re-registration");
                let _ = commands.send(WorkerCommand::ReRegister);
                continue;
            }
            Message::Unknown { opcode } => {
                warn!(opcode, "dropping undecodable frame");
                continue;
            }
            other => {
                debug!(opcode = other.opcode(), "ignoring unexpected message");
                continue;
            }
        };
        if inbox.send(event).is_err() {
            return;
        }
    }
}

/// Outbound side: owns the TCP writer and the current UDP link.
struct Worker {
    writer: ReliableWriter,
    udp: UdpLink,
    server: SocketAddr,
    name: String,
    slots: OutboundSlots,
    inbox: Sender<ClientEvent>,
    heartbeat_interval: Duration,
}

impl Worker {
    fn run(mut self, commands: &Receiver<WorkerCommand>) {
        let mut last_heartbeat = Instant::now();
        loop {
            let wait = self
                .heartbeat_interval
                .saturating_sub(last_heartbeat.elapsed());
            match commands.recv_timeout(wait) {
                Ok(WorkerCommand::Flush) => self.flush(),
                Ok(WorkerCommand::Reliable(bytes)) => self.send_reliable(&bytes),
                Ok(WorkerCommand::ReRegister) => self.reregister(),
                Ok(WorkerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if last_heartbeat.elapsed() >= self.heartbeat_interval {
                self.send_unreliable(&Message::UnreliableHeartbeat);
                last_heartbeat = Instant::now();
            }
        }
    }

    fn flush(&mut self) {
        if let Some(info) = self.slots.car_data.take() {
            match Message::CarData(info).encode() {
                Ok(bytes) => self.send_reliable(&bytes),
                Err(e) => warn!(error = %e, "failed to encode car data"),
            }
        }
        if let Some(sample) = self.slots.telemetry.take() {
            self.send_unreliable(&Message::Telemetry(sample));
        }
        if let Some(sample) = self.slots.realtime.take() {
            self.send_unreliable(&Message::RealtimeTelemetry(sample));
        }
    }

    fn send_reliable(&mut self, bytes: &[u8]) {
        if let Err(e) = self.writer.send(bytes) {
            warn!(error = %e, "reliable send failed");
        }
    }

    fn send_unreliable(&self, msg: &Message) {
        if let Err(e) = self.udp.channel.send_message(msg) {
            debug!(opcode = msg.opcode(), error = %e, "datagram send failed");
        }
    }

    /// Fresh socket (new source port), fresh registration.
    fn reregister(&mut self) {
        match UdpLink::open(self.server, &self.name, self.inbox.clone()) {
            Ok(link) => {
                self.udp = link;
                info!(name = %self.name, "unreliable channel re-registered");
            }
            Err(e) => warn!(name = %self.name, error = %e, "failed to reopen unreliable channel"),
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.writer.send_message(&Message::Disconnect) {
            debug!(error = %e, "failed to send Disconnect");
        }
        if let Err(e) = self.writer.shutdown_write() {
            debug!(error = %e, "failed to half-close");
        }
        self.udp.stop();
    }
}

/// One UDP socket plus the thread reading from it.
struct UdpLink {
    channel: UnreliableChannel,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl UdpLink {
    /// Open a socket to the relay, start its reader, and register it.
    fn open(server: SocketAddr, name: &str, inbox: Sender<ClientEvent>) -> io::Result<Self> {
        let channel = UnreliableChannel::open(server)?;
        let mut reader_channel = channel.try_clone()?;
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("client-{name}-udp"))
                .spawn(move || datagram_loop(&mut reader_channel, &inbox, &stop))?
        };
        let link = Self {
            channel,
            stop,
            reader: Some(reader),
        };
        link.channel
            .send_message(&Message::RegisterUnreliableEndpoint {
                name: name.to_owned(),
            })?;
        Ok(link)
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Datagram reader thread: relayed telemetry into the inbox.
fn datagram_loop(channel: &mut UnreliableChannel, inbox: &Sender<ClientEvent>, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        let bytes = match channel.recv(UDP_POLL) {
            Ok(Some((bytes, _))) => bytes,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "datagram receive failed");
                thread::sleep(UDP_POLL);
                continue;
            }
        };
        let event = match Message::decode(&bytes) {
            Message::Telemetry(sample) => ClientEvent::Telemetry(sample),
            Message::RealtimeTelemetry(sample) => ClientEvent::Realtime(sample),
            other => {
                debug!(opcode = other.opcode(), "ignoring datagram");
                continue;
            }
        };
        if inbox.send(event).is_err() {
            return;
        }
    }
}
