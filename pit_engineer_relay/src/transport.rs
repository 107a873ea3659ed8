// Reliable (TCP) and unreliable (UDP) channels shared by relay and client.
//
// A `ReliableChannel` is split into a `ReliableWriter` and a
// `ReliableReader` over cloned handles of one `TcpStream`, so one thread can
// block in `recv()` while another writes. Framing (2-byte length prefix) is
// delegated to `pit_engineer_protocol::framing`, which absorbs coalesced and
// split reads.
//
// `UnreliableChannel` wraps a `UdpSocket`: one encoded message per datagram,
// no prefix. `recv` takes a timeout and reports it as `Ok(None)` so callers
// can poll a stop flag between reads. ICMP-induced `ConnectionRefused` /
// `ConnectionReset` on a UDP socket are treated the same way: the channel is
// lossy by contract.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use pit_engineer_protocol::framing::{read_frame, write_frame};
use pit_engineer_protocol::{CodecError, Message};

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = u16::MAX as usize;

/// The relay's two listening addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerEndpoints {
    pub reliable: SocketAddr,
    pub unreliable: SocketAddr,
}

/// An open TCP connection, not yet split.
pub struct ReliableChannel {
    stream: TcpStream,
    peer: SocketAddr,
}

impl ReliableChannel {
    /// Connect with a bounded wait.
    pub fn open(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        Self::from_stream(stream)
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn split(self) -> io::Result<(ReliableWriter, ReliableReader)> {
        let read_half = self.stream.try_clone()?;
        Ok((
            ReliableWriter {
                stream: BufWriter::new(self.stream),
                peer: self.peer,
            },
            ReliableReader {
                stream: BufReader::new(read_half),
            },
        ))
    }
}

pub struct ReliableWriter {
    stream: BufWriter<TcpStream>,
    peer: SocketAddr,
}

impl ReliableWriter {
    /// Frame and flush one already-encoded message.
    pub fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        write_frame(&mut self.stream, payload)
    }

    pub fn send_message(&mut self, msg: &Message) -> io::Result<()> {
        let bytes = msg.encode().map_err(codec_error)?;
        self.send(&bytes)
    }

    /// Bound each `send`. A send that times out fails with `WouldBlock` or
    /// `TimedOut` and may have written part of a frame. `None` blocks
    /// indefinitely.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.get_ref().set_write_timeout(timeout)
    }

    /// Half-close: the peer sees EOF, we can still read.
    pub fn shutdown_write(&mut self) -> io::Result<()> {
        self.stream.flush()?;
        self.stream.get_ref().shutdown(Shutdown::Write)
    }

    /// Close both directions. Also unblocks a reader thread on this socket.
    pub fn close(&self) {
        let _ = self.stream.get_ref().shutdown(Shutdown::Both);
    }

    /// Another handle to the same socket, for timeouts and shutdown from a
    /// thread that does not own the writer.
    pub fn try_clone_socket(&self) -> io::Result<TcpStream> {
        self.stream.get_ref().try_clone()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

pub struct ReliableReader {
    stream: BufReader<TcpStream>,
}

impl ReliableReader {
    /// Block until one whole frame arrives.
    pub fn recv(&mut self) -> io::Result<Vec<u8>> {
        read_frame(&mut self.stream)
    }

    /// Never fails on content: undecodable frames are `Message::Unknown`.
    pub fn recv_message(&mut self) -> io::Result<Message> {
        let bytes = self.recv()?;
        Ok(Message::decode(&bytes))
    }

    /// `None` blocks indefinitely.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.get_ref().set_read_timeout(timeout)
    }
}

pub struct UnreliableChannel {
    socket: UdpSocket,
    /// Receive buffer, reused across `recv` calls.
    buf: Vec<u8>,
}

impl UnreliableChannel {
    /// Listen on `local` (relay side).
    pub fn bind(local: SocketAddr) -> io::Result<Self> {
        Ok(Self::from_socket(UdpSocket::bind(local)?))
    }

    /// Fresh ephemeral socket connected to `server` (client side).
    pub fn open(server: SocketAddr) -> io::Result<Self> {
        let any = match server.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(any, 0))?;
        socket.connect(server)?;
        Ok(Self::from_socket(socket))
    }

    fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send to the connected peer.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send(bytes).map(|_| ())
    }

    pub fn send_message(&self, msg: &Message) -> io::Result<()> {
        let bytes = msg.encode().map_err(codec_error)?;
        self.send(&bytes)
    }

    pub fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        self.socket.send_to(bytes, addr).map(|_| ())
    }

    /// Wait up to `timeout` for one datagram.
    pub fn recv(&mut self, timeout: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv_from(&mut self.buf) {
            Ok((len, from)) => Ok(Some((self.buf[..len].to_vec(), from))),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::ConnectionRefused
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Another handle to the same socket, with its own receive buffer.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self::from_socket(self.socket.try_clone()?))
    }
}

fn codec_error(err: CodecError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err)
}
