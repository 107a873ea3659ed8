// Error types for the relay and the team client.
//
// `JoinRejection` is user-facing: its `Display` text is sent verbatim in a
// failed `ConnectReply`. The others are for logs and callers.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use pit_engineer_protocol::{CodecError, DriverSlot, Message};
use thiserror::Error;

use crate::registry::ConnectionId;

/// Why a Connect handshake was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinRejection {
    #[error("The username must not be empty.")]
    EmptyName,
    #[error("session is full")]
    SessionFull,
    #[error("This username is already connected.")]
    NameTaken,
    #[error("The driver ID {0} is already used.")]
    DriverTaken(DriverSlot),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Rejected(#[from] JoinRejection),
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

/// Failures surfaced by `NetClient`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("handshake failed: {0}")]
    Handshake(#[source] io::Error),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unexpected handshake reply: {0:?}")]
    UnexpectedReply(Message),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unreliable channel setup failed: {0}")]
    Unreliable(#[source] io::Error),
    #[error("failed to start client thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("client is disconnected")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid relay config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_text_matches_reply_wording() {
        assert_eq!(
            JoinRejection::NameTaken.to_string(),
            "This username is already connected."
        );
        assert_eq!(
            JoinRejection::DriverTaken(DriverSlot(2)).to_string(),
            "The driver ID 2 is already used."
        );
        assert_eq!(JoinRejection::SessionFull.to_string(), "session is full");
    }

    #[test]
    fn registry_error_is_transparent_over_rejection() {
        let err = RegistryError::from(JoinRejection::NameTaken);
        assert_eq!(err.to_string(), "This username is already connected.");
    }
}
