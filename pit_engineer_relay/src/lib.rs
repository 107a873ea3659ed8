// pit_engineer_relay: session relay and team client for the pit engineer.
//
// The relay is a thin broker: team members connect over TCP, claim a unique
// name and driver slot, and the relay forwards car data, pit strategies, and
// acknowledgements to everyone else. Telemetry travels over UDP and is
// relayed verbatim between registered endpoints. The relay keeps the strategy
// history so a late joiner gets everything proposed before it arrived.
//
// Module overview:
// - `registry.rs`:  `SessionRegistry`: participants, uniqueness rules,
//                   unreliable endpoints and liveness, strategy history.
//                   Pure data; driven by `server.rs`.
// - `server.rs`:    TCP listener, per-connection reader threads, a UDP
//                   receive thread, and the single-threaded main event loop
//                   that owns the registry.
// - `client.rs`:    `NetClient`: handshake, non-blocking send/poll, UDP
//                   heartbeat and re-registration, graceful disconnect.
// - `view.rs`:      `SessionView`: folds `ClientEvent`s into display state.
// - `transport.rs`: Reliable/unreliable channel wrappers over `std::net`.
// - `coalesce.rs`:  `LatestValue`: replace-don't-queue slot for samples.
// - `config.rs`:    `RelayConfig` (JSON-loadable) and `ClientConfig`.
// - `error.rs`:     `JoinRejection`, `RegistryError`, `ClientError`,
//                   `ConfigError`.
//
// Dependencies: `pit_engineer_protocol` (shared message types and framing),
// `tracing` for logs, `serde`/`serde_json` for config files.
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in a
// process via the library API (`start_relay`).

pub mod client;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod transport;
pub mod view;

pub use client::{ClientEvent, NetClient, OutboundEvent};
pub use config::{ClientConfig, RelayConfig};
pub use error::{ClientError, ConfigError, JoinRejection, RegistryError};
pub use server::{RelayHandle, start_relay};
pub use transport::ServerEndpoints;
pub use view::{ConnectionState, SessionView};
