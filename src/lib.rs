//! PixSim Relay: a real-time multiplayer pixel-simulator relay server.
//!
//! Clients host and join rooms over a socket-with-named-events wire protocol
//! (spec §6); the host's simulation tick is relayed to every other member,
//! translated between pixel dialects as needed, and input from non-host
//! members is relayed back to the host.

pub mod asm;
pub mod config;
pub mod dialect;
pub mod error;
pub mod http;
pub mod map;
pub mod net;
pub mod pixel;
pub mod script;
pub mod wire;

pub use config::RelayConfig;
pub use error::RelayError;
pub use net::broker::Broker;
