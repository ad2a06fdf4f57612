//! Session/connection layer (spec §4.5-§4.7): transport, per-connection
//! handler, room state machine, and the process-wide broker tying them
//! together.

pub mod broker;
pub mod connection;
pub mod handler;
pub mod room;
