use std::fmt::{self, Display};

use crate::asm::CompileError;
use crate::map::MapError;
use crate::script::LoaderError;

/// Top level error taxonomy (spec §7). Each variant carries enough context to
/// log usefully; the *kind* is what callers branch on.
#[derive(Debug)]
pub enum RelayError {
    /// Malformed handshake or bad message shape during play.
    ProtocolViolation { handler_id: u64, reason: String },
    /// Rate limit, packet flood, connection spam, game-create spam.
    AbusiveClient { ip: String, reason: String },
    /// Invalid tick or grid size from a room host.
    HostMisbehavior { room_code: String, reason: String },
    /// ScriptLoader exhausted primary and fallback sources.
    ExternalFetchError { source: String, reason: String },
    /// PixSimAssembly compile failure for a specific dialect.
    CompileError(CompileError),
    /// A ScriptLoader cache file was corrupt and had to be deleted.
    CacheCorruption { path: String },
}

impl Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::ProtocolViolation { handler_id, reason } => {
                write!(f, "protocol violation (handler {handler_id}): {reason}")
            }
            RelayError::AbusiveClient { ip, reason } => {
                write!(f, "abusive client {ip}: {reason}")
            }
            RelayError::HostMisbehavior { room_code, reason } => {
                write!(f, "host misbehavior in room {room_code}: {reason}")
            }
            RelayError::ExternalFetchError { source, reason } => {
                write!(f, "fetch failed for {source}: {reason}")
            }
            RelayError::CompileError(err) => write!(f, "compile error: {err}"),
            RelayError::CacheCorruption { path } => {
                write!(f, "cache corrupt, deleted: {path}")
            }
        }
    }
}

impl std::error::Error for RelayError {}

impl From<CompileError> for RelayError {
    fn from(err: CompileError) -> Self {
        RelayError::CompileError(err)
    }
}

impl From<MapError> for RelayError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::NotFound { .. } | MapError::Malformed { .. } => RelayError::ProtocolViolation {
                handler_id: 0,
                reason: err.to_string(),
            },
        }
    }
}

impl From<LoaderError> for RelayError {
    fn from(err: LoaderError) -> Self {
        match err {
            LoaderError::FetchFailed { ref source } => RelayError::ExternalFetchError {
                source: source.clone(),
                reason: err.to_string(),
            },
            LoaderError::CacheCorrupt { ref path } => RelayError::CacheCorruption { path: path.clone() },
            LoaderError::IsolateCrashed { .. } => RelayError::ExternalFetchError {
                source: "isolate".to_string(),
                reason: err.to_string(),
            },
        }
    }
}
