//! Trace collection.
//!
//! A representative driver runs with a profiling hook installed. The hook
//! keeps formula calls of one model package and the attribute values bound
//! by reference initializers; the tree of live space instances supplies
//! parameter bindings afterwards.

pub mod collector;
pub mod event;
pub mod hook;
pub mod replay;
pub mod spaces;

pub use collector::{trace_calls, CallTracer, FuncRole, TraceLog, TraceObservation, TraceSession, TracerConfig};
pub use event::{CodeInfo, FrameId, ReturnKind, TraceEvent};
pub use hook::{dispatch, ProfileGuard, ProfileHook};
pub use replay::{replay_file, replay_str, TraceRecord};
pub use spaces::SpaceInstance;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("a trace session is already active")]
    SessionActive,
    #[error("return from {0} carries no value")]
    MissingReturnValue(String),
    #[error("return from {found} does not match pending call of {expected}")]
    FrameMismatch { expected: String, found: String },
    #[error("trace line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to start driver thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Serializes tests touching the process-wide hook.
#[cfg(test)]
pub(crate) static TEST_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
