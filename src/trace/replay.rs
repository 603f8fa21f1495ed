//! Replay of trace files written by an external harness.
//!
//! A trace file holds one JSON-encoded [`TraceRecord`] per line. Events are
//! pushed through the installed hook exactly as live events would be.

use super::collector::{TraceLog, TraceSession, TracerConfig};
use super::event::TraceEvent;
use super::hook;
use super::spaces::SpaceInstance;
use super::TraceError;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TraceRecord {
    Event(TraceEvent),
    Spaces(SpaceInstance),
}

/// Replays trace lines under a fresh session.
pub fn replay_str(text: &str, config: TracerConfig) -> Result<TraceLog> {
    let session = TraceSession::begin(config)?;
    let mut roots = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: TraceRecord =
            serde_json::from_str(line).map_err(|source| TraceError::Malformed {
                line: idx + 1,
                source,
            })?;
        match record {
            TraceRecord::Event(event) => hook::dispatch(&event),
            TraceRecord::Spaces(root) => roots.push(root),
        }
    }
    let mut log = session.finish();
    for root in &roots {
        log.record_spaces(root);
    }
    Ok(log)
}

pub fn replay_file(path: &Path, config: TracerConfig) -> Result<TraceLog> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    tracing::info!(path = %path.display(), "replaying trace");
    replay_str(&text, config)
}

/// Serializes records in the replay format.
pub fn to_lines(records: &[TraceRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
