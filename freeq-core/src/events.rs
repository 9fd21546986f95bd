//! Event types broadcast by a running session.
//!
//! ## Channels
//!
//! | Event | Subscribed via |
//! |-------|----------------|
//! | `SessionStatusEvent` | `DuplexSession::subscribe_status` |
//! | `OccupancyEvent` | `DuplexSession::subscribe_occupancy` |
//!
//! All types are serde-serializable (camelCase) so a host application can
//! forward them over whatever IPC bus it uses unchanged.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Emitted whenever the session lifecycle state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of a duplex session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session created but `start()` not yet called.
    Idle,
    /// Warming up the processor (allocating scratch, priming caches).
    WarmingUp,
    /// Worker running; the realtime end may push and pull.
    Running,
    /// Worker joined; the session may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

// ---------------------------------------------------------------------------
// Occupancy events
// ---------------------------------------------------------------------------

/// Emitted by the worker after each processed batch.
///
/// A host watchdog can diagnose liveness from these: input occupancy that
/// grows monotonically across events means the worker is falling behind or
/// the producer stopped being drained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Frames readable on the input ring after the drain.
    pub input_frames: usize,
    /// Frames readable on the output ring after the submit.
    pub output_frames: usize,
    /// Batches processed so far in this session.
    pub batches: u64,
}
