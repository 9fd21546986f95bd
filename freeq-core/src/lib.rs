//! # freeq-core
//!
//! Full-duplex audio transport between a hard-real-time render thread and a
//! general-purpose worker thread, built on lock-free SPSC ring buffers and
//! an atomic wake/sleep protocol.
//!
//! ## Architecture
//!
//! ```text
//! Render callback ──► RealtimeEnd ──► input ring ───► WorkerEnd (blocking)
//!      ▲                  │              WakeSignal ──────┘│
//!      │                  │                                │ BatchProcessor
//!      └── pull_output ◄──┴────────── output ring ◄────────┘
//! ```
//!
//! The realtime side performs O(quantum) bounded work per callback — no
//! locks, no allocation, no blocking. The worker drains large batches per
//! wakeup and may run arbitrarily expensive processing between them. The
//! ring indices are the sole synchronization edge; the wake signal only
//! schedules, never transfers data.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod duplex;
pub mod error;
pub mod events;
pub mod ring;
pub mod session;
pub mod wake;

// Convenience re-exports for downstream crates
pub use duplex::{
    create_duplex, passthrough::PassthroughProcessor, BatchProcessor, ProcessorHandle,
    QuantumReport, RealtimeEnd, WorkerEnd,
};
pub use error::FreeqError;
pub use events::{OccupancyEvent, SessionStatus, SessionStatusEvent};
pub use ring::{create_frame_ring, frames::FrameBlock, RingConsumer, RingProducer};
pub use session::{DuplexSession, SessionConfig};
pub use wake::{WaitOutcome, WakeSignal};

pub use audio::{AudioBridge, SampleSource, SineSource};
