use thiserror::Error;

/// All errors produced by freeq-core.
///
/// Backpressure (a full or empty ring) is never an error — push/pull report
/// it as a `bool`. Configuration mistakes (zero capacity, channel-count
/// mismatch) are programmer errors and assert instead: the two sides of a
/// duplex channel disagreeing about the shared layout is not recoverable.
#[derive(Debug, Error)]
pub enum FreeqError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("processor error: {0}")]
    Processor(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("worker thread exited before confirming startup")]
    WorkerStartup,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FreeqError>;
