use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Subscription setup failed during {operation}: {source}")]
    Setup {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Malformed record: event length {event_len} is shorter than metadata length {metadata_len}")]
    Malformed { event_len: u32, metadata_len: u16 },

    #[error("Unsupported record version: {0}")]
    UnsupportedVersion(u8),

    #[error("Event stream closed")]
    StreamClosed,

    #[error("File handle out of bounds: handle ends at byte {end}, information block holds {available}")]
    HandleBounds { end: usize, available: usize },

    #[error("Resolution failed during {operation}: {source}")]
    Resolve {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Change consumer disconnected")]
    ConsumerGone,
}

impl DriverError {
    /// True when the byte stream can no longer be trusted, or has ended,
    /// and the listener loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Setup { .. }
                | DriverError::Framing(_)
                | DriverError::Malformed { .. }
                | DriverError::StreamClosed
                | DriverError::ConsumerGone
                | DriverError::Io(_)
        )
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
