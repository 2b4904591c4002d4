use serde::Serialize;
use thiserror::Error;

/// Errors raised by the SolarMax protocol engine.
///
/// Frame-level variants abort a single response; they never tear the
/// connection down on their own. `Connection` and `Timeout` are what drives
/// the recovery cascade in the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("checksum mismatch - got {found}, expected {expected}")]
    ChecksumMismatch { expected: String, found: String },

    #[error("length mismatch - header says {declared}, frame is {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("no reply from inverter {0}")]
    Timeout(u8),
}

impl Error {
    /// True for errors caused by the bytes received rather than the transport.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedFrame(_)
                | Error::ChecksumMismatch { .. }
                | Error::LengthMismatch { .. }
                | Error::Protocol(_)
                | Error::UnknownField(_)
        )
    }
}

/// A single field failed to normalize. Reported next to the values that did.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("cannot normalize {field}={raw:?}: {reason}")]
pub struct NormalizeError {
    pub field: String,
    pub raw: String,
    pub reason: String,
}
