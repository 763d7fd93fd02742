use std::io;

use thiserror::Error;

use crate::codec::ErrorCode;

/// Errors returned by the session engine.
#[derive(Debug, Error)]
pub enum Error {
    /// An id was inserted twice into a registry or table.
    #[error("duplicate id {0}")]
    DuplicateId(u64),
    /// An id was looked up, popped or removed but is not present.
    #[error("unknown id {0}")]
    UnknownId(u64),
    /// `restart` was called on a watchdog that is not armed.
    #[error("watchdog {0} is not armed")]
    NotArmed(u64),
    /// More bytes were provided than the buffer has free space for.
    #[error("buffer overflow: {requested} bytes provided, {available} free")]
    BufferOverflow { requested: usize, available: usize },
    /// More bytes were consumed than the buffer holds.
    #[error("buffer underflow: {requested} bytes consumed, {available} unread")]
    BufferUnderflow { requested: usize, available: usize },
    /// The recipient handle is not registered on the channel.
    #[error("recipient {0} is not registered")]
    UnknownRecipient(u64),
    /// Connection-scoped protocol violation reported by the codec.
    #[error("protocol error ({code:?}): {reason}")]
    Protocol { code: ErrorCode, reason: String },
    /// Stream-scoped protocol violation reported by the codec.
    #[error("stream {stream_id} error: {code:?}")]
    StreamError { stream_id: u32, code: ErrorCode },
    /// HPACK decoding failed.
    #[error("HPACK: {0}")]
    Hpack(String),
    /// The session is not in a state that accepts the operation.
    #[error("session is {0}")]
    InvalidState(&'static str),
    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn protocol(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            reason: reason.into(),
        }
    }

    /// HTTP/2 error code to report to the peer for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Protocol { code, .. } | Self::StreamError { code, .. } => *code,
            Self::Hpack(_) => ErrorCode::CompressionError,
            _ => ErrorCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Terminates the process after an invariant violation.
///
/// Duplicate ids, double removals and watchdog collisions signal a defect in
/// the session logic, not a peer or transport condition.
#[cold]
pub(crate) fn fatal(context: &str, err: &Error) -> ! {
    tracing::error!(error = %err, "invariant violated: {context}");
    std::process::abort()
}

/// Unwraps `result`, aborting the process on an invariant violation.
pub(crate) fn invariant<T>(context: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => fatal(context, &err),
    }
}
