//! Custom error types for the application.
//!
//! Two layers of errors exist:
//!
//! - **`FinsError`**: faults raised by the protocol client and its transports. These never
//!   cross the [`PlcConnector`](crate::hardware::PlcConnector) boundary; the connector folds
//!   them into `None`/`false` returns and a log record so the polling loop never has to
//!   handle them per call.
//! - **`DaqError`**: the application-level error. It wraps configuration, I/O, CSV and
//!   protocol failures so that the CLI and the composition root can use `?` throughout.
//!
//! ## Error Hierarchy
//!
//! - **`Timeout`**: no reply datagram arrived within the configured timeout.
//! - **`MalformedResponse`**: a reply arrived but is shorter than the offset the decoder
//!   needs. Callers treat it exactly like a timeout.
//! - **`Transport`**: socket-level failure (bind, send, receive).
//! - **`Storage`**: a temperature log sink could not be created, written or closed.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors produced by the FINS protocol client and its transports.
#[derive(Error, Debug)]
pub enum FinsError {
    /// No reply datagram arrived in time.
    #[error("No reply from {endpoint} within {timeout:?}")]
    Timeout {
        /// Remote end that stayed silent
        endpoint: String,
        /// Reply timeout that expired
        timeout: Duration,
    },

    /// The reply is too short for the requested decode.
    #[error("Malformed response: expected at least {expected} bytes, got {actual}")]
    MalformedResponse {
        /// Minimum length the decoder needs
        expected: usize,
        /// Length actually received
        actual: usize,
    },

    /// Socket-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A request was attempted with no open connection.
    #[error("PLC not connected")]
    NotConnected,
}

impl FinsError {
    /// Whether the failure means "no usable reply" (timeout or truncated datagram).
    ///
    /// Both cases are soft failures: the caller substitutes a default and carries on.
    pub fn is_no_reply(&self) -> bool {
        matches!(
            self,
            FinsError::Timeout { .. } | FinsError::MalformedResponse { .. }
        )
    }
}

/// Application-level error.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// FINS failure surfaced outside the connector (CLI one-shots).
    #[error("Protocol error: {0}")]
    Protocol(#[from] FinsError),

    /// A temperature log could not be created, written or closed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed or unreadable CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The monitor task has already exited.
    #[error("Monitor is not running")]
    MonitorStopped,
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}
