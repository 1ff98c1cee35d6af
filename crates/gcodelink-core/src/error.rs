//! Error handling for gcodelink
//!
//! Provides error types for every layer of the driver:
//! - Connection errors (transport, bring-up)
//! - G-Code errors (parsing, program ingestion)
//! - Protocol errors (framing, retransmission)
//! - Driver errors (state machine guards)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents errors related to opening, using and losing the link to the device.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Port or baud rate missing or malformed
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost (end of stream, device gone)
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// The device never answered during bring-up
    #[error("Device did not come online after {attempts} empty reads")]
    BringUpTimeout {
        /// Consecutive empty reads observed before giving up.
        attempts: u32,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {reason}")]
    IoError {
        /// The reason for the I/O error.
        reason: String,
    },
}

/// G-Code error type
///
/// Represents errors related to parsing single lines and ingesting whole programs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcodeError {
    /// Nothing left after stripping comments and whitespace
    #[error("Empty line")]
    EmptyLine,

    /// Text does not match the instruction grammar
    #[error("Invalid line '{text}': {reason}")]
    InvalidLine {
        /// The offending text, normalized.
        text: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Input contained no valid instructions at all
    #[error("Program contains no valid G-code instructions")]
    EmptyProgram,

    /// Path missing, empty, or not a regular file
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was requested.
        path: String,
    },

    /// File exists but could not be read
    #[error("File error: {reason}")]
    FileError {
        /// The reason for the file error.
        reason: String,
    },
}

/// Protocol error type
///
/// Represents errors in building frames and servicing retransmission requests.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Line encodes to nothing once comments and whitespace are removed
    #[error("Refusing to transmit an empty frame")]
    EmptyFrame,

    /// Line cannot be represented in the configured character set
    #[error("Cannot encode '{text}' as {encoding}")]
    Encoding {
        /// The configured encoding name.
        encoding: String,
        /// The text that failed to encode.
        text: String,
    },

    /// Device asked for a frame that is no longer in the send window
    #[error("Resend requested for line {line_number}, which is outside the send window")]
    ResendOutOfWindow {
        /// The requested protocol line number.
        line_number: i64,
    },

    /// Resend requests never converged
    #[error("Gave up after {consecutive} consecutive resends")]
    ResendStorm {
        /// Number of resends performed without main-queue progress.
        consecutive: u32,
    },
}

/// Driver error type
///
/// Guards on the connection state machine. These are the failure indicators
/// returned by connect/print/pause/resume and the send operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// No session is open
    #[error("Printer not connected")]
    NotConnected,

    /// Connected but bring-up has not completed
    #[error("Printer is not online")]
    NotOnline,

    /// A print is already running
    #[error("A print is already in progress")]
    AlreadyPrinting,

    /// Pause requested while not printing
    #[error("Printer is not printing")]
    NotPrinting,

    /// Resume requested while not paused
    #[error("Printer is not paused")]
    NotPaused,

    /// Waited too long for the device to acknowledge
    #[error("Timed out after {timeout_ms}ms waiting for clear to send")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },
}

/// Main error type for gcodelink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// G-Code error
    #[error(transparent)]
    Gcode(#[from] GcodeError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Driver error
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Driver(DriverError::Timeout { .. })
                | Error::Connection(ConnectionError::BringUpTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a G-Code error
    pub fn is_gcode_error(&self) -> bool {
        matches!(self, Error::Gcode(_))
    }

    /// Errors that invalidate the whole session rather than a single line or command
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Io(_)
                | Error::Protocol(ProtocolError::ResendStorm { .. })
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
