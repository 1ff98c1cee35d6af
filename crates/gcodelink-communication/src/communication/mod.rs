//! Transport abstraction
//!
//! The driver only needs a line reader with a timeout and a byte writer.
//! A [`Connector`] opens both halves for a set of [`ConnectionParams`].

pub mod memory;
pub mod serial;

use gcodelink_core::{ConnectionError, Result};
use gcodelink_settings::ConnectionSettings;
use std::time::Duration;

/// Result of one bounded read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, without its terminator
    Line(String),
    /// Nothing arrived within the read timeout
    Timeout,
    /// The device went away
    Closed,
}

/// Receiving half of a transport
pub trait TransportReader: Send {
    /// Block for at most the read timeout and return one line.
    fn read_line(&mut self) -> Result<ReadOutcome>;
}

/// Sending half of a transport
pub trait TransportWriter: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flush and release the handle. Further writes fail.
    fn close(&mut self) -> Result<()>;
}

/// Opens transports
pub trait Connector: Send + Sync {
    fn open(
        &self,
        params: &ConnectionParams,
    ) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)>;
}

/// Resolved parameters for opening a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl ConnectionParams {
    /// Both port and baud rate must be present.
    pub fn from_settings(settings: &ConnectionSettings) -> Result<Self> {
        let port = settings
            .port
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConnectionError::InvalidParameters {
                reason: "serial port not set".to_string(),
            })?;
        let baud_rate = settings
            .baud_rate
            .filter(|b| *b > 0)
            .ok_or_else(|| ConnectionError::InvalidParameters {
                reason: "baud rate not set".to_string(),
            })?;
        Ok(Self {
            port: port.to_string(),
            baud_rate,
            read_timeout: settings.read_timeout(),
        })
    }
}
