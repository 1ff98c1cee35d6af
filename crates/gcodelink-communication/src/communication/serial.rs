//! Serial port transport
//!
//! Opens the device with the `serialport` crate. The reader and writer are
//! two handles of the same port (`try_clone`), so the listener thread can
//! block on reads while the sender writes.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Line assembly over short, timed reads

use super::{ConnectionParams, Connector, ReadOutcome, TransportReader, TransportWriter};
use gcodelink_core::{ConnectionError, Error, Result};
use std::io::{self, Read, Write};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,
}

/// List serial ports that look like printer controllers
///
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::SerialError {
            reason: format!("Failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_printer_port(&port.port_name))
        .map(|port| {
            let (description, manufacturer) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => (
                    format!(
                        "USB {} {}",
                        usb.manufacturer.as_deref().unwrap_or("Device"),
                        usb.product.as_deref().unwrap_or("Serial Port")
                    ),
                    usb.manufacturer.clone(),
                ),
                serialport::SerialPortType::BluetoothPort => ("Bluetooth Serial".to_string(), None),
                serialport::SerialPortType::PciPort => ("PCI Serial".to_string(), None),
                _ => ("Serial Port".to_string(), None),
            };
            SerialPortInfo {
                port_name: port.port_name.clone(),
                description,
                manufacturer,
            }
        })
        .collect())
}

fn is_printer_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }
    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

/// Opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(
        &self,
        params: &ConnectionParams,
    ) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(params.read_timeout)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                ConnectionError::FailedToOpen {
                    port: params.port.clone(),
                    reason: e.to_string(),
                }
            })?;
        let writer = port.try_clone().map_err(|e| ConnectionError::FailedToOpen {
            port: params.port.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!("Opened {} at {} baud", params.port, params.baud_rate);
        Ok((
            Box::new(SerialLineReader {
                port,
                pending: Vec::new(),
            }),
            Box::new(SerialWriter { port: Some(writer) }),
        ))
    }
}

/// Longest run of bytes without a newline kept before it is handed out as a line
const MAX_PENDING: usize = 4096;

struct SerialLineReader<R = Box<dyn serialport::SerialPort>> {
    port: R,
    pending: Vec<u8>,
}

impl<R> SerialLineReader<R> {
    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        Some(decode(&raw))
    }

    fn take_overflow(&mut self) -> Option<String> {
        if self.pending.len() < MAX_PENDING {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        tracing::warn!("No line break in {} bytes, passing them on as one line", raw.len());
        Some(decode(&raw))
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

impl<R: Read + Send> TransportReader for SerialLineReader<R> {
    /// At most one port read per call, so the caller regains control
    /// even while bytes keep arriving without a newline.
    fn read_line(&mut self) -> Result<ReadOutcome> {
        if let Some(line) = self.take_line() {
            return Ok(ReadOutcome::Line(line));
        }
        let mut buf = [0u8; 256];
        match self.port.read(&mut buf) {
            Ok(0) => return Ok(ReadOutcome::Closed),
            Ok(n) => self.pending.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(ReadOutcome::Timeout),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(ConnectionError::ConnectionLost {
                    reason: e.to_string(),
                }
                .into())
            }
        }
        Ok(self
            .take_line()
            .or_else(|| self.take_overflow())
            .map_or(ReadOutcome::Timeout, ReadOutcome::Line))
    }
}

struct SerialWriter {
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl TransportWriter for SerialWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| ConnectionError::ConnectionLost {
            reason: "port closed".to_string(),
        })?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| Error::from(ConnectionError::IoError {
                reason: e.to_string(),
            }))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            port.flush().map_err(|e| ConnectionError::IoError {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_printer_port() {
        assert!(is_printer_port("COM3"));
        assert!(!is_printer_port("COM"));
        assert!(!is_printer_port("COMX"));
        assert!(is_printer_port("/dev/ttyACM0"));
        assert!(is_printer_port("/dev/cu.usbmodem1421"));
        assert!(!is_printer_port("/dev/ttyS0"));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let params = ConnectionParams {
            port: "/dev/gcodelink-does-not-exist".to_string(),
            baud_rate: 115_200,
            read_timeout: std::time::Duration::from_millis(10),
        };
        assert!(matches!(
            SerialConnector.open(&params),
            Err(Error::Connection(ConnectionError::FailedToOpen { .. }))
        ));
    }

    /// Replays fixed chunks, then times out
    struct Chunks(std::collections::VecDeque<&'static [u8]>);

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                None => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    /// Endless bytes with no line break
    struct Noise;

    impl Read for Noise {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(b'x');
            Ok(buf.len())
        }
    }

    fn reader<R>(port: R) -> SerialLineReader<R> {
        SerialLineReader {
            port,
            pending: Vec::new(),
        }
    }

    #[test]
    fn test_lines_split_across_reads() {
        let mut reader = reader(Chunks(
            vec![&b"ok\r\nT:2"[..], &b"00 /200\n"[..]].into(),
        ));
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Line("ok".to_string()));
        assert_eq!(
            reader.read_line().unwrap(),
            ReadOutcome::Line("T:200 /200".to_string())
        );
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Timeout);
    }

    #[test]
    fn test_unterminated_noise_is_bounded() {
        let mut reader = reader(Noise);
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Timeout);

        let mut calls = 1;
        let line = loop {
            calls += 1;
            if let ReadOutcome::Line(line) = reader.read_line().unwrap() {
                break line;
            }
            assert!(calls <= MAX_PENDING, "reader never yielded");
        };
        assert_eq!(line.len(), MAX_PENDING);
        assert!(reader.pending.is_empty());
    }
}
