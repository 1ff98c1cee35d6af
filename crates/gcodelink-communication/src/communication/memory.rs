//! In-process transport over `crossbeam-channel`.
//!
//! Each [`Connector::open`] creates a fresh pair of line channels and hands
//! the device side ([`DeviceEnd`]) to whoever holds the receiver returned by
//! [`MemoryConnector::pair`]. Used to emulate firmware in tests and demos.

use super::{ConnectionParams, Connector, ReadOutcome, TransportReader, TransportWriter};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use gcodelink_core::{ConnectionError, Result};
use std::time::Duration;

/// Device side of an in-memory connection
#[derive(Debug)]
pub struct DeviceEnd {
    /// Lines written by the host, without terminators
    pub from_host: Receiver<String>,
    /// Lines the device sends back
    pub to_host: Sender<String>,
}

/// Connector producing in-memory transports
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    devices: Sender<DeviceEnd>,
}

impl MemoryConnector {
    /// Connector plus the stream of device ends, one per `open`
    pub fn pair() -> (Self, Receiver<DeviceEnd>) {
        let (devices, rx) = unbounded();
        (Self { devices }, rx)
    }
}

impl Connector for MemoryConnector {
    fn open(
        &self,
        params: &ConnectionParams,
    ) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let (host_tx, device_rx) = unbounded();
        let (device_tx, host_rx) = unbounded();
        self.devices
            .send(DeviceEnd {
                from_host: device_rx,
                to_host: device_tx,
            })
            .map_err(|_| ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: "no device attached".to_string(),
            })?;

        Ok((
            Box::new(MemoryReader {
                rx: host_rx,
                timeout: params.read_timeout,
            }),
            Box::new(MemoryWriter { tx: Some(host_tx) }),
        ))
    }
}

struct MemoryReader {
    rx: Receiver<String>,
    timeout: Duration,
}

impl TransportReader for MemoryReader {
    fn read_line(&mut self) -> Result<ReadOutcome> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadOutcome::Closed),
        }
    }
}

struct MemoryWriter {
    tx: Option<Sender<String>>,
}

impl TransportWriter for MemoryWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| ConnectionError::ConnectionLost {
            reason: "transport closed".to_string(),
        })?;
        let text = String::from_utf8_lossy(bytes);
        tx.send(text.trim_end_matches(['\r', '\n']).to_string())
            .map_err(|_| ConnectionError::ConnectionLost {
                reason: "device hung up".to_string(),
            })?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams {
            port: "memory".to_string(),
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_lines_flow_both_ways() {
        let (connector, devices) = MemoryConnector::pair();
        let (mut reader, mut writer) = connector.open(&params()).unwrap();
        let device = devices.try_recv().unwrap();

        writer.write_all(b"M105\n").unwrap();
        assert_eq!(device.from_host.recv().unwrap(), "M105");

        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Timeout);
        device.to_host.send("ok T:20".to_string()).unwrap();
        assert_eq!(
            reader.read_line().unwrap(),
            ReadOutcome::Line("ok T:20".to_string())
        );

        drop(device);
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Closed);
        assert!(writer.write_all(b"G28\n").is_err());
    }

    #[test]
    fn test_open_without_device_side_fails() {
        let (connector, devices) = MemoryConnector::pair();
        drop(devices);
        assert!(connector.open(&params()).is_err());
    }
}
