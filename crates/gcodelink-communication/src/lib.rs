//! # gcodelink communication
//!
//! Everything between a parsed program and the device: checksum framing,
//! response classification, transports (serial and in-memory), and the
//! [`Printer`] driver with its listener and send engine threads.

pub mod communication;
pub mod driver;
pub mod framing;
pub mod response;

pub use communication::{
    memory::{DeviceEnd, MemoryConnector},
    serial::{list_ports, SerialConnector, SerialPortInfo},
    ConnectionParams, Connector, ReadOutcome, TransportReader, TransportWriter,
};
pub use driver::{ConnectionState, PrintProgress, Printer};
pub use framing::{checksum, format_for_wire, frame, strip_comment};
pub use response::{ResponseClassifier, ResponseKind};
