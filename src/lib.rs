//! # gcodelink
//!
//! Host-side driver for streaming G-code to 3D printers and CNC machines
//! over a serial link, using line-numbered, checksummed frames with
//! acknowledgement-based flow control and resend handling.
//!
//! ## Architecture
//!
//! gcodelink is organized as a workspace with multiple crates:
//!
//! 1. **gcodelink-core** - Error types, units, observer hooks and events
//! 2. **gcodelink-gcode** - Line parser, program model and statistics
//! 3. **gcodelink-settings** - Configuration files (TOML/JSON)
//! 4. **gcodelink-communication** - Framing, response classification, transports, print driver
//! 5. **gcodelink** - Main binary that integrates all crates

pub use gcodelink_core::{
    ConnectionError, DriverError, DriverEvent, Error, GcodeError, Hook, Hooks, MeasurementSystem,
    Positioning, ProtocolError, Result,
};

pub use gcodelink_gcode::{
    Command, FileSource, Line, Multipliers, Offset, Program, ProgramCursor, ProgramSource,
    ProgramStats,
};

pub use gcodelink_settings::{
    Config, ConnectionSettings, ProtocolSettings, ResponseVocabulary, SettingsError, WireEncoding,
};

pub use gcodelink_communication::{
    checksum, frame, list_ports, ConnectionState, MemoryConnector, PrintProgress, Printer,
    ResponseClassifier, ResponseKind, SerialConnector, SerialPortInfo,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Honours `RUST_LOG`; defaults to `info`.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}
