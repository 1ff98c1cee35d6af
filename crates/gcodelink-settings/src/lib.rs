//! # gcodelink settings
//!
//! Driver configuration: connection parameters, protocol timing, the
//! firmware response vocabulary, multipliers and low-power mode. Loaded from
//! and saved to TOML or JSON.

pub mod config;
pub mod error;

pub use config::{
    Config, ConnectionSettings, ProtocolSettings, ResponseVocabulary, WireEncoding,
};
pub use error::{SettingsError, SettingsResult};
