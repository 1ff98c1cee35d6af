//! Configuration for the gcodelink driver
//!
//! Configuration is organized into logical sections:
//! - Connection settings (port, baud rate, read timeout)
//! - Protocol settings (encoding, timing, bring-up, resend window)
//! - Response vocabulary (the marker tokens a firmware dialect uses)
//! - Multipliers and low-power mode for streaming
//!
//! Every section falls back to its defaults when omitted from a file.

use crate::error::{SettingsError, SettingsResult};
pub use gcodelink_gcode::Multipliers;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Character set frames are encoded in on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEncoding {
    /// 7-bit ASCII; anything else is rejected
    #[default]
    Ascii,
    /// UTF-8
    Utf8,
}

impl fmt::Display for WireEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascii => write!(f, "ascii"),
            Self::Utf8 => write!(f, "utf8"),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port path; must be supplied before connecting
    pub port: Option<String>,
    /// Baud rate; must be supplied before connecting
    pub baud_rate: Option<u32>,
    /// Read timeout in milliseconds, bounds how fast the listener sees a stop
    pub read_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: None,
            read_timeout_ms: 100,
        }
    }
}

impl ConnectionSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Protocol timing and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Wire character set
    pub encoding: WireEncoding,
    /// Sender's wait slice while blocked on clear to send, in milliseconds
    pub sleep_interval_ms: u64,
    /// Upper bound on waiting for clear to send outside a print, in milliseconds
    pub ack_timeout_ms: u64,
    /// Consecutive empty reads tolerated during bring-up
    pub bring_up_attempts: u32,
    /// Delay between bring-up queries, in milliseconds
    pub bring_up_interval_ms: u64,
    /// Query sent while waiting for the device to come online
    pub bring_up_query: String,
    /// Number of sent frames retained for resend requests
    pub resend_window: usize,
    /// Give up after this many resends without main-queue progress
    pub max_consecutive_resends: Option<u32>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            encoding: WireEncoding::Ascii,
            sleep_interval_ms: 10,
            ack_timeout_ms: 10_000,
            bring_up_attempts: 5,
            bring_up_interval_ms: 250,
            bring_up_query: "M105".to_string(),
            resend_window: 512,
            max_consecutive_resends: None,
        }
    }
}

impl ProtocolSettings {
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn bring_up_interval(&self) -> Duration {
        Duration::from_millis(self.bring_up_interval_ms)
    }
}

/// Marker tokens used to classify device responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseVocabulary {
    /// Contained in error lines
    pub error: Vec<String>,
    /// Contained in debug lines
    pub debug: Vec<String>,
    /// Prefixes of greeting lines
    pub online: Vec<String>,
    /// Prefixes of acknowledgements
    pub good: Vec<String>,
    /// Contained in temperature lines
    pub temperature: Vec<String>,
    /// Prefixes of resend requests, matched case-insensitively
    pub resend: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ResponseVocabulary {
    fn default() -> Self {
        Self {
            error: strings(&["Error"]),
            debug: strings(&["DEBUG_"]),
            online: strings(&["start", "Grbl "]),
            good: strings(&["ok"]),
            temperature: strings(&["T:"]),
            resend: strings(&["rs", "resend"]),
        }
    }
}

impl ResponseVocabulary {
    fn sections(&self) -> [(&'static str, &Vec<String>); 6] {
        [
            ("responses.error", &self.error),
            ("responses.debug", &self.debug),
            ("responses.online", &self.online),
            ("responses.good", &self.good),
            ("responses.temperature", &self.temperature),
            ("responses.resend", &self.resend),
        ]
    }
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stream files lazily and skip layer and multiplier bookkeeping
    pub low_power: bool,
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Protocol settings
    pub protocol: ProtocolSettings,
    /// Response vocabulary
    pub responses: ResponseVocabulary,
    /// Multipliers applied to streamed lines
    pub multipliers: Multipliers,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(SettingsError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Config with port and baud rate filled in
    pub fn for_port(port: impl Into<String>, baud_rate: u32) -> Self {
        let mut config = Self::default();
        config.connection.port = Some(port.into());
        config.connection.baud_rate = Some(baud_rate);
        config
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content).map_err(|e| {
            SettingsError::SaveError(format!("{}: {}", path.display(), e))
        })?;

        Ok(())
    }

    /// Validate configuration
    ///
    /// Port and baud rate may be absent here; they are checked at connect time.
    pub fn validate(&self) -> SettingsResult<()> {
        if let Some(port) = &self.connection.port {
            if port.trim().is_empty() {
                return Err(SettingsError::invalid("connection.port", "must not be empty"));
            }
        }
        if self.connection.baud_rate == Some(0) {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if self.connection.read_timeout_ms == 0 {
            return Err(SettingsError::invalid("connection.read_timeout_ms", "must be > 0"));
        }

        if self.protocol.sleep_interval_ms == 0 {
            return Err(SettingsError::invalid("protocol.sleep_interval_ms", "must be > 0"));
        }
        if self.protocol.ack_timeout_ms == 0 {
            return Err(SettingsError::invalid("protocol.ack_timeout_ms", "must be > 0"));
        }
        if self.protocol.bring_up_attempts == 0 {
            return Err(SettingsError::invalid("protocol.bring_up_attempts", "must be > 0"));
        }
        if self.protocol.bring_up_query.trim().is_empty() {
            return Err(SettingsError::invalid("protocol.bring_up_query", "must not be empty"));
        }
        if self.protocol.resend_window == 0 {
            return Err(SettingsError::invalid("protocol.resend_window", "must be > 0"));
        }
        if self.protocol.max_consecutive_resends == Some(0) {
            return Err(SettingsError::invalid(
                "protocol.max_consecutive_resends",
                "must be > 0 when set",
            ));
        }

        for (key, markers) in self.responses.sections() {
            if markers.is_empty() {
                return Err(SettingsError::invalid(key, "needs at least one marker"));
            }
            if markers.iter().any(|m| m.is_empty()) {
                return Err(SettingsError::invalid(key, "markers must not be empty"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.read_timeout_ms, 100);
        assert_eq!(config.protocol.bring_up_attempts, 5);
        assert_eq!(config.protocol.resend_window, 512);
        assert_eq!(config.responses.resend, vec!["rs", "resend"]);
        assert!(config.multipliers.is_empty());
        assert!(!config.low_power);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_marker() {
        let mut config = Config::default();
        config.responses.good.push(String::new());
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { key, .. }) if key == "responses.good"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_baud() {
        let config = Config::for_port("/dev/ttyUSB0", 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_format() {
        let result = Config::default().save_to_file(Path::new("config.yaml"));
        assert!(matches!(result, Err(SettingsError::UnsupportedFormat(_))));
    }
}
