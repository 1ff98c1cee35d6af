//! Response classification
//!
//! Every line the device sends is sorted into one [`ResponseKind`]. The
//! marker tokens come from [`ResponseVocabulary`] so different firmware
//! dialects can be supported without code changes.

use gcodelink_settings::ResponseVocabulary;
use std::fmt;

/// Kinds of device response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Unreadable or unrecognized
    Invalid,
    /// Device reported an error
    Error,
    /// Debug output
    Debug,
    /// Greeting after reset
    Online,
    /// Unsolicited temperature report
    TemperatureReport,
    /// Acknowledgement that also carries temperatures
    TemperatureAck,
    /// Plain acknowledgement
    Acknowledged,
    /// Retransmission request
    ResendRequest,
}

impl ResponseKind {
    /// Whether this response hands back the clear-to-send token
    pub fn clears_to_send(&self) -> bool {
        matches!(
            self,
            Self::Acknowledged | Self::TemperatureAck | Self::ResendRequest | Self::Online
        )
    }

    /// Whether this response proves the device is online during bring-up
    pub fn brings_online(&self) -> bool {
        matches!(
            self,
            Self::Online | Self::TemperatureReport | Self::Acknowledged | Self::TemperatureAck
        )
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::Error => "error",
            Self::Debug => "debug",
            Self::Online => "online",
            Self::TemperatureReport => "temperature report",
            Self::TemperatureAck => "temperature ack",
            Self::Acknowledged => "ok",
            Self::ResendRequest => "resend",
        };
        write!(f, "{}", name)
    }
}

/// Classifies device lines against a marker vocabulary
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    vocabulary: ResponseVocabulary,
    resend_lower: Vec<String>,
}

fn contains_any(line: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| line.contains(m.as_str()))
}

fn starts_with_any(line: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| line.starts_with(m.as_str()))
}

impl ResponseClassifier {
    pub fn new(vocabulary: ResponseVocabulary) -> Self {
        let resend_lower = vocabulary
            .resend
            .iter()
            .map(|m| m.to_ascii_lowercase())
            .collect();
        Self {
            vocabulary,
            resend_lower,
        }
    }

    pub fn vocabulary(&self) -> &ResponseVocabulary {
        &self.vocabulary
    }

    /// Classify one received line; `None` stands for a failed read.
    ///
    /// The first matching rule wins: error, debug, online greeting,
    /// acknowledgement (with or without temperatures), temperature report,
    /// resend request.
    pub fn classify(&self, line: Option<&str>) -> ResponseKind {
        let Some(line) = line else {
            return ResponseKind::Invalid;
        };
        let v = &self.vocabulary;

        if contains_any(line, &v.error) {
            return ResponseKind::Error;
        }
        if contains_any(line, &v.debug) {
            return ResponseKind::Debug;
        }
        if starts_with_any(line, &v.online) {
            return ResponseKind::Online;
        }
        let has_temperature = contains_any(line, &v.temperature);
        if starts_with_any(line, &v.good) {
            return if has_temperature {
                ResponseKind::TemperatureAck
            } else {
                ResponseKind::Acknowledged
            };
        }
        if has_temperature {
            return ResponseKind::TemperatureReport;
        }
        if self.resend_prefix_len(line).is_some() {
            return ResponseKind::ResendRequest;
        }
        ResponseKind::Invalid
    }

    /// Length of the longest resend marker `line` starts with, ignoring case
    fn resend_prefix_len(&self, line: &str) -> Option<usize> {
        let lower = line.to_ascii_lowercase();
        self.resend_lower
            .iter()
            .filter(|m| lower.starts_with(m.as_str()))
            .map(|m| m.len())
            .max()
    }

    /// Line number requested by a resend line.
    ///
    /// Accepts `rs 5`, `Resend: 5`, `rs N5`, `rs N:5` and similar.
    pub fn extract_resend_line_number(&self, line: &str) -> Option<i64> {
        let prefix = self.resend_prefix_len(line)?;
        let rest = line.get(prefix..)?.trim_start_matches(|c: char| {
            c == ':' || c == 'N' || c == 'n' || c.is_whitespace()
        });
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..digits_end].parse().ok()
    }
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new(ResponseVocabulary::default())
    }
}
