//! Unit conversion utilities
//!
//! Handles the measurement system (G20/G21) and positioning mode (G90/G91)
//! a G-code line is interpreted under, and normalizes lengths to millimetres.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimetres per inch.
pub const MM_PER_INCH: f64 = 25.4;

/// Measurement system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementSystem {
    /// Metric system (mm), selected by G21
    #[default]
    Metric,
    /// Imperial system (inches), selected by G20
    Imperial,
}

impl fmt::Display for MeasurementSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "Metric"),
            Self::Imperial => write!(f, "Imperial"),
        }
    }
}

impl FromStr for MeasurementSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metric" | "mm" => Ok(Self::Metric),
            "imperial" | "inch" | "in" => Ok(Self::Imperial),
            _ => Err(format!("Unknown measurement system: {}", s)),
        }
    }
}

/// Coordinate interpretation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Positioning {
    /// Coordinates are positions (G90)
    #[default]
    Absolute,
    /// Coordinates are deltas from the current position (G91)
    Relative,
}

impl fmt::Display for Positioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute => write!(f, "Absolute"),
            Self::Relative => write!(f, "Relative"),
        }
    }
}

/// Convert a length expressed in `system` units to millimetres.
pub fn to_native_length(value: f64, system: MeasurementSystem) -> f64 {
    match system {
        MeasurementSystem::Metric => value,
        MeasurementSystem::Imperial => value * MM_PER_INCH,
    }
}

/// Convert a length in millimetres to `system` units.
pub fn from_native_length(value_mm: f64, system: MeasurementSystem) -> f64 {
    match system {
        MeasurementSystem::Metric => value_mm,
        MeasurementSystem::Imperial => value_mm / MM_PER_INCH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_native_length() {
        assert_eq!(to_native_length(10.0, MeasurementSystem::Metric), 10.0);
        assert!((to_native_length(1.0, MeasurementSystem::Imperial) - 25.4).abs() < 1e-9);
        assert!((from_native_length(25.4, MeasurementSystem::Imperial) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_measurement_system_parse() {
        assert_eq!("mm".parse::<MeasurementSystem>(), Ok(MeasurementSystem::Metric));
        assert_eq!("Inch".parse::<MeasurementSystem>(), Ok(MeasurementSystem::Imperial));
        assert!("furlong".parse::<MeasurementSystem>().is_err());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(MeasurementSystem::default(), MeasurementSystem::Metric);
        assert_eq!(Positioning::default(), Positioning::Absolute);
    }
}
