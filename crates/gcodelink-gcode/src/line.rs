//! Single G-code instruction parsing and serialization.
//!
//! A [`Line`] is parsed from raw text: the comment is cut off at `;`, the
//! rest is upper-cased and trimmed, then tokenized into letter/number words.
//! The first word must be a `G`, `M` or `T` command with 1-3 digits. `X`,
//! `Y`, `Z`, `E`, `F`, `S` and `P` become typed fields; any other word is
//! carried verbatim so re-serialization does not lose it.

use crate::codes::{Command, CommandLetter, COMMENT_SYMBOL};
use gcodelink_core::{
    to_native_length, GcodeError, MeasurementSystem, Positioning, Result,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Per-line multipliers applied when a line is serialized for transmission
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Multipliers {
    /// Feed rate multiplier for extrusion moves
    pub speed: Option<f64>,
    /// E multiplier
    pub extrusion: Option<f64>,
    /// Feed rate multiplier for travel moves
    pub travel: Option<f64>,
}

impl Multipliers {
    /// A multiplier only counts when it is present, finite and positive.
    pub fn valid(value: Option<f64>) -> Option<f64> {
        value.filter(|m| m.is_finite() && *m > 0.0)
    }

    /// True when no multiplier would change anything
    pub fn is_empty(&self) -> bool {
        Self::valid(self.speed).is_none()
            && Self::valid(self.extrusion).is_none()
            && Self::valid(self.travel).is_none()
    }
}

/// One parsed instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub(crate) text: String,
    pub(crate) command: Command,
    pub(crate) x: Option<f64>,
    pub(crate) y: Option<f64>,
    pub(crate) z: Option<f64>,
    pub(crate) e: Option<f64>,
    pub(crate) f: Option<f64>,
    pub(crate) s: Option<f64>,
    pub(crate) p: Option<f64>,
    pub(crate) extra: Vec<String>,
    pub(crate) comment: Option<String>,
    pub(crate) units: MeasurementSystem,
    pub(crate) positioning: Positioning,
    multipliers: Multipliers,
}

fn word_regex() -> &'static Regex {
    static WORD_REGEX: OnceLock<Regex> = OnceLock::new();
    WORD_REGEX.get_or_init(|| {
        Regex::new(r"([A-Z])([+-]?(?:\d+(?:\.\d*)?|\.\d+))").expect("invalid regex pattern")
    })
}

fn command_regex() -> &'static Regex {
    static COMMAND_REGEX: OnceLock<Regex> = OnceLock::new();
    COMMAND_REGEX.get_or_init(|| Regex::new(r"^[GMT]\d{1,3}$").expect("invalid regex pattern"))
}

fn invalid(text: &str, reason: impl Into<String>) -> GcodeError {
    GcodeError::InvalidLine {
        text: text.to_string(),
        reason: reason.into(),
    }
}

impl Line {
    /// Parse one raw line of text.
    ///
    /// Returns [`GcodeError::EmptyLine`] for blank and comment-only input and
    /// [`GcodeError::InvalidLine`] for anything that does not fit the grammar.
    pub fn parse(raw: &str) -> Result<Line> {
        Ok(Self::parse_line(raw)?)
    }

    fn parse_line(raw: &str) -> std::result::Result<Line, GcodeError> {
        let (code, comment) = match raw.split_once(COMMENT_SYMBOL) {
            Some((code, comment)) => {
                let comment = comment.trim();
                (code, (!comment.is_empty()).then(|| comment.to_string()))
            }
            None => (raw, None),
        };

        let text = code.trim().to_uppercase();
        if text.is_empty() {
            return Err(GcodeError::EmptyLine);
        }

        let mut line = Line {
            text: String::new(),
            command: Command::RAPID_MOVE,
            x: None,
            y: None,
            z: None,
            e: None,
            f: None,
            s: None,
            p: None,
            extra: Vec::new(),
            comment,
            units: MeasurementSystem::default(),
            positioning: Positioning::default(),
            multipliers: Multipliers::default(),
        };

        let mut last_end = 0;
        let mut first = true;
        for caps in word_regex().captures_iter(&text) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            if !text[last_end..whole.start()].trim().is_empty() {
                return Err(invalid(&text, "unexpected characters"));
            }
            last_end = whole.end();

            let word = whole.as_str();
            let letter = word.chars().next().unwrap_or_default();
            let value = &word[1..];

            if first {
                first = false;
                if !command_regex().is_match(word) {
                    return Err(invalid(&text, format!("'{}' is not a command", word)));
                }
                let number = value
                    .parse::<u16>()
                    .map_err(|_| invalid(&text, "bad command number"))?;
                let letter = CommandLetter::from_char(letter)
                    .ok_or_else(|| invalid(&text, "bad command letter"))?;
                line.command = Command::new(letter, number);
                continue;
            }

            let slot = match letter {
                'X' => &mut line.x,
                'Y' => &mut line.y,
                'Z' => &mut line.z,
                'E' => &mut line.e,
                'F' => &mut line.f,
                'S' => &mut line.s,
                'P' => &mut line.p,
                _ => {
                    line.extra.push(word.to_string());
                    continue;
                }
            };
            if slot.is_some() {
                return Err(invalid(&text, format!("duplicate {} word", letter)));
            }
            let parsed = value
                .parse::<f64>()
                .map_err(|_| invalid(&text, format!("bad number in {}", word)))?;
            *slot = Some(parsed);
        }

        if first {
            return Err(invalid(&text, "no command word"));
        }
        if !text[last_end..].trim().is_empty() {
            return Err(invalid(&text, "unexpected trailing characters"));
        }

        line.text = text;
        Ok(line)
    }

    /// Normalized text: no comment, upper-case, trimmed.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn x(&self) -> Option<f64> {
        self.x
    }

    pub fn y(&self) -> Option<f64> {
        self.y
    }

    pub fn z(&self) -> Option<f64> {
        self.z
    }

    pub fn e(&self) -> Option<f64> {
        self.e
    }

    pub fn f(&self) -> Option<f64> {
        self.f
    }

    pub fn s(&self) -> Option<f64> {
        self.s
    }

    pub fn p(&self) -> Option<f64> {
        self.p
    }

    /// Words other than the typed fields, in input order
    pub fn extra_words(&self) -> &[String] {
        &self.extra
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Tool selected by a `T` command
    pub fn tool(&self) -> Option<u32> {
        self.command.tool()
    }

    /// Unit mode inherited from the program (metric unless a G20 preceded it)
    pub fn units(&self) -> MeasurementSystem {
        self.units
    }

    /// Positioning mode inherited from the program
    pub fn positioning(&self) -> Positioning {
        self.positioning
    }

    pub fn multipliers(&self) -> Multipliers {
        self.multipliers
    }

    pub fn set_multipliers(&mut self, multipliers: Multipliers) {
        self.multipliers = multipliers;
    }

    /// Rapid or controlled move
    pub fn is_move(&self) -> bool {
        self.command.is_move()
    }

    /// Move without an E word
    pub fn is_travel_move(&self) -> bool {
        self.is_move() && self.e.is_none()
    }

    /// Move with a positive E word
    pub fn is_extrusion_move(&self) -> bool {
        self.is_move() && self.e.is_some_and(|e| e > 0.0)
    }

    /// Home with no axis named
    pub fn is_full_home(&self) -> bool {
        self.command == Command::HOME && self.x.is_none() && self.y.is_none() && self.z.is_none()
    }

    /// Convert a length in this line's units to millimetres
    pub fn to_native_length(&self, value: f64) -> f64 {
        to_native_length(value, self.units)
    }

    pub fn native_x(&self) -> Option<f64> {
        self.x.map(|v| self.to_native_length(v))
    }

    pub fn native_y(&self) -> Option<f64> {
        self.y.map(|v| self.to_native_length(v))
    }

    pub fn native_z(&self) -> Option<f64> {
        self.z.map(|v| self.to_native_length(v))
    }

    pub fn native_e(&self) -> Option<f64> {
        self.e.map(|v| self.to_native_length(v))
    }

    /// Serialize for transmission, applying any valid multipliers.
    ///
    /// Without multipliers this is the normalized text unchanged.
    pub fn to_gcode(&self) -> String {
        if self.multipliers.is_empty() {
            return self.text.clone();
        }

        let f = self.f.map(|f| {
            let factor = if self.is_travel_move() {
                Multipliers::valid(self.multipliers.travel)
            } else if self.is_extrusion_move() {
                Multipliers::valid(self.multipliers.speed)
            } else {
                None
            };
            factor.map_or(f, |m| f * m)
        });
        let e = self
            .e
            .map(|e| Multipliers::valid(self.multipliers.extrusion).map_or(e, |m| e * m));

        self.render(f, e)
    }

    /// Rebuild `text` from the current field values.
    pub(crate) fn refresh_text(&mut self) {
        self.text = self.render(self.f, self.e);
    }

    fn render(&self, f: Option<f64>, e: Option<f64>) -> String {
        let mut out = self.command.to_string();
        let words = [
            ('X', self.x),
            ('Y', self.y),
            ('Z', self.z),
            ('F', f),
            ('E', e),
            ('S', self.s),
            ('P', self.p),
        ];
        for (letter, value) in words {
            if let Some(value) = value {
                out.push(' ');
                out.push(letter);
                out.push_str(&format_value(value));
            }
        }
        for word in &self.extra {
            out.push(' ');
            out.push_str(word);
        }
        out
    }
}

impl FromStr for Line {
    type Err = GcodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse_line(s)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_gcode())
    }
}

/// Format a coordinate with at most five decimals and no trailing zeros.
pub fn format_value(value: f64) -> String {
    let mut s = format!("{:.5}", value);
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}
