//! Supported command codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marks the start of a comment; everything after it is ignored on the wire.
pub const COMMENT_SYMBOL: char = ';';

/// Command family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandLetter {
    /// Preparatory (motion, modes)
    G,
    /// Miscellaneous (machine functions)
    M,
    /// Tool select
    T,
}

impl CommandLetter {
    /// Letter for `c`, if it names a command family
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'G' => Some(Self::G),
            'M' => Some(Self::M),
            'T' => Some(Self::T),
            _ => None,
        }
    }

    /// Upper-case character form
    pub fn as_char(self) -> char {
        match self {
            Self::G => 'G',
            Self::M => 'M',
            Self::T => 'T',
        }
    }
}

/// A command token such as `G1` or `M105`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    /// Command family
    pub letter: CommandLetter,
    /// Command number
    pub number: u16,
}

impl Command {
    /// Create a command
    pub const fn new(letter: CommandLetter, number: u16) -> Self {
        Self { letter, number }
    }

    /// `G<number>`
    pub const fn g(number: u16) -> Self {
        Self::new(CommandLetter::G, number)
    }

    /// `M<number>`
    pub const fn m(number: u16) -> Self {
        Self::new(CommandLetter::M, number)
    }

    /// `T<number>`
    pub const fn t(number: u16) -> Self {
        Self::new(CommandLetter::T, number)
    }

    pub const RAPID_MOVE: Command = Command::g(0);
    pub const CONTROLLED_MOVE: Command = Command::g(1);
    pub const DWELL: Command = Command::g(4);
    pub const HEAD_OFFSET: Command = Command::g(10);
    pub const USE_INCHES: Command = Command::g(20);
    pub const USE_MILLIMETRES: Command = Command::g(21);
    pub const HOME: Command = Command::g(28);
    pub const ABS_POSITIONING: Command = Command::g(90);
    pub const REL_POSITIONING: Command = Command::g(91);
    pub const SET_POSITION: Command = Command::g(92);

    pub const STOP: Command = Command::m(0);
    pub const SLEEP: Command = Command::m(1);
    pub const ENABLE_MOTORS: Command = Command::m(17);
    pub const DISABLE_MOTORS: Command = Command::m(18);
    pub const LIST_SD: Command = Command::m(20);
    pub const INIT_SD: Command = Command::m(21);
    pub const RELEASE_SD: Command = Command::m(22);
    pub const SELECT_SD_FILE: Command = Command::m(23);
    pub const START_SD_PRINT: Command = Command::m(24);
    pub const PAUSE_SD_PRINT: Command = Command::m(25);
    pub const SET_SD_POSITION: Command = Command::m(26);
    pub const SD_PRINT_STATUS: Command = Command::m(27);
    pub const START_SD_WRITE: Command = Command::m(28);
    pub const STOP_SD_WRITE: Command = Command::m(29);
    pub const POWER_ON: Command = Command::m(80);
    pub const POWER_OFF: Command = Command::m(81);
    pub const ABS_EXT_MODE: Command = Command::m(82);
    pub const REL_EXT_MODE: Command = Command::m(83);
    pub const IDLE_HOLD_OFF: Command = Command::m(84);
    pub const SET_EXT_TEMP_NO_WAIT: Command = Command::m(104);
    pub const GET_EXT_TEMP: Command = Command::m(105);
    pub const FAN_ON: Command = Command::m(106);
    pub const FAN_OFF: Command = Command::m(107);
    pub const SET_EXT_TEMP_WAIT: Command = Command::m(109);
    pub const SET_LINE_NUM: Command = Command::m(110);
    pub const EMERGENCY_STOP: Command = Command::m(112);
    pub const GET_POSITION: Command = Command::m(114);
    pub const GET_FW_DETAILS: Command = Command::m(115);
    pub const WAIT_FOR_TEMP: Command = Command::m(116);
    pub const SET_BED_TEMP_NO_WAIT: Command = Command::m(140);
    pub const SET_BED_TEMP_WAIT: Command = Command::m(190);

    /// G0 or G1
    pub fn is_move(&self) -> bool {
        *self == Self::RAPID_MOVE || *self == Self::CONTROLLED_MOVE
    }

    /// Tool number for a T command
    pub fn tool(&self) -> Option<u32> {
        match self.letter {
            CommandLetter::T => Some(u32::from(self.number)),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letter.as_char(), self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Command::CONTROLLED_MOVE.to_string(), "G1");
        assert_eq!(Command::SET_LINE_NUM.to_string(), "M110");
        assert_eq!(Command::t(2).to_string(), "T2");
    }

    #[test]
    fn test_predicates() {
        assert!(Command::RAPID_MOVE.is_move());
        assert!(!Command::HOME.is_move());
        assert_eq!(Command::t(1).tool(), Some(1));
        assert_eq!(Command::GET_EXT_TEMP.tool(), None);
    }
}
