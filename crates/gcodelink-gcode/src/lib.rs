//! # gcodelink G-code model
//!
//! Parses single instructions into [`Line`]s, aggregates whole programs into
//! [`Program`]s with bounding box, travel, filament and layer statistics, and
//! exposes both as [`ProgramSource`]s the send engine can stream from.

pub mod codes;
pub mod line;
pub mod program;
pub mod source;

pub use codes::{Command, CommandLetter, COMMENT_SYMBOL};
pub use line::{format_value, Line, Multipliers};
pub use program::{Offset, Program, ProgramStats};
pub use source::{FileSource, ProgramCursor, ProgramSource, SourceLine};
