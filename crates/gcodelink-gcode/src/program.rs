//! Whole-program model and statistics.
//!
//! A [`Program`] is built from raw text lines. Lines that fail to parse are
//! dropped; a program with no valid lines is an error. Statistics are
//! computed eagerly by a single in-order pass that carries the unit mode,
//! positioning mode, extrusion mode, active tool and running position.

use crate::codes::Command;
use crate::line::Line;
use gcodelink_core::{
    units::from_native_length, GcodeError, MeasurementSystem, Positioning, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Aggregate statistics of a program. Lengths are in millimetres.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgramStats {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
    pub width: f64,
    pub depth: f64,
    pub height: f64,
    pub x_travel: f64,
    pub y_travel: f64,
    pub z_travel: f64,
    /// Sum of absolute E movement, retractions included
    pub e_travel: f64,
    /// Net filament pushed per tool
    pub filament_used: BTreeMap<u32, f64>,
    /// Sum of `filament_used` over all tools
    pub filament_total: f64,
    pub layers: u32,
    /// Raw input lines, including blanks and comments
    pub line_count: usize,
    /// Lines that parsed into a command
    pub command_count: usize,
}

/// Constant shift applied by [`Program::offset`], in millimetres
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A parsed G-code job
#[derive(Debug, Clone)]
pub struct Program {
    lines: Vec<Line>,
    layers: Vec<u32>,
    stats: ProgramStats,
}

#[derive(Default)]
struct Bounds {
    min: Option<f64>,
    max: Option<f64>,
}

impl Bounds {
    fn include(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn get(&self) -> (f64, f64) {
        (self.min.unwrap_or(0.0), self.max.unwrap_or(0.0))
    }
}

/// Running state of the statistics pass
struct Analyzer {
    units: MeasurementSystem,
    positioning: Positioning,
    relative_e: bool,
    tool: u32,
    position: [f64; 3],
    e_position: f64,
    travel: [f64; 3],
    e_travel: f64,
    filament: BTreeMap<u32, f64>,
    bounds: [Bounds; 3],
    layers: u32,
}

impl Analyzer {
    fn new() -> Self {
        Self {
            units: MeasurementSystem::Metric,
            positioning: Positioning::Absolute,
            relative_e: false,
            tool: 0,
            position: [0.0; 3],
            e_position: 0.0,
            travel: [0.0; 3],
            e_travel: 0.0,
            filament: BTreeMap::new(),
            bounds: Default::default(),
            layers: 0,
        }
    }

    /// Process one line, stamping it with the modes in effect before it.
    fn step(&mut self, line: &mut Line) {
        line.units = self.units;
        line.positioning = self.positioning;

        match line.command() {
            Command::USE_INCHES => self.units = MeasurementSystem::Imperial,
            Command::USE_MILLIMETRES => self.units = MeasurementSystem::Metric,
            Command::ABS_POSITIONING => {
                self.positioning = Positioning::Absolute;
                self.relative_e = false;
            }
            Command::REL_POSITIONING => {
                self.positioning = Positioning::Relative;
                self.relative_e = true;
            }
            Command::ABS_EXT_MODE => self.relative_e = false,
            Command::REL_EXT_MODE => self.relative_e = true,
            Command::SET_POSITION => self.set_position(line),
            Command::HOME => self.home(line),
            Command::RAPID_MOVE => self.movement(line),
            Command::CONTROLLED_MOVE => {
                self.count_layer(line);
                self.movement(line);
            }
            command => {
                if let Some(tool) = command.tool() {
                    self.tool = tool;
                }
            }
        }
    }

    fn axes(line: &Line) -> [Option<f64>; 3] {
        [line.native_x(), line.native_y(), line.native_z()]
    }

    fn set_position(&mut self, line: &Line) {
        for (axis, value) in Self::axes(line).into_iter().enumerate() {
            if let Some(value) = value {
                self.position[axis] = value;
            }
        }
        if let Some(e) = line.native_e() {
            self.e_position = e;
        }
    }

    fn home(&mut self, line: &Line) {
        let full = line.is_full_home();
        for (axis, value) in Self::axes(line).into_iter().enumerate() {
            if full || value.is_some() {
                self.travel[axis] += self.position[axis].abs();
                self.position[axis] = 0.0;
            }
        }
    }

    fn count_layer(&mut self, line: &Line) {
        if let Some(z) = line.native_z() {
            let destination = match self.positioning {
                Positioning::Absolute => z,
                Positioning::Relative => self.position[2] + z,
            };
            if destination > self.position[2] {
                self.layers += 1;
            }
        }
    }

    fn movement(&mut self, line: &Line) {
        let start = self.position;
        for (axis, value) in Self::axes(line).into_iter().enumerate() {
            if let Some(value) = value {
                match self.positioning {
                    Positioning::Relative => {
                        self.travel[axis] += value.abs();
                        self.position[axis] += value;
                    }
                    Positioning::Absolute => {
                        self.travel[axis] += (self.position[axis] - value).abs();
                        self.position[axis] = value;
                    }
                }
            }
        }

        if let Some(e) = line.native_e() {
            let delta = if self.relative_e {
                e
            } else {
                e - self.e_position
            };
            self.e_position += delta;
            self.e_travel += delta.abs();
            *self.filament.entry(self.tool).or_insert(0.0) += delta;
        }

        if line.is_extrusion_move() {
            for axis in 0..2 {
                if Self::axes(line)[axis].is_some() {
                    self.bounds[axis].include(start[axis]);
                    self.bounds[axis].include(self.position[axis]);
                }
            }
        }
        if line.z().is_some() {
            self.bounds[2].include(self.position[2]);
        }
    }

    fn finish(self, line_count: usize, command_count: usize) -> ProgramStats {
        let (x_min, x_max) = self.bounds[0].get();
        let (y_min, y_max) = self.bounds[1].get();
        let (z_min, z_max) = self.bounds[2].get();
        let filament_total = self.filament.values().sum();
        ProgramStats {
            x_min,
            x_max,
            y_min,
            y_max,
            z_min,
            z_max,
            width: x_max - x_min,
            depth: y_max - y_min,
            height: z_max - z_min,
            x_travel: self.travel[0],
            y_travel: self.travel[1],
            z_travel: self.travel[2],
            e_travel: self.e_travel,
            filament_used: self.filament,
            filament_total,
            layers: self.layers,
            line_count,
            command_count,
        }
    }
}

impl Program {
    /// Build a program from raw text lines.
    ///
    /// Blank, comment-only and unparseable lines are dropped. Returns
    /// [`GcodeError::EmptyProgram`] when nothing valid remains.
    pub fn from_lines<I, S>(raw: I) -> Result<Program>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut line_count = 0;
        let mut lines = Vec::new();
        for text in raw {
            line_count += 1;
            match Line::parse(text.as_ref()) {
                Ok(line) => lines.push(line),
                Err(err) => {
                    if !matches!(err, gcodelink_core::Error::Gcode(GcodeError::EmptyLine)) {
                        tracing::debug!("Dropping line {}: {}", line_count, err);
                    }
                }
            }
        }

        if lines.is_empty() {
            return Err(GcodeError::EmptyProgram.into());
        }

        let mut program = Program {
            lines,
            layers: Vec::new(),
            stats: ProgramStats::default(),
        };
        program.analyze(line_count);
        tracing::debug!(
            "Program built: {} of {} lines valid, {} layers",
            program.stats.command_count,
            line_count,
            program.stats.layers
        );
        Ok(program)
    }

    /// Build a program from a block of text
    pub fn from_text(text: &str) -> Result<Program> {
        Self::from_lines(text.lines())
    }

    /// Build a program from a file on disk.
    ///
    /// A missing or empty path is [`GcodeError::FileNotFound`], distinct from a
    /// file without valid instructions ([`GcodeError::EmptyProgram`]).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Program> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() || !path.is_file() {
            return Err(GcodeError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let content = fs::read_to_string(path).map_err(|e| GcodeError::FileError {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_text(&content)
    }

    fn analyze(&mut self, line_count: usize) {
        let mut analyzer = Analyzer::new();
        let mut layers = Vec::with_capacity(self.lines.len());
        for line in &mut self.lines {
            analyzer.step(line);
            layers.push(analyzer.layers);
        }
        self.layers = layers;
        self.stats = analyzer.finish(line_count, self.lines.len());
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn get(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    /// Number of valid lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Always false; empty programs are never constructed
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Layer count reached once the line at `index` has been processed
    pub fn layer_at(&self, index: usize) -> Option<u32> {
        self.layers.get(index).copied()
    }

    pub fn stats(&self) -> &ProgramStats {
        &self.stats
    }

    /// Shift every absolute-mode move and set-position line by `offset`.
    ///
    /// Lines in relative mode are deltas and stay untouched. Statistics are
    /// recomputed afterwards.
    pub fn offset(&mut self, offset: Offset) {
        for line in &mut self.lines {
            let command = line.command();
            let applies = line.positioning() == Positioning::Absolute
                && (command.is_move() || command == Command::SET_POSITION);
            if !applies {
                continue;
            }
            let units = line.units();
            let mut changed = false;
            for (slot, delta) in [
                (&mut line.x, offset.x),
                (&mut line.y, offset.y),
                (&mut line.z, offset.z),
            ] {
                if let Some(value) = slot.as_mut() {
                    if delta != 0.0 {
                        *value += from_native_length(delta, units);
                        changed = true;
                    }
                }
            }
            if changed {
                line.refresh_text();
            }
        }
        let line_count = self.stats.line_count;
        self.analyze(line_count);
    }

    /// Serialize the program, one instruction per line
    pub fn to_gcode(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.to_gcode());
            out.push('\n');
        }
        out
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_gcode())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(text: &str) -> Program {
        Program::from_text(text).unwrap()
    }

    #[test]
    fn test_absolute_travel_and_bounds() {
        let program = build("G90\nG1 X10 E1\nG1 X15 E2\n");
        let stats = program.stats();
        assert_eq!(stats.x_travel, 15.0);
        assert_eq!(stats.x_min, 0.0);
        assert_eq!(stats.x_max, 15.0);
        assert_eq!(stats.width, 15.0);
    }

    #[test]
    fn test_relative_travel() {
        let program = build("G91\nG1 X10\nG1 X-3\n");
        assert_eq!(program.stats().x_travel, 13.0);
    }

    #[test]
    fn test_units_not_retroactive() {
        let program = build("G1 X1\nG20\nG1 X2\n");
        assert_eq!(program.lines()[0].units(), MeasurementSystem::Metric);
        assert_eq!(program.lines()[2].units(), MeasurementSystem::Imperial);
        let expected = 1.0 + (2.0 * 25.4 - 1.0);
        assert!((program.stats().x_travel - expected).abs() < 1e-9);
    }

    #[test]
    fn test_layers_count_upward_steps_only() {
        let program = build(
            "G1 Z0.2 E1\nG1 X5 E2\nG1 Z0.4 E3\nG1 Z0.4 E4\nG1 Z0.3\nG0 Z5\nG1 Z0.6\n",
        );
        // 0.2 and 0.4 go up; 0.3 goes down; G0 does not count; 0.6 is below 5.
        assert_eq!(program.stats().layers, 2);
        assert_eq!(program.layer_at(0), Some(1));
        assert_eq!(program.layer_at(2), Some(2));
    }

    #[test]
    fn test_home_adds_travel() {
        let program = build("G1 X10 Y5\nG28 X0\nG28\n");
        let stats = program.stats();
        assert_eq!(stats.x_travel, 20.0);
        assert_eq!(stats.y_travel, 10.0);
    }

    #[test]
    fn test_filament_with_resets_and_tools() {
        let program = build(
            "G92 E0\nG1 X1 E5\nG1 X2 E8\nG92 E0\nG1 X3 E2\nT1\nG92 E0\nG1 X4 E4\nG1 E3\n",
        );
        let stats = program.stats();
        assert_eq!(stats.filament_used.get(&0), Some(&10.0));
        assert_eq!(stats.filament_used.get(&1), Some(&3.0));
        assert_eq!(stats.filament_total, 13.0);
        assert_eq!(stats.e_travel, 15.0);
    }

    #[test]
    fn test_relative_extrusion_mode() {
        let program = build("M83\nG1 X1 E1\nG1 X2 E1\nG1 E-0.5\n");
        assert_eq!(program.stats().filament_total, 1.5);
        assert_eq!(program.stats().e_travel, 2.5);
    }

    #[test]
    fn test_set_position_has_no_travel() {
        let program = build("G92 X50 Y50\nG1 X60 E1\n");
        let stats = program.stats();
        assert_eq!(stats.x_travel, 10.0);
        assert_eq!(stats.x_min, 50.0);
        assert_eq!(stats.x_max, 60.0);
    }

    #[test]
    fn test_counts() {
        let program = build("; header\n\nG28\nbogus\nG1 X1\n");
        assert_eq!(program.stats().line_count, 5);
        assert_eq!(program.stats().command_count, 2);
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_offset_absolute_only() {
        let mut program = build("G90\nG1 X10 Y10 E1\nG91\nG1 X5\nG90\nG92 Z0\n");
        program.offset(Offset {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        });
        assert_eq!(program.lines()[1].text(), "G1 X11 Y12 E1");
        assert_eq!(program.lines()[3].text(), "G1 X5");
        assert_eq!(program.lines()[5].text(), "G92 Z3");
        assert_eq!(program.stats().x_max, 11.0);
    }

    #[test]
    fn test_offset_in_inches() {
        let mut program = build("G20\nG1 X1\n");
        program.offset(Offset {
            x: 25.4,
            ..Default::default()
        });
        assert_eq!(program.lines()[1].text(), "G1 X2");
    }
}
