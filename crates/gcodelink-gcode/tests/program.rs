use gcodelink_core::{Error, GcodeError};
use gcodelink_gcode::{FileSource, Program, ProgramSource};
use std::io::Write;
use tempfile::NamedTempFile;

const SAMPLE: &str = "; sliced part
G21
G90
M82
G28
G92 E0
G1 Z0.2 F3000
G1 X10 Y10 E1.5 F1200
G1 X20 Y10 E3
G1 Z0.4
G1 X20 Y20 E4.5
G0 X0 Y0
";

#[test]
fn test_comment_only_program_is_absent() {
    let err = Program::from_text("; nothing\n\n   \n; here\n").unwrap_err();
    assert!(matches!(err, Error::Gcode(GcodeError::EmptyProgram)));
}

#[test]
fn test_dimensions_match_bounds() {
    let program = Program::from_text(SAMPLE).unwrap();
    let stats = program.stats();
    assert_eq!(stats.width, stats.x_max - stats.x_min);
    assert_eq!(stats.depth, stats.y_max - stats.y_min);
    assert_eq!(stats.height, stats.z_max - stats.z_min);
    assert!(stats.width >= 0.0 && stats.depth >= 0.0 && stats.height >= 0.0);
    assert_eq!(stats.x_min, 0.0);
    assert_eq!(stats.x_max, 20.0);
    assert_eq!(stats.y_max, 20.0);
    assert_eq!(stats.layers, 2);
    assert_eq!(stats.filament_total, 4.5);
}

#[test]
fn test_metric_program_reports_raw_coordinates() {
    let program = Program::from_text("G1 X12.5 Y3 E1\n").unwrap();
    assert_eq!(program.stats().x_max, 12.5);
    assert_eq!(program.lines()[0].native_x(), Some(12.5));
}

#[test]
fn test_missing_file_is_distinct_from_empty_program() {
    let err = Program::from_file("/definitely/not/here.gcode").unwrap_err();
    assert!(matches!(err, Error::Gcode(GcodeError::FileNotFound { .. })));

    let err = Program::from_file("").unwrap_err();
    assert!(matches!(err, Error::Gcode(GcodeError::FileNotFound { .. })));

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "; just a comment").unwrap();
    let err = Program::from_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::Gcode(GcodeError::EmptyProgram)));
}

#[test]
fn test_write_and_reload() {
    let program = Program::from_text(SAMPLE).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.gcode");
    program.write_to_file(&path).unwrap();

    let reloaded = Program::from_file(&path).unwrap();
    assert_eq!(reloaded.len(), program.len());
    assert_eq!(reloaded.stats().x_travel, program.stats().x_travel);
}

#[test]
fn test_stats_serialize() {
    let program = Program::from_text(SAMPLE).unwrap();
    let json = serde_json::to_value(program.stats()).unwrap();
    assert_eq!(json["layers"], 2);
    assert_eq!(json["line_count"], 12);
}

#[test]
fn test_file_source_streams_valid_lines() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let mut source = FileSource::open(file.path()).unwrap();
    assert_eq!(source.total(), None);
    let mut texts = Vec::new();
    while let Some(next) = source.next_line().unwrap() {
        assert_eq!(next.layer, None);
        texts.push(next.line.text().to_string());
    }
    assert_eq!(texts.len(), 11);
    assert_eq!(texts[0], "G21");

    source.rewind().unwrap();
    assert_eq!(source.cursor(), 0);
    assert_eq!(source.next_line().unwrap().unwrap().line.text(), "G21");
}
