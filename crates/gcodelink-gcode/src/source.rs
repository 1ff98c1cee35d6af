//! Where the send engine pulls its lines from.
//!
//! [`ProgramCursor`] walks a fully parsed [`Program`] and knows the layer of
//! every line. [`FileSource`] streams a file lazily for constrained hosts and
//! does no layer bookkeeping.

use crate::line::Line;
use crate::program::Program;
use gcodelink_core::{GcodeError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A line ready for transmission, with its layer when known
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    pub line: Line,
    pub layer: Option<u32>,
}

/// Sequential supply of program lines
pub trait ProgramSource: Send {
    /// Next valid line, or `None` at the end
    fn next_line(&mut self) -> Result<Option<SourceLine>>;

    /// Number of lines handed out so far
    fn cursor(&self) -> usize;

    /// Total number of lines, if known up front
    fn total(&self) -> Option<usize>;

    /// Go back to the first line
    fn rewind(&mut self) -> Result<()>;
}

/// Cursor over an in-memory program
#[derive(Debug, Clone)]
pub struct ProgramCursor {
    program: Arc<Program>,
    cursor: usize,
}

impl ProgramCursor {
    pub fn new(program: Arc<Program>) -> Self {
        Self { program, cursor: 0 }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }
}

impl ProgramSource for ProgramCursor {
    fn next_line(&mut self) -> Result<Option<SourceLine>> {
        let Some(line) = self.program.get(self.cursor) else {
            return Ok(None);
        };
        let next = SourceLine {
            line: line.clone(),
            layer: self.program.layer_at(self.cursor),
        };
        self.cursor += 1;
        Ok(Some(next))
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn total(&self) -> Option<usize> {
        Some(self.program.len())
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

/// Lazily parsed file, read one line at a time
pub struct FileSource {
    path: PathBuf,
    reader: BufReader<File>,
    cursor: usize,
    buf: Vec<u8>,
}

impl FileSource {
    /// Open `path` for streaming.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = Self::reader(&path)?;
        Ok(Self {
            path,
            reader,
            cursor: 0,
            buf: Vec::new(),
        })
    }

    fn reader(path: &Path) -> Result<BufReader<File>> {
        if path.as_os_str().is_empty() || !path.is_file() {
            return Err(GcodeError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let file = File::open(path).map_err(|e| GcodeError::FileError {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(BufReader::new(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgramSource for FileSource {
    fn next_line(&mut self) -> Result<Option<SourceLine>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(None);
            }
            let text = match std::str::from_utf8(&self.buf) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(
                        "Skipping undecodable line in {}: {}",
                        self.path.display(),
                        err
                    );
                    continue;
                }
            };
            if let Ok(line) = text.parse::<Line>() {
                self.cursor += 1;
                return Ok(Some(SourceLine { line, layer: None }));
            }
        }
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn total(&self) -> Option<usize> {
        None
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader = Self::reader(&self.path)?;
        self.cursor = 0;
        Ok(())
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_cursor_walks_and_rewinds() {
        let program = Arc::new(Program::from_text("G28\nG1 Z0.2 E1\n").unwrap());
        let mut source = ProgramCursor::new(program);
        assert_eq!(source.total(), Some(2));

        let first = source.next_line().unwrap().unwrap();
        assert_eq!(first.line.text(), "G28");
        assert_eq!(first.layer, Some(0));
        let second = source.next_line().unwrap().unwrap();
        assert_eq!(second.layer, Some(1));
        assert!(source.next_line().unwrap().is_none());
        assert_eq!(source.cursor(), 2);

        source.rewind().unwrap();
        assert_eq!(source.cursor(), 0);
        assert!(source.next_line().unwrap().is_some());
    }

    #[test]
    fn test_file_source_skips_undecodable_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"G28\nM117 caf\xe9\nG1 X1\n").unwrap();

        let mut source = FileSource::open(file.path()).unwrap();
        assert_eq!(source.next_line().unwrap().unwrap().line.text(), "G28");
        assert_eq!(source.next_line().unwrap().unwrap().line.text(), "G1 X1");
        assert!(source.next_line().unwrap().is_none());
        assert_eq!(source.cursor(), 2);
    }
}
