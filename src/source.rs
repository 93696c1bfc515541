// Copyright (c) 2016-2020 Fabian Schuiki

//! Logical line sources and the include stack.
//!
//! Input is consumed one logical line at a time. A trailing backslash
//! immediately before the newline joins the next physical line onto the
//! current one, with both the backslash and the newline removed. Carriage
//! returns preceding newlines are stripped. The line number reported for a
//! logical line is that of its first physical line.
//!
//! Sources compose as a stack: the topmost is the active input, `#include`
//! pushes a new source, and end of input pops it. The bottom element is the
//! original input and the stack is never empty while processing runs.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

/// A source line after backslash-newline joining, the unit the directive
/// interpreter operates on.
#[derive(Debug, Clone)]
pub struct LogicalLine {
    pub text: String,
    /// 1-based physical line number of the first physical line.
    pub number: u64,
}

/// Produces logical lines from a byte stream.
pub struct LineReader {
    input: Box<dyn BufRead>,
    /// 1-based number of the next physical line to be read.
    next_line: u64,
    missing_newline: bool,
}

impl LineReader {
    pub fn new(input: Box<dyn BufRead>) -> LineReader {
        LineReader {
            input,
            next_line: 1,
            missing_newline: false,
        }
    }

    /// The physical line number the next call to [`next_logical`] will start
    /// at. Used to anchor `#line` overrides.
    pub fn next_line_number(&self) -> u64 {
        self.next_line
    }

    /// Read one physical line without its terminator. Returns `None` at end
    /// of input. A final line without a trailing newline is still yielded.
    fn next_physical(&mut self) -> io::Result<Option<String>> {
        let mut buf = String::new();
        let n = self.input.read_line(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.next_line += 1;
        if buf.ends_with('\n') {
            buf.pop();
            if buf.ends_with('\r') {
                buf.pop();
            }
        } else {
            self.missing_newline = true;
        }
        Ok(Some(buf))
    }

    /// Produce the next logical line, joining continuations.
    pub fn next_logical(&mut self) -> io::Result<Option<LogicalLine>> {
        let number = self.next_line;
        let mut text = match self.next_physical()? {
            Some(line) => line,
            None => return Ok(None),
        };
        while text.ends_with('\\') {
            text.pop();
            match self.next_physical()? {
                Some(cont) => text.push_str(&cont),
                // A continuation on the last line of the file has nothing to
                // join; the backslash is simply dropped.
                None => break,
            }
        }
        Ok(Some(LogicalLine { text, number }))
    }
}

/// One open input on the source stack, together with the reporting state a
/// `#line` directive can override. The override lives on this frame only;
/// popping an include restores the outer frame's reporting untouched.
pub struct SourceFrame {
    reader: LineReader,
    /// Path as opened, used for `__FILE__` and diagnostics.
    path: String,
    /// Directory containing the file, searched first for quoted includes.
    dir: PathBuf,
    /// Adjustment applied to physical line numbers by `#line`.
    line_adjust: i64,
    /// File name override set by `#line N "file"`.
    file_override: Option<String>,
    /// Conditional stack depth when this frame was pushed; frames left open
    /// at EOF beyond this depth are unterminated.
    pub cond_depth: usize,
}

impl SourceFrame {
    /// Open a file on disk.
    pub fn open(path: &Path, cond_depth: usize) -> io::Result<SourceFrame> {
        let file = File::open(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(SourceFrame {
            reader: LineReader::new(Box::new(BufReader::new(file))),
            path: path.display().to_string(),
            dir,
            line_adjust: 0,
            file_override: None,
            cond_depth,
        })
    }

    /// Wrap an in-memory buffer under the given display name.
    pub fn from_buffer(name: &str, text: &str) -> SourceFrame {
        SourceFrame {
            reader: LineReader::new(Box::new(Cursor::new(text.to_string()))),
            path: name.to_string(),
            dir: PathBuf::from("."),
            line_adjust: 0,
            file_override: None,
            cond_depth: 0,
        }
    }

    /// Wrap an arbitrary reader under the given display name.
    pub fn from_reader(name: &str, input: Box<dyn BufRead>) -> SourceFrame {
        SourceFrame {
            reader: LineReader::new(input),
            path: name.to_string(),
            dir: PathBuf::from("."),
            line_adjust: 0,
            file_override: None,
            cond_depth: 0,
        }
    }

    pub fn next_logical(&mut self) -> io::Result<Option<LogicalLine>> {
        self.reader.next_logical()
    }

    /// The last physical line number read, for end-of-file diagnostics.
    pub fn last_line_number(&self) -> u64 {
        self.reader.next_line_number().saturating_sub(1)
    }

    /// Whether the input ended without a trailing newline.
    pub fn missing_final_newline(&self) -> bool {
        self.reader.missing_newline
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path reported for diagnostics and `__FILE__`, honoring any
    /// `#line` file override.
    pub fn reported_file(&self) -> &str {
        self.file_override.as_deref().unwrap_or(&self.path)
    }

    /// Map a physical line number to the reported one.
    pub fn reported_line(&self, physical: u64) -> u64 {
        let n = physical as i64 + self.line_adjust;
        if n < 0 {
            0
        } else {
            n as u64
        }
    }

    /// Apply `#line n [file]`: the next line read from this frame reports
    /// line `n`.
    pub fn set_line_override(&mut self, n: u64, file: Option<String>) {
        self.line_adjust = n as i64 - self.reader.next_line_number() as i64;
        if file.is_some() {
            self.file_override = file;
        }
    }
}

/// The stack of open sources. Pushed on `#include`, popped at end of input.
pub struct SourceStack {
    frames: Vec<SourceFrame>,
}

impl SourceStack {
    pub fn new(bottom: SourceFrame) -> SourceStack {
        SourceStack {
            frames: vec![bottom],
        }
    }

    pub fn push(&mut self, frame: SourceFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<SourceFrame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&SourceFrame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut SourceFrame> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<(u64, String)> {
        let mut frame = SourceFrame::from_buffer("test.f", text);
        let mut out = Vec::new();
        while let Some(line) = frame.next_logical().unwrap() {
            out.push((line.number, line.text));
        }
        out
    }

    #[test]
    fn plain_lines() {
        assert_eq!(
            lines("a\nb\n\nc\n"),
            vec![
                (1, "a".to_string()),
                (2, "b".to_string()),
                (3, "".to_string()),
                (4, "c".to_string()),
            ]
        );
    }

    #[test]
    fn continuation_joining() {
        assert_eq!(
            lines("a \\\nb\nc\n"),
            vec![(1, "a b".to_string()), (3, "c".to_string())]
        );
        // Two continuations in a row join three physical lines.
        assert_eq!(lines("x\\\ny\\\nz\n"), vec![(1, "xyz".to_string())]);
    }

    #[test]
    fn crlf_normalization() {
        assert_eq!(
            lines("a\r\nb\r\n"),
            vec![(1, "a".to_string()), (2, "b".to_string())]
        );
        // Continuation before CRLF still joins.
        assert_eq!(lines("a\\\r\nb\r\n"), vec![(1, "ab".to_string())]);
    }

    #[test]
    fn missing_final_newline() {
        let mut frame = SourceFrame::from_buffer("test.f", "a\nb");
        let mut out = Vec::new();
        while let Some(line) = frame.next_logical().unwrap() {
            out.push((line.number, line.text));
        }
        assert_eq!(out, vec![(1, "a".to_string()), (2, "b".to_string())]);
        assert!(frame.missing_final_newline());

        let mut frame = SourceFrame::from_buffer("test.f", "a\n");
        while frame.next_logical().unwrap().is_some() {}
        assert!(!frame.missing_final_newline());
    }

    #[test]
    fn trailing_continuation_at_eof() {
        assert_eq!(lines("a\\"), vec![(1, "a".to_string())]);
    }

    #[test]
    fn line_override() {
        let mut frame = SourceFrame::from_buffer("test.f", "a\nb\nc\n");
        frame.next_logical().unwrap();
        // After reading line 1, make the next line report as 100.
        frame.set_line_override(100, Some("other.f".to_string()));
        let line = frame.next_logical().unwrap().unwrap();
        assert_eq!(frame.reported_line(line.number), 100);
        assert_eq!(frame.reported_file(), "other.f");
        let line = frame.next_logical().unwrap().unwrap();
        assert_eq!(frame.reported_line(line.number), 101);
    }
}
