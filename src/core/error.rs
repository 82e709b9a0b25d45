//! Purpose: Single error type shared by the codec, stream parser, and pipeline.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Carries a stable kind plus optional context (statement, position, stderr).
//! Invariants: Kinds map to fixed exit codes; adding a kind appends a new code.
//! Invariants: Pipeline errors may carry the partial solution stream parsed so far.
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use crate::core::solution::SolutionStream;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Io,
    Encoding,
    Parse,
    Unsatisfiable,
    Unbounded,
    UnsatOrUnbounded,
    Unknown,
    Execution,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    fragment: Option<String>,
    line: Option<u64>,
    column: Option<u64>,
    stderr: Option<String>,
    exit_code: Option<i32>,
    partial: Option<Box<SolutionStream>>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            fragment: None,
            line: None,
            column: None,
            stderr: None,
            exit_code: None,
            partial: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    /// The offending statement or record, when the error came from decoding.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn line(&self) -> Option<u64> {
        self.line
    }

    pub fn column(&self) -> Option<u64> {
        self.column
    }

    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Solutions parsed before the failure; the stream is never sealed `Complete`.
    pub fn partial(&self) -> Option<&SolutionStream> {
        self.partial.as_deref()
    }

    pub fn into_partial(self) -> Option<SolutionStream> {
        self.partial.map(|stream| *stream)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    pub fn with_position(mut self, line: u64, column: u64) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if !stderr.trim().is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_partial(mut self, stream: SolutionStream) -> Self {
        self.partial = Some(Box::new(stream));
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shifts a line number reported relative to a block onto the enclosing stream.
    pub(crate) fn offset_line(mut self, base: u64) -> Self {
        self.line = Some(base + self.line.unwrap_or(1) - 1);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, " (line {line}, column {column})")?,
            (Some(line), None) => write!(f, " (line {line})")?,
            _ => {}
        }
        if let Some(fragment) = &self.fragment {
            write!(f, " in `{fragment}`")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(code) = self.exit_code {
            write!(f, " (exit code: {code})")?;
        }
        if let Some(stderr) = &self.stderr {
            write!(f, "\n{}", stderr.trim_end())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Io => 3,
        ErrorKind::Encoding => 4,
        ErrorKind::Parse => 5,
        ErrorKind::Unsatisfiable => 6,
        ErrorKind::Unbounded => 7,
        ErrorKind::UnsatOrUnbounded => 8,
        ErrorKind::Unknown => 9,
        ErrorKind::Execution => 10,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Io, 3),
            (ErrorKind::Encoding, 4),
            (ErrorKind::Parse, 5),
            (ErrorKind::Unsatisfiable, 6),
            (ErrorKind::Unbounded, 7),
            (ErrorKind::UnsatOrUnbounded, 8),
            (ErrorKind::Unknown, 9),
            (ErrorKind::Execution, 10),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_position_and_fragment() {
        let err = Error::new(ErrorKind::Parse)
            .with_message("expected value")
            .with_position(3, 7)
            .with_fragment("x = ;");
        let text = err.to_string();
        assert!(text.starts_with("Parse: expected value"));
        assert!(text.contains("line 3, column 7"));
        assert!(text.contains("`x = ;`"));
    }

    #[test]
    fn blank_stderr_is_not_recorded() {
        let err = Error::new(ErrorKind::Execution).with_stderr("  \n");
        assert!(err.stderr().is_none());
    }

    #[test]
    fn offset_line_rebases_block_positions() {
        let err = Error::new(ErrorKind::Parse).with_position(2, 1).offset_line(10);
        assert_eq!(err.line(), Some(11));
    }
}
