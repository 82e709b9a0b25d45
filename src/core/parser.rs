//! Purpose: Split raw solver output into solution records and a terminal status.
//! Exports: `OutputMode`, `ErrorPolicy`, `ParserConfig`, `SolutionParser`, `parse_reader`, `parse_reader_with`, `parse_str`.
//! Role: Push-style state machine shared by the blocking and async pipelines.
//! Invariants: Records are returned in arrival order; nothing is buffered across separators.
//! Invariants: Stop policy surfaces the first bad block; Skip records it and continues at the next separator.
//! Invariants: Statistics lines never enter a block; lines are decoded lossily from bytes.
use std::collections::BTreeMap;
use std::io::BufRead;

use bstr::ByteSlice;
use tracing::{debug, warn};

use crate::core::decode::{DecodeOptions, decode, truncate_snippet};
use crate::core::error::{Error, ErrorKind};
use crate::core::solution::{
    BlockFailure, SOLUTION_SEPARATOR, STATISTICS_PREFIX, Solution, SolutionStream, Status,
};
use crate::core::value::{Assignment, EnumTable};
use crate::json::convert::assignment_from_json;
use crate::json::parse::{StreamRecord, from_str};

const SNIPPET_MAX: usize = 200;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OutputMode {
    /// Blocks are dzn statements decoded into assignments.
    #[default]
    Dict,
    /// Blocks are JSON objects.
    Json,
    /// Every line is a self-describing JSON record (`--json-stream`).
    JsonLines,
    /// Blocks are kept as opaque text.
    Raw,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Dict => "dict",
            OutputMode::Json => "json",
            OutputMode::JsonLines => "json-lines",
            OutputMode::Raw => "raw",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ErrorPolicy {
    #[default]
    Stop,
    Skip,
}

#[derive(Clone, Debug, Default)]
pub struct ParserConfig {
    pub mode: OutputMode,
    pub errors: ErrorPolicy,
    pub decode: DecodeOptions,
    /// Enum declarations of the model, used to resolve enum cases in blocks.
    pub enums: EnumTable,
}

impl ParserConfig {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_errors(mut self, errors: ErrorPolicy) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }

    pub fn with_enums(mut self, enums: EnumTable) -> Self {
        self.enums = enums;
        self
    }
}

/// Incremental parser: feed lines as they arrive, then `seal`.
#[derive(Debug)]
pub struct SolutionParser {
    config: ParserConfig,
    block: Vec<String>,
    block_start: u64,
    line: u64,
    blocks: usize,
    status: Option<Status>,
    statistics: BTreeMap<String, serde_json::Value>,
    skipped: Vec<BlockFailure>,
    diagnostics: Vec<String>,
}

impl SolutionParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            block: Vec::new(),
            block_start: 1,
            line: 0,
            blocks: 0,
            status: None,
            statistics: BTreeMap::new(),
            skipped: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.config.mode
    }

    /// Terminal status, once a terminator has been seen.
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn enums(&self) -> &EnumTable {
        &self.config.enums
    }

    /// Lines consumed so far.
    pub fn lines(&self) -> u64 {
        self.line
    }

    /// Consumes one output line (with or without its newline). Returns a record
    /// when the line completes one.
    pub fn feed_line(&mut self, raw: &[u8]) -> Result<Option<Solution>, Error> {
        self.line += 1;
        let text = raw.to_str_lossy();
        let text = text.trim_end_matches(['\n', '\r']);

        if self.config.mode == OutputMode::JsonLines {
            return self.feed_record(text);
        }

        let trimmed = text.trim();
        if let Some(stat) = trimmed.strip_prefix(STATISTICS_PREFIX) {
            self.record_statistic(stat);
            self.push_block_line(String::new());
            return Ok(None);
        }
        if self.status.is_some() {
            if !trimmed.is_empty() {
                debug!(line = self.line, "ignoring output after the terminator");
            }
            return Ok(None);
        }
        if trimmed == SOLUTION_SEPARATOR {
            return self.close_block();
        }
        if let Some(status) = Status::from_terminator(trimmed) {
            self.status = Some(status);
            self.discard_block();
            return Ok(None);
        }
        let keep_comments = matches!(self.config.mode, OutputMode::Dict | OutputMode::Raw);
        if trimmed.starts_with('%') && !keep_comments {
            self.push_block_line(String::new());
        } else {
            self.push_block_line(text.trim_end().to_string());
        }
        Ok(None)
    }

    /// Seals the stream with the records collected by the caller. A stream
    /// without a terminator is `Incomplete`.
    pub fn seal(mut self, solutions: Vec<Solution>) -> SolutionStream {
        self.discard_block();
        let status = self.status.unwrap_or(Status::Incomplete);
        let stream = SolutionStream::sealed(
            solutions,
            status,
            self.statistics,
            self.skipped,
            self.config.enums,
        );
        stream.with_stderr(self.diagnostics.join("\n"))
    }

    fn push_block_line(&mut self, line: String) {
        if self.block.is_empty() {
            self.block_start = self.line;
        }
        self.block.push(line);
    }

    fn discard_block(&mut self) {
        if self.block.iter().any(|line| !line.trim().is_empty()) {
            debug!(
                line = self.block_start,
                lines = self.block.len(),
                "dropping output not followed by a separator"
            );
        }
        self.block.clear();
    }

    fn close_block(&mut self) -> Result<Option<Solution>, Error> {
        let index = self.blocks;
        self.blocks += 1;
        let start = if self.block.is_empty() { self.line } else { self.block_start };
        let text = std::mem::take(&mut self.block).join("\n");

        let parsed = match self.config.mode {
            OutputMode::Raw | OutputMode::JsonLines => {
                return Ok(Some(Solution::Raw(text.trim_matches('\n').to_string())));
            }
            OutputMode::Dict => decode(&text, &mut self.config.enums, &self.config.decode)
                .map(Solution::Assignment),
            OutputMode::Json => self.decode_json_block(&text).map(Solution::Assignment),
        };
        match parsed {
            Ok(solution) => Ok(Some(solution)),
            Err(err) => {
                let err = err.offset_line(start);
                self.block_failure(index, err, &text)
            }
        }
    }

    fn decode_json_block(&self, text: &str) -> Result<Assignment, Error> {
        if text.trim().is_empty() {
            return Ok(Assignment::new());
        }
        let json = from_str::<serde_json::Value>(text).map_err(|err| {
            Error::new(ErrorKind::Parse)
                .with_message(format!("invalid JSON solution: {err}"))
                .with_position(err.line() as u64, err.column() as u64)
                .with_source(err)
        })?;
        assignment_from_json(&json, &self.config.enums, self.config.decode.types.as_ref())
    }

    fn block_failure(
        &mut self,
        index: usize,
        err: Error,
        text: &str,
    ) -> Result<Option<Solution>, Error> {
        let snippet = match err.fragment() {
            Some(fragment) => fragment.to_string(),
            None => truncate_snippet(text.trim(), SNIPPET_MAX),
        };
        match self.config.errors {
            ErrorPolicy::Stop => {
                let err = if err.fragment().is_none() {
                    err.with_fragment(snippet)
                } else {
                    err
                };
                Err(err.with_hint("Use the skip policy to continue past malformed blocks."))
            }
            ErrorPolicy::Skip => {
                let line = err.line().unwrap_or(self.line);
                let message = err.message().unwrap_or("malformed block").to_string();
                warn!(index, line, %message, "skipping malformed solution block");
                self.skipped.push(BlockFailure {
                    index,
                    line,
                    message,
                    snippet,
                });
                Ok(None)
            }
        }
    }

    fn feed_record(&mut self, text: &str) -> Result<Option<Solution>, Error> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let record = match from_str::<StreamRecord>(text) {
            Ok(record) => record,
            Err(err) => {
                let index = self.blocks;
                self.blocks += 1;
                let err = Error::new(ErrorKind::Parse)
                    .with_message(format!("invalid JSON record: {err}"))
                    .with_position(self.line, err.column() as u64);
                return self.block_failure(index, err, text);
            }
        };
        match record {
            StreamRecord::Solution { output } => {
                let index = self.blocks;
                self.blocks += 1;
                let parsed = match (output.json, output.dzn, output.raw) {
                    (Some(json), _, _) => assignment_from_json(
                        &json,
                        &self.config.enums,
                        self.config.decode.types.as_ref(),
                    )
                    .map(Solution::Assignment),
                    (None, Some(dzn), _) => {
                        decode(&dzn, &mut self.config.enums, &self.config.decode)
                            .map(Solution::Assignment)
                    }
                    (None, None, Some(raw)) => Ok(Solution::Raw(raw)),
                    (None, None, None) => Ok(Solution::Assignment(Assignment::new())),
                };
                match parsed {
                    Ok(solution) => Ok(Some(solution)),
                    Err(err) => {
                        let err = err.with_line(self.line);
                        self.block_failure(index, err, text)
                    }
                }
            }
            StreamRecord::Status { status } => {
                let mapped = Status::from_json_status(&status).unwrap_or_else(|| {
                    debug!(%status, "unrecognized solver status");
                    Status::Unknown
                });
                self.status = Some(mapped);
                Ok(None)
            }
            StreamRecord::Statistics { statistics } => {
                self.statistics.extend(statistics);
                Ok(None)
            }
            StreamRecord::Error { what, message } => {
                let text = match (what, message) {
                    (Some(what), Some(message)) => format!("{what}: {message}"),
                    (None, Some(message)) => message,
                    (Some(what), None) => what,
                    (None, None) => "solver error".to_string(),
                };
                self.diagnostics.push(text);
                self.status = Some(Status::Error);
                Ok(None)
            }
            StreamRecord::Other => Ok(None),
        }
    }

    fn record_statistic(&mut self, stat: &str) {
        let Some((key, value)) = stat.split_once('=') else {
            return;
        };
        let value = value.trim();
        let parsed = from_str::<serde_json::Value>(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        self.statistics.insert(key.trim().to_string(), parsed);
    }
}

/// Parses a complete stream. Under the stop policy the error carries the
/// records parsed before the failure.
pub fn parse_reader<R: BufRead>(reader: R, config: ParserConfig) -> Result<SolutionStream, Error> {
    parse_reader_with(reader, config, |_, _| Ok(()))
}

/// Like [`parse_reader`], calling `on_solution` with each record as soon as
/// its separator is read. An error from the callback ends the parse.
pub fn parse_reader_with<R, F>(
    mut reader: R,
    config: ParserConfig,
    mut on_solution: F,
) -> Result<SolutionStream, Error>
where
    R: BufRead,
    F: FnMut(&Solution, &EnumTable) -> Result<(), Error>,
{
    let mut parser = SolutionParser::new(config);
    let mut solutions = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read solver output")
                .with_source(err)
        })?;
        if read == 0 {
            break;
        }
        match parser.feed_line(&buf) {
            Ok(Some(solution)) => {
                on_solution(&solution, parser.enums())?;
                solutions.push(solution);
            }
            Ok(None) => {}
            Err(err) => return Err(err.with_partial(parser.seal(solutions))),
        }
    }
    Ok(parser.seal(solutions))
}

pub fn parse_str(text: &str, config: ParserConfig) -> Result<SolutionStream, Error> {
    parse_reader(text.as_bytes(), config)
}

#[cfg(test)]
mod tests {
    use super::{
        ErrorPolicy, OutputMode, ParserConfig, SolutionParser, parse_reader_with, parse_str,
    };
    use crate::core::error::ErrorKind;
    use crate::core::solution::{Solution, Status};
    use crate::core::value::Value;

    fn dict() -> ParserConfig {
        ParserConfig::new(OutputMode::Dict)
    }

    #[test]
    fn two_blocks_then_complete() {
        let text = "x = 1;\n----------\nx = 2;\n----------\n==========\n";
        let stream = parse_str(text, dict()).expect("parse");
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.status(), Status::Complete);
        assert_eq!(stream[0].get("x"), Some(&Value::Int(1)));
        assert_eq!(stream[1].get("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn unsatisfiable_without_blocks() {
        let stream = parse_str("=====UNSATISFIABLE=====\n", dict()).expect("parse");
        assert!(stream.is_empty());
        assert_eq!(stream.status(), Status::Unsatisfiable);
    }

    #[test]
    fn missing_terminator_is_incomplete() {
        let stream = parse_str("x = 1;\n----------\nx = 2;\n", dict()).expect("parse");
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.status(), Status::Incomplete);
    }

    #[test]
    fn statistics_are_collected_outside_blocks() {
        let text = "x = 1;\n%%%mzn-stat: nodes=42\n%%%mzn-stat: method=\"satisfy\"\n----------\n==========\n%%%mzn-stat: solveTime=0.25\n";
        let stream = parse_str(text, dict()).expect("parse");
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.statistic("nodes"), Some(&serde_json::json!(42)));
        assert_eq!(stream.statistic("method"), Some(&serde_json::json!("satisfy")));
        assert_eq!(stream.statistic("solveTime"), Some(&serde_json::json!(0.25)));
    }

    #[test]
    fn stop_policy_reports_the_block_line() {
        let text = "x = 1;\n----------\n\nx = ;\n----------\nx = 3;\n----------\n";
        let err = parse_str(text, dict()).expect_err("bad block");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.line(), Some(4));
        let partial = err.partial().expect("partial stream");
        assert_eq!(partial.len(), 1);
        assert_eq!(partial.status(), Status::Incomplete);
    }

    #[test]
    fn skip_policy_keeps_later_blocks() {
        let text = "x = 1;\n----------\nx = ;\n----------\nx = 3;\n----------\n==========\n";
        let config = dict().with_errors(ErrorPolicy::Skip);
        let stream = parse_str(text, config).expect("parse");
        assert_eq!(stream.len(), 2);
        assert_eq!(stream[1].get("x"), Some(&Value::Int(3)));
        assert_eq!(stream.skipped().len(), 1);
        assert_eq!(stream.skipped()[0].index, 1);
        assert_eq!(stream.skipped()[0].line, 3);
        assert_eq!(stream.status(), Status::Complete);
    }

    #[test]
    fn raw_blocks_bypass_decoding() {
        let text = "anything at all {\n----------\n=====UNKNOWN=====\n";
        let stream = parse_str(text, ParserConfig::new(OutputMode::Raw)).expect("parse");
        assert_eq!(stream[0], Solution::Raw("anything at all {".to_string()));
        assert_eq!(stream.status(), Status::Unknown);
    }

    #[test]
    fn json_blocks_decode_objects() {
        let text = "{\n  \"x\": 1,\n  \"s\": {\"set\": [[1, 3]]}\n}\n----------\n==========\n";
        let stream = parse_str(text, ParserConfig::new(OutputMode::Json)).expect("parse");
        assert_eq!(stream[0].get("x"), Some(&Value::Int(1)));
        assert_eq!(stream[0].get("s"), Some(&Value::int_set([1, 2, 3])));
    }

    #[test]
    fn json_lines_records() {
        let text = concat!(
            "{\"type\":\"solution\",\"output\":{\"json\":{\"x\":1}}}\n",
            "{\"type\":\"comment\",\"comment\":\"% hello\"}\n",
            "{\"type\":\"solution\",\"output\":{\"json\":{\"x\":2}}}\n",
            "{\"type\":\"statistics\",\"statistics\":{\"nodes\":7}}\n",
            "{\"type\":\"status\",\"status\":\"OPTIMAL_SOLUTION\"}\n",
        );
        let stream = parse_str(text, ParserConfig::new(OutputMode::JsonLines)).expect("parse");
        assert_eq!(stream.len(), 2);
        assert_eq!(stream[1].get("x"), Some(&Value::Int(2)));
        assert_eq!(stream.status(), Status::Complete);
        assert_eq!(stream.statistic("nodes"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn callback_sees_records_in_order_and_can_stop() {
        let text = "x = 1;\n----------\nx = 2;\n----------\n==========\n";
        let mut seen = Vec::new();
        let stream = parse_reader_with(text.as_bytes(), dict(), |solution, _| {
            seen.push(solution.get("x").cloned());
            Ok(())
        })
        .expect("parse");
        assert_eq!(seen, vec![Some(Value::Int(1)), Some(Value::Int(2))]);
        assert_eq!(stream.len(), 2);

        let err = parse_reader_with(text.as_bytes(), dict(), |_, _| {
            Err(crate::core::error::Error::new(ErrorKind::Io).with_message("closed"))
        })
        .expect_err("callback error");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn json_lines_mode_does_not_buffer_dzn_blocks() {
        let text = concat!(
            "x = 1;\n",
            "----------\n",
            "{\"type\":\"solution\",\"output\":{\"json\":{\"x\":3}}}\n",
        );
        let config = ParserConfig::new(OutputMode::JsonLines).with_errors(ErrorPolicy::Skip);
        let stream = parse_str(text, config).expect("parse");
        assert_eq!(stream.len(), 1);
        assert_eq!(stream[0].get("x"), Some(&Value::Int(3)));
        assert_eq!(stream.skipped().len(), 2);
        assert_eq!(stream.skipped()[1].snippet, "----------");
    }

    #[test]
    fn raw_blocks_keep_interior_blank_lines() {
        let text = "\nline one\n\nline two\n----------\n";
        let stream = parse_str(text, ParserConfig::new(OutputMode::Raw)).expect("parse");
        assert_eq!(stream[0].as_raw(), Some("line one\n\nline two"));
        assert_eq!(stream.status(), Status::Incomplete);
    }

    #[test]
    fn json_lines_error_records_set_error_status() {
        let text = "{\"type\":\"error\",\"what\":\"type error\",\"message\":\"bad\"}\n";
        let stream = parse_str(text, ParserConfig::new(OutputMode::JsonLines)).expect("parse");
        assert_eq!(stream.status(), Status::Error);
        assert_eq!(stream.stderr(), Some("type error: bad"));
    }

    #[test]
    fn invalid_bytes_are_decoded_lossily() {
        let mut parser = SolutionParser::new(ParserConfig::new(OutputMode::Raw));
        assert!(parser.feed_line(b"caf\xff\n").expect("line").is_none());
        let solution = parser.feed_line(b"----------\n").expect("sep").expect("record");
        assert_eq!(solution.as_raw(), Some("caf\u{fffd}"));
        assert_eq!(parser.status(), None);
    }
}
