//! Purpose: Sealed solution streams: ordered records plus a terminal status.
//! Exports: `Status`, `Solution`, `SolutionStream`, `BlockFailure`, terminator constants.
//! Role: Result type produced by the stream parser and returned by the pipeline.
//! Invariants: Records keep solver emission order; a sealed stream is never mutated.
//! Invariants: `check` turns non-success statuses into errors that carry the stream.
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Assignment, EnumTable, Value};

pub const SOLUTION_SEPARATOR: &str = "----------";
pub const SEARCH_COMPLETE: &str = "==========";
pub const UNSATISFIABLE: &str = "=====UNSATISFIABLE=====";
pub const UNBOUNDED: &str = "=====UNBOUNDED=====";
pub const UNSAT_OR_UNBOUNDED: &str = "=====UNSATorUNBOUNDED=====";
pub const UNKNOWN: &str = "=====UNKNOWN=====";
pub const ERROR: &str = "=====ERROR=====";

/// Prefix of solver statistics lines.
pub const STATISTICS_PREFIX: &str = "%%%mzn-stat:";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Complete,
    Incomplete,
    Unsatisfiable,
    Unbounded,
    UnsatOrUnbounded,
    Unknown,
    Error,
}

impl Status {
    /// Maps a terminator line to the status it seals; the solution separator is not one.
    pub fn from_terminator(line: &str) -> Option<Status> {
        match line {
            SEARCH_COMPLETE => Some(Status::Complete),
            UNSATISFIABLE => Some(Status::Unsatisfiable),
            UNBOUNDED => Some(Status::Unbounded),
            UNSAT_OR_UNBOUNDED => Some(Status::UnsatOrUnbounded),
            UNKNOWN => Some(Status::Unknown),
            ERROR => Some(Status::Error),
            _ => None,
        }
    }

    /// Maps a `--json-stream` status record (`OPTIMAL_SOLUTION`, `ALL_SOLUTIONS`, ...).
    pub fn from_json_status(status: &str) -> Option<Status> {
        match status {
            "ALL_SOLUTIONS" | "OPTIMAL_SOLUTION" => Some(Status::Complete),
            "SATISFIED" => Some(Status::Incomplete),
            "UNSATISFIABLE" => Some(Status::Unsatisfiable),
            "UNBOUNDED" => Some(Status::Unbounded),
            "UNSAT_OR_UNBOUNDED" => Some(Status::UnsatOrUnbounded),
            "UNKNOWN" => Some(Status::Unknown),
            "ERROR" => Some(Status::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Complete => "COMPLETE",
            Status::Incomplete => "INCOMPLETE",
            Status::Unsatisfiable => "UNSATISFIABLE",
            Status::Unbounded => "UNBOUNDED",
            Status::UnsatOrUnbounded => "UNSAT_OR_UNBOUNDED",
            Status::Unknown => "UNKNOWN",
            Status::Error => "ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One solver emission.
#[derive(Clone, Debug, PartialEq)]
pub enum Solution {
    Assignment(Assignment),
    /// Block text kept verbatim (raw output mode).
    Raw(String),
}

impl Solution {
    pub fn as_assignment(&self) -> Option<&Assignment> {
        match self {
            Solution::Assignment(assignment) => Some(assignment),
            Solution::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Solution::Raw(text) => Some(text),
            Solution::Assignment(_) => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.as_assignment()?.get(name)
    }
}

/// A block dropped under the skip policy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BlockFailure {
    /// 0-based position of the block among all blocks seen.
    pub index: usize,
    /// Stream line where the failure was detected.
    pub line: u64,
    pub message: String,
    pub snippet: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolutionStream {
    solutions: Vec<Solution>,
    status: Status,
    statistics: BTreeMap<String, serde_json::Value>,
    stderr: Option<String>,
    skipped: Vec<BlockFailure>,
    enums: EnumTable,
}

impl SolutionStream {
    pub(crate) fn sealed(
        solutions: Vec<Solution>,
        status: Status,
        statistics: BTreeMap<String, serde_json::Value>,
        skipped: Vec<BlockFailure>,
        enums: EnumTable,
    ) -> Self {
        Self {
            solutions,
            status,
            statistics,
            stderr: None,
            skipped,
            enums,
        }
    }

    /// Appends diagnostics; blank text is ignored.
    pub(crate) fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if stderr.trim().is_empty() {
            return self;
        }
        self.stderr = Some(match self.stderr.take() {
            Some(existing) => format!("{}\n{}", existing.trim_end(), stderr),
            None => stderr,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Solution> {
        self.solutions.get(index)
    }

    /// Last emitted record; for optimization runs, the best one found.
    pub fn last(&self) -> Option<&Solution> {
        self.solutions.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Solution> {
        self.solutions.iter()
    }

    pub fn solutions(&self) -> &[Solution] {
        &self.solutions
    }

    pub fn into_solutions(self) -> Vec<Solution> {
        self.solutions
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == Status::Complete
    }

    pub fn statistics(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.statistics
    }

    pub fn statistic(&self, key: &str) -> Option<&serde_json::Value> {
        self.statistics.get(key)
    }

    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    pub fn skipped(&self) -> &[BlockFailure] {
        &self.skipped
    }

    /// Enum declarations needed to render enum values in the records.
    pub fn enums(&self) -> &EnumTable {
        &self.enums
    }

    /// Passes usable streams through and turns the rest into typed errors.
    ///
    /// `Incomplete` is usable when at least one record arrived (e.g. a timeout
    /// after improving solutions); with zero records it is `Unknown`.
    pub fn check(self) -> Result<SolutionStream, Error> {
        let (kind, message) = match self.status {
            Status::Complete => return Ok(self),
            Status::Incomplete if !self.is_empty() => return Ok(self),
            Status::Incomplete => (ErrorKind::Unknown, "solver stopped without a solution"),
            Status::Unknown => (ErrorKind::Unknown, "solver returned no definitive result"),
            Status::Unsatisfiable => (ErrorKind::Unsatisfiable, "problem is unsatisfiable"),
            Status::Unbounded => (ErrorKind::Unbounded, "problem is unbounded"),
            Status::UnsatOrUnbounded => (
                ErrorKind::UnsatOrUnbounded,
                "problem is unsatisfiable or unbounded",
            ),
            Status::Error => (ErrorKind::Execution, "solver reported an error"),
        };
        let mut err = Error::new(kind).with_message(message);
        if let Some(stderr) = self.stderr() {
            err = err.with_stderr(stderr);
        }
        Err(err.with_partial(self))
    }
}

impl Index<usize> for SolutionStream {
    type Output = Solution;

    fn index(&self, index: usize) -> &Self::Output {
        &self.solutions[index]
    }
}

impl<'a> IntoIterator for &'a SolutionStream {
    type Item = &'a Solution;
    type IntoIter = std::slice::Iter<'a, Solution>;

    fn into_iter(self) -> Self::IntoIter {
        self.solutions.iter()
    }
}

impl IntoIterator for SolutionStream {
    type Item = Solution;
    type IntoIter = std::vec::IntoIter<Solution>;

    fn into_iter(self) -> Self::IntoIter {
        self.solutions.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{Solution, SolutionStream, Status};
    use crate::core::error::ErrorKind;
    use crate::core::value::EnumTable;

    fn stream(solutions: usize, status: Status) -> SolutionStream {
        let records = (0..solutions)
            .map(|index| Solution::Raw(format!("x = {index};")))
            .collect();
        SolutionStream::sealed(records, status, BTreeMap::new(), Vec::new(), EnumTable::new())
    }

    #[test]
    fn terminators_map_to_statuses() {
        assert_eq!(Status::from_terminator("=========="), Some(Status::Complete));
        assert_eq!(
            Status::from_terminator("=====UNSATorUNBOUNDED====="),
            Some(Status::UnsatOrUnbounded)
        );
        assert_eq!(Status::from_terminator("----------"), None);
        assert_eq!(Status::from_json_status("OPTIMAL_SOLUTION"), Some(Status::Complete));
    }

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&Status::UnsatOrUnbounded).expect("serialize");
        assert_eq!(json, "\"UNSAT_OR_UNBOUNDED\"");
    }

    #[test]
    fn check_passes_usable_streams() {
        assert!(stream(2, Status::Complete).check().is_ok());
        assert_eq!(stream(1, Status::Incomplete).check().expect("partial").len(), 1);
    }

    #[test]
    fn check_maps_statuses_to_error_kinds() {
        let cases = [
            (Status::Unsatisfiable, ErrorKind::Unsatisfiable),
            (Status::Unbounded, ErrorKind::Unbounded),
            (Status::UnsatOrUnbounded, ErrorKind::UnsatOrUnbounded),
            (Status::Unknown, ErrorKind::Unknown),
            (Status::Incomplete, ErrorKind::Unknown),
            (Status::Error, ErrorKind::Execution),
        ];
        for (status, kind) in cases {
            let err = stream(0, status).check().expect_err("error status");
            assert_eq!(err.kind(), kind);
            assert_eq!(err.partial().map(SolutionStream::status), Some(status));
        }
    }

    #[test]
    fn unknown_with_records_keeps_them_on_the_error() {
        let err = stream(3, Status::Unknown).check().expect_err("unknown");
        let partial = err.into_partial().expect("partial");
        assert_eq!(partial.len(), 3);
        assert_eq!(partial[2].as_raw(), Some("x = 2;"));
    }
}
