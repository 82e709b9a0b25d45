//! Purpose: Configuration for pipeline runs with environment-backed defaults.
//! Exports: `PipelineConfig`, `SolveOptions`, `DEFAULT_ARG_LIMIT`, env var names.
//! Role: Plain data consumed by `Pipeline`; the CLI maps flags onto it.
//! Invariants: Defaults never touch the filesystem; env vars are read only by `from_env`.
use std::path::PathBuf;
use std::time::Duration;

use crate::core::decode::DecodeOptions;
use crate::core::isolation::CleanupPolicy;
use crate::core::parser::{ErrorPolicy, OutputMode};
use crate::core::value::EnumTable;

/// Inline data at or above this many bytes is written to a `.dzn` artifact instead.
pub const DEFAULT_ARG_LIMIT: usize = 2048;
pub const DEFAULT_SOLVER: &str = "gecode";
pub const ENV_MINIZINC: &str = "MZNPIPE_MINIZINC";
pub const ENV_SOLVER: &str = "MZNPIPE_SOLVER";

/// Search options forwarded to the solver collaborator.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SolveOptions {
    pub all_solutions: bool,
    pub num_solutions: Option<u32>,
    pub parallel: Option<u32>,
    pub seed: Option<u64>,
    pub statistics: bool,
    /// Solver-side time limit; the solver stops itself and reports what it has.
    pub time_limit: Option<Duration>,
    pub extra_args: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub solver: String,
    pub mode: OutputMode,
    pub errors: ErrorPolicy,
    pub decode: DecodeOptions,
    /// Enum declarations used to encode data and decode solutions.
    pub enums: EnumTable,
    pub solve: SolveOptions,
    pub cleanup: CleanupPolicy,
    /// Where artifacts are written; see `artifact_paths::artifact_dir` for the fallback.
    pub output_dir: Option<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub arg_limit: usize,
    /// Wall-clock deadline after which the solver process is killed.
    pub timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            solver: DEFAULT_SOLVER.to_string(),
            mode: OutputMode::default(),
            errors: ErrorPolicy::default(),
            decode: DecodeOptions::default(),
            enums: EnumTable::new(),
            solve: SolveOptions::default(),
            cleanup: CleanupPolicy::default(),
            output_dir: None,
            include_dirs: Vec::new(),
            arg_limit: DEFAULT_ARG_LIMIT,
            timeout: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with the solver taken from `MZNPIPE_SOLVER` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(solver) = std::env::var(ENV_SOLVER).ok().filter(|value| !value.is_empty()) {
            config.solver = solver;
        }
        config
    }

    pub fn with_solver(mut self, solver: impl Into<String>) -> Self {
        self.solver = solver.into();
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
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

    pub fn with_solve_options(mut self, solve: SolveOptions) -> Self {
        self.solve = solve;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_keep(mut self, keep: bool) -> Self {
        self.cleanup.keep = keep;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn with_arg_limit(mut self, limit: usize) -> Self {
        self.arg_limit = limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{DEFAULT_ARG_LIMIT, DEFAULT_SOLVER, PipelineConfig};
    use crate::core::parser::OutputMode;

    #[test]
    fn defaults_retain_on_error_and_delete_on_success() {
        let config = PipelineConfig::default();
        assert_eq!(config.solver, DEFAULT_SOLVER);
        assert_eq!(config.arg_limit, DEFAULT_ARG_LIMIT);
        assert!(!config.cleanup.keep);
        assert!(config.cleanup.keep_on_error);
        assert_eq!(config.mode, OutputMode::Dict);
    }

    #[test]
    fn builders_compose() {
        let config = PipelineConfig::new()
            .with_solver("chuffed")
            .with_keep(true)
            .with_arg_limit(16)
            .with_timeout(Duration::from_secs(2))
            .with_include_dir("/lib");
        assert_eq!(config.solver, "chuffed");
        assert!(config.cleanup.keep);
        assert_eq!(config.arg_limit, 16);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.include_dirs.len(), 1);
    }
}
