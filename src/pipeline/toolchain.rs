//! Purpose: Command construction for the flattening and solving collaborators.
//! Exports: `Toolchain`, `MiniZinc`, `FlattenJob`, `SolveJob`, `describe`.
//! Role: Seam between the pipeline and external executables; fakes implement it in tests.
//! Invariants: Commands are built, never run, here; the runners own process lifetimes.
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::parser::OutputMode;
use crate::pipeline::config::{ENV_MINIZINC, SolveOptions};

/// Inputs of the flattening step.
#[derive(Debug)]
pub struct FlattenJob<'a> {
    pub model: &'a Path,
    pub data_files: &'a [PathBuf],
    /// Encoded data passed on the command line (`-D`).
    pub inline_data: Option<&'a str>,
    pub include_dirs: &'a [PathBuf],
    pub solver: &'a str,
    pub fzn: &'a Path,
    pub ozn: &'a Path,
}

/// Inputs of the solving step.
#[derive(Debug)]
pub struct SolveJob<'a> {
    pub fzn: &'a Path,
    pub ozn: &'a Path,
    pub solver: &'a str,
    pub options: &'a SolveOptions,
    pub mode: OutputMode,
}

pub trait Toolchain: fmt::Debug + Send + Sync {
    /// Command that writes `job.fzn` and `job.ozn` and exits 0 on success.
    fn flatten_command(&self, job: &FlattenJob<'_>) -> Command;

    /// Command that prints the solution stream on stdout.
    fn solve_command(&self, job: &SolveJob<'_>) -> Command;
}

/// The `minizinc` driver.
#[derive(Clone, Debug)]
pub struct MiniZinc {
    executable: PathBuf,
}

impl MiniZinc {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Uses `MZNPIPE_MINIZINC` when set, else `minizinc` from `PATH`.
    pub fn from_env() -> Self {
        let executable = std::env::var_os(ENV_MINIZINC)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("minizinc"));
        Self::new(executable)
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl Default for MiniZinc {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Toolchain for MiniZinc {
    fn flatten_command(&self, job: &FlattenJob<'_>) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg("--solver")
            .arg(job.solver)
            .arg("-c")
            .arg("--fzn")
            .arg(job.fzn)
            .arg("--ozn")
            .arg(job.ozn);
        for dir in job.include_dirs {
            command.arg("-I").arg(dir);
        }
        if let Some(data) = job.inline_data {
            command.arg("-D").arg(data);
        }
        command.arg(job.model);
        command.args(job.data_files);
        command
    }

    fn solve_command(&self, job: &SolveJob<'_>) -> Command {
        let options = job.options;
        let mut command = Command::new(&self.executable);
        command.arg("--solver").arg(job.solver);
        if options.all_solutions {
            command.arg("-a");
        }
        if let Some(count) = options.num_solutions {
            command.arg("-n").arg(count.to_string());
        }
        if let Some(threads) = options.parallel {
            command.arg("-p").arg(threads.to_string());
        }
        if let Some(seed) = options.seed {
            command.arg("-r").arg(seed.to_string());
        }
        if options.statistics {
            command.arg("-s");
        }
        if let Some(limit) = options.time_limit {
            command.arg("--time-limit").arg(limit.as_millis().to_string());
        }
        match job.mode {
            OutputMode::Dict => {
                command.args(["--output-mode", "dzn"]);
            }
            OutputMode::Json => {
                command.args(["--output-mode", "json"]);
            }
            OutputMode::JsonLines => {
                command.args(["--output-mode", "json", "--json-stream"]);
            }
            OutputMode::Raw => {}
        }
        command.args(&options.extra_args);
        command.arg("--ozn-file").arg(job.ozn);
        command.arg(job.fzn);
        command
    }
}

/// Human-readable command line for logs and error messages.
pub fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::{FlattenJob, MiniZinc, SolveJob, Toolchain, describe};
    use crate::core::parser::OutputMode;
    use crate::pipeline::config::SolveOptions;

    #[test]
    fn flatten_passes_inline_data_and_includes() {
        let includes = vec![PathBuf::from("lib")];
        let data_files = vec![PathBuf::from("extra.dzn")];
        let job = FlattenJob {
            model: Path::new("m.mzn"),
            data_files: &data_files,
            inline_data: Some("n = 3;"),
            include_dirs: &includes,
            solver: "gecode",
            fzn: Path::new("m_1_0.fzn"),
            ozn: Path::new("m_1_0.ozn"),
        };
        let command = MiniZinc::new("minizinc").flatten_command(&job);
        assert_eq!(
            describe(&command),
            "minizinc --solver gecode -c --fzn m_1_0.fzn --ozn m_1_0.ozn -I lib -D n = 3; m.mzn extra.dzn"
        );
    }

    #[test]
    fn solve_maps_options_to_flags() {
        let options = SolveOptions {
            all_solutions: true,
            num_solutions: Some(5),
            seed: Some(7),
            statistics: true,
            time_limit: Some(Duration::from_millis(1500)),
            ..SolveOptions::default()
        };
        let job = SolveJob {
            fzn: Path::new("m.fzn"),
            ozn: Path::new("m.ozn"),
            solver: "chuffed",
            options: &options,
            mode: OutputMode::JsonLines,
        };
        let command = MiniZinc::new("mzn").solve_command(&job);
        assert_eq!(
            describe(&command),
            "mzn --solver chuffed -a -n 5 -r 7 -s --time-limit 1500 --output-mode json --json-stream --ozn-file m.ozn m.fzn"
        );
    }
}
