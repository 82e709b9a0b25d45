//! Purpose: Orchestrate one solving invocation: stage, flatten, solve, parse, clean up.
//! Exports: `Pipeline`, `ModelSource`, `Instance`, `Solutions`, `AsyncSolutions`, `CancelHandle`, config and toolchain types.
//! Role: Glue between the codec, the stream parser, the isolation layer, and external executables.
//! Invariants: Every invocation owns a fresh token; artifacts never collide across invocations.
//! Invariants: Cleanup runs exactly once per invocation, on success, failure, or cancellation.
//! Invariants: Errors raised after records were parsed carry the partial stream.
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::artifact_paths::{artifact_base, artifact_dir};
use crate::core::encode::{EncodeOptions, encode_data};
use crate::core::error::{Error, ErrorKind};
use crate::core::isolation::{ArtifactGuard, ArtifactKind, ArtifactSet, next_token};
use crate::core::parser::{ParserConfig, SolutionParser};
use crate::core::solution::{Solution, SolutionStream};
use crate::core::value::{Assignment, Value};

mod aio;
pub mod config;
mod process;
mod run;
pub mod toolchain;

pub use aio::AsyncSolutions;
pub use config::{PipelineConfig, SolveOptions};
pub use process::CancelHandle;
pub use run::Solutions;
pub use toolchain::{FlattenJob, MiniZinc, SolveJob, Toolchain};

use toolchain::describe;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModelSource {
    File(PathBuf),
    /// Model text; written to a `.mzn` artifact for the invocation.
    Inline(String),
}

impl ModelSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ModelSource::File(path.into())
    }

    pub fn inline(text: impl Into<String>) -> Self {
        ModelSource::Inline(text.into())
    }

    fn path(&self) -> Option<&Path> {
        match self {
            ModelSource::File(path) => Some(path),
            ModelSource::Inline(_) => None,
        }
    }
}

/// Data for one invocation: dzn files plus native values to encode.
#[derive(Clone, Debug, Default)]
pub struct Instance {
    pub data_files: Vec<PathBuf>,
    pub data: Assignment,
}

impl Instance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_files.push(path.into());
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name, value.into());
        self
    }

    pub fn with_data(mut self, data: Assignment) -> Self {
        for (name, value) in data.iter() {
            self.data.insert(name, value.clone());
        }
        self
    }
}

/// A prepared invocation: artifacts written, commands built, nothing spawned.
struct Staged {
    guard: ArtifactGuard,
    flatten: Command,
    solve: Command,
}

#[derive(Clone, Debug)]
pub struct Pipeline {
    toolchain: Arc<dyn Toolchain>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Pipeline backed by the `minizinc` driver resolved from the environment.
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_toolchain(MiniZinc::from_env(), config)
    }

    pub fn with_toolchain(toolchain: impl Toolchain + 'static, config: PipelineConfig) -> Self {
        Self {
            toolchain: Arc::new(toolchain),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn toolchain(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }

    /// Runs the invocation to completion and returns the checked stream.
    pub fn solve(&self, model: &ModelSource, instance: &Instance) -> Result<SolutionStream, Error> {
        self.solve_iter(model, instance)?.into_stream()
    }

    /// Starts the invocation and yields records as the solver prints them.
    pub fn solve_iter(&self, model: &ModelSource, instance: &Instance) -> Result<Solutions, Error> {
        let Staged {
            guard,
            flatten,
            solve,
        } = self.stage(model, instance)?;
        if let Err(err) = run_flatten(flatten) {
            guard.finish_err();
            return Err(err);
        }
        Solutions::spawn(solve, self.parser(), guard, self.config.timeout)
    }

    /// Async counterpart of `solve`.
    pub async fn solve_async(
        &self,
        model: &ModelSource,
        instance: &Instance,
    ) -> Result<SolutionStream, Error> {
        self.solve_stream_async(model, instance)
            .await?
            .into_stream()
            .await
    }

    /// Async counterpart of `solve_iter`; dropping the stream kills the solver.
    pub async fn solve_stream_async(
        &self,
        model: &ModelSource,
        instance: &Instance,
    ) -> Result<AsyncSolutions, Error> {
        let Staged {
            guard,
            flatten,
            solve,
        } = self.stage(model, instance)?;
        if let Err(err) = aio::run_flatten(flatten).await {
            guard.finish_err();
            return Err(err);
        }
        AsyncSolutions::spawn(solve, self.parser(), guard, self.config.timeout)
    }

    fn parser(&self) -> SolutionParser {
        SolutionParser::new(
            ParserConfig::new(self.config.mode)
                .with_errors(self.config.errors)
                .with_decode(self.config.decode.clone())
                .with_enums(self.config.enums.clone()),
        )
    }

    fn stage(&self, model: &ModelSource, instance: &Instance) -> Result<Staged, Error> {
        let config = &self.config;
        let model_path = model.path();
        let dir = artifact_dir(config.output_dir.as_deref(), model_path, config.cleanup.keep);
        std::fs::create_dir_all(&dir).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create artifact directory")
                .with_path(&dir)
                .with_source(err)
        })?;
        let set = ArtifactSet::new(dir, artifact_base(model_path), next_token());
        let mut guard = ArtifactGuard::new(set, config.cleanup);
        debug!(token = %guard.token(), dir = %guard.set().dir().display(), "staging invocation");

        let model_file = match model {
            ModelSource::File(path) => path.clone(),
            ModelSource::Inline(text) => guard.create(ArtifactKind::Model, text.as_bytes())?,
        };

        let mut data_files = instance.data_files.clone();
        let mut inline_data = None;
        if !instance.data.is_empty() {
            let encoded = encode_data(&instance.data, &config.enums, EncodeOptions::default())?;
            if encoded.len() < config.arg_limit {
                inline_data = Some(encoded);
            } else {
                debug!(bytes = encoded.len(), "data exceeds the argument limit; writing a data file");
                data_files.push(guard.create(ArtifactKind::Data, encoded.as_bytes())?);
            }
        }

        let fzn = guard.reserve(ArtifactKind::Flat);
        let ozn = guard.reserve(ArtifactKind::Output);
        let flatten = self.toolchain.flatten_command(&FlattenJob {
            model: &model_file,
            data_files: &data_files,
            inline_data: inline_data.as_deref(),
            include_dirs: &config.include_dirs,
            solver: &config.solver,
            fzn: &fzn,
            ozn: &ozn,
        });
        let solve = self.toolchain.solve_command(&SolveJob {
            fzn: &fzn,
            ozn: &ozn,
            solver: &config.solver,
            options: &config.solve,
            mode: config.mode,
        });
        Ok(Staged {
            guard,
            flatten,
            solve,
        })
    }
}

fn run_flatten(mut command: Command) -> Result<(), Error> {
    command.stdin(std::process::Stdio::null());
    let line = describe(&command);
    debug!(command = %line, "flattening model");
    let output = command.output().map_err(|err| spawn_error(&line, err))?;
    if !output.status.success() {
        return Err(flatten_error(output.status, &output.stderr));
    }
    Ok(())
}

pub(crate) fn spawn_error(command: &str, err: io::Error) -> Error {
    Error::new(ErrorKind::Execution)
        .with_message(format!("failed to start `{command}`"))
        .with_hint("Install MiniZinc or point MZNPIPE_MINIZINC at the driver.")
        .with_source(err)
}

pub(crate) fn flatten_error(status: ExitStatus, stderr: &[u8]) -> Error {
    warn!(status = %status, "flattening failed");
    Error::new(ErrorKind::Execution)
        .with_message(format!("flattening failed ({status})"))
        .with_exit_code(status.code())
        .with_stderr(String::from_utf8_lossy(stderr))
}

pub(crate) fn cancelled_error() -> Error {
    Error::new(ErrorKind::Execution)
        .with_message("solver run cancelled")
        .with_hint("Intermediate files are kept unless keep_on_error is disabled.")
}

pub(crate) fn read_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to read solver output")
        .with_source(err)
}

/// Ends an invocation that failed mid-stream (parse error under the stop
/// policy, read failure). Artifacts follow the failure path.
pub(crate) fn abort(
    err: Error,
    parser: SolutionParser,
    solutions: Vec<Solution>,
    stderr: String,
    guard: ArtifactGuard,
) -> Result<SolutionStream, Error> {
    let partial = parser.seal(solutions).with_stderr(stderr.clone());
    guard.finish_err();
    Err(err.with_stderr(stderr).with_partial(partial))
}

/// Seals the stream of a finished solver and applies the cleanup policy
/// according to the outcome.
pub(crate) fn conclude(
    parser: SolutionParser,
    solutions: Vec<Solution>,
    exit: io::Result<ExitStatus>,
    stderr: String,
    timed_out: bool,
    guard: ArtifactGuard,
) -> Result<SolutionStream, Error> {
    let stream = parser.seal(solutions).with_stderr(stderr.clone());
    let result = match exit {
        Err(err) => Err(Error::new(ErrorKind::Io)
            .with_message("failed to wait for the solver")
            .with_source(err)
            .with_partial(stream)),
        Ok(status) if !status.success() && !timed_out => {
            warn!(status = %status, solutions = stream.len(), "solver exited with a failure status");
            Err(Error::new(ErrorKind::Execution)
                .with_message(format!("solver failed ({status})"))
                .with_exit_code(status.code())
                .with_stderr(stderr)
                .with_partial(stream))
        }
        Ok(_) if timed_out => {
            warn!(solutions = stream.len(), "solver killed after the timeout");
            stream
                .check()
                .map_err(|err| err.with_hint("The solver was killed when the timeout expired."))
        }
        Ok(_) => stream.check(),
    };
    let retained = if result.is_ok() {
        guard.finish_ok()
    } else {
        guard.finish_err()
    };
    debug!(retained = retained.len(), ok = result.is_ok(), "invocation finished");
    result
}
