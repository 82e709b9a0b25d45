//! Purpose: Blocking solver runner exposed as a lazy iterator of records.
//! Exports: `Solutions`.
//! Role: Sync half of the pipeline; a reader thread feeds stdout lines over a bounded channel.
//! Invariants: Dropping an unfinished `Solutions` kills the solver and counts as cancellation.
//! Invariants: Kills target the solver's process group; waiting on pipes after a kill is bounded.
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::isolation::ArtifactGuard;
use crate::core::parser::SolutionParser;
use crate::core::solution::{Solution, SolutionStream};
use crate::pipeline::process::{CancelHandle, ProcessGroup, isolate};
use crate::pipeline::toolchain::describe;
use crate::pipeline::{abort, cancelled_error, conclude, read_error, spawn_error};

const LINE_BUFFER: usize = 256;
/// How long to wait for stderr once the solver itself has exited.
pub(crate) const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Records of a running invocation. Iteration ends at the end of the stream
/// or at the first failure; `into_stream` returns the sealed result.
#[derive(Debug)]
pub struct Solutions {
    run: Option<Run>,
    outcome: Option<Result<SolutionStream, Error>>,
}

#[derive(Debug)]
struct Run {
    child: Child,
    group: Arc<ProcessGroup>,
    lines: Receiver<std::io::Result<Vec<u8>>>,
    stderr: Receiver<Vec<u8>>,
    parser: SolutionParser,
    collected: Vec<Solution>,
    guard: ArtifactGuard,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl Solutions {
    pub(crate) fn spawn(
        mut command: Command,
        parser: SolutionParser,
        guard: ArtifactGuard,
        timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate(&mut command);
        let line = describe(&command);
        debug!(command = %line, token = %guard.token(), "starting solver");
        let mut child = command.spawn().map_err(|err| spawn_error(&line, err))?;
        let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::new(ErrorKind::Internal).with_message("solver pipes were not captured"));
        };
        let group = ProcessGroup::new(Some(child.id()));

        let (sender, lines) = mpsc::sync_channel(LINE_BUFFER);
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut buf = Vec::new();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if sender.send(Ok(buf)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = sender.send(Err(err));
                        break;
                    }
                }
            }
        });
        let (stderr_sender, stderr_text) = mpsc::sync_channel(1);
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            let _ = stderr_sender.send(buf);
        });

        Ok(Self {
            run: Some(Run {
                child,
                group,
                lines,
                stderr: stderr_text,
                parser,
                collected: Vec::new(),
                guard,
                deadline: timeout.map(|timeout| Instant::now() + timeout),
                timed_out: false,
            }),
            outcome: None,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.run.is_none()
    }

    /// Handle for stopping this run from another thread. `None` once finished.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.run
            .as_ref()
            .map(|run| CancelHandle::new(run.group.clone()))
    }

    /// Drains the remaining records and returns the sealed, checked stream.
    pub fn into_stream(mut self) -> Result<SolutionStream, Error> {
        while self.next().is_some() {}
        self.outcome.take().unwrap_or_else(|| {
            Err(Error::new(ErrorKind::Internal).with_message("solver run ended without an outcome"))
        })
    }

    fn settle(&mut self, failure: Option<Error>) {
        if let Some(run) = self.run.take() {
            self.outcome = Some(run.finish(failure));
        }
    }
}

impl Iterator for Solutions {
    type Item = Solution;

    fn next(&mut self) -> Option<Solution> {
        loop {
            let run = self.run.as_mut()?;
            let line = match run.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.settle(None);
                    return None;
                }
                Err(err) => {
                    self.settle(Some(err));
                    return None;
                }
            };
            match run.parser.feed_line(&line) {
                Ok(Some(solution)) => {
                    run.collected.push(solution.clone());
                    return Some(solution);
                }
                Ok(None) => {}
                Err(err) => {
                    self.settle(Some(err));
                    return None;
                }
            }
        }
    }
}

impl Drop for Solutions {
    fn drop(&mut self) {
        if let Some(mut run) = self.run.take() {
            debug!(token = %run.guard.token(), "solver run dropped before completion");
            run.group.kill();
            let _ = run.child.kill();
            run.group.release();
            let _ = run.child.wait();
        }
    }
}

impl Run {
    /// `Ok(None)` at end of output or once the deadline passed.
    fn next_line(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let received = match self.deadline {
            None => self.lines.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => self
                .lines
                .recv_timeout(deadline.saturating_duration_since(Instant::now())),
        };
        match received {
            Ok(Ok(line)) => Ok(Some(line)),
            Ok(Err(err)) => Err(read_error(err)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => {
                warn!(token = %self.guard.token(), "timeout expired; killing solver");
                self.timed_out = true;
                self.group.kill();
                let _ = self.child.kill();
                Ok(None)
            }
        }
    }

    fn finish(mut self, failure: Option<Error>) -> Result<SolutionStream, Error> {
        if failure.is_some() {
            self.group.kill();
            let _ = self.child.kill();
        }
        self.group.release();
        let exit = self.child.wait();
        // Unblocks the reader thread if it is waiting on a full channel.
        drop(self.lines);
        // A detached grandchild may still hold the pipe; its output is not waited for.
        let stderr = self
            .stderr
            .recv_timeout(STDERR_GRACE)
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default();
        let failure = match failure {
            None if self.group.is_cancelled() => Some(cancelled_error()),
            failure => failure,
        };
        match failure {
            Some(err) => abort(err, self.parser, self.collected, stderr, self.guard),
            None => conclude(
                self.parser,
                self.collected,
                exit,
                stderr,
                self.timed_out,
                self.guard,
            ),
        }
    }
}
