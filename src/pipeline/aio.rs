//! Purpose: Async solver runner on tokio, exposed as a `Stream` of records.
//! Exports: `AsyncSolutions`.
//! Role: Async half of the pipeline; one driver task owns the child and the parser.
//! Invariants: Dropping an unfinished `AsyncSolutions` aborts the driver, which kills the solver.
//! Invariants: The driver applies the cleanup policy before reporting its outcome.
//! Invariants: Kills target the solver's process group; waiting on stderr after exit is bounded.
use std::pin::Pin;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::isolation::ArtifactGuard;
use crate::core::parser::SolutionParser;
use crate::core::solution::{Solution, SolutionStream};
use crate::pipeline::process::{CancelHandle, ProcessGroup, isolate};
use crate::pipeline::run::STDERR_GRACE;
use crate::pipeline::toolchain::describe;
use crate::pipeline::{abort, cancelled_error, conclude, flatten_error, read_error, spawn_error};

const EVENT_BUFFER: usize = 64;

#[derive(Debug)]
enum Event {
    Solution(Solution),
    Done(Result<SolutionStream, Error>),
}

/// Records of a running invocation as an async stream. The stream ends at the
/// end of the solver output or at the first failure.
#[derive(Debug)]
pub struct AsyncSolutions {
    events: mpsc::Receiver<Event>,
    outcome: Option<Result<SolutionStream, Error>>,
    group: Arc<ProcessGroup>,
    driver: JoinHandle<()>,
}

impl AsyncSolutions {
    pub(crate) fn spawn(
        mut command: Command,
        parser: SolutionParser,
        guard: ArtifactGuard,
        timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        isolate(&mut command);
        let line = describe(&command);
        let mut command = tokio::process::Command::from(command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(command = %line, token = %guard.token(), "starting solver");
        let mut child = command.spawn().map_err(|err| spawn_error(&line, err))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::new(ErrorKind::Internal).with_message("solver pipes were not captured"));
        };
        let group = ProcessGroup::new(child.id());
        let (sender, events) = mpsc::channel(EVENT_BUFFER);
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let driver = tokio::spawn(drive(Driver {
            child,
            group: group.clone(),
            stdout,
            stderr,
            parser,
            guard,
            deadline,
            events: sender,
        }));
        Ok(Self {
            events,
            outcome: None,
            group,
            driver,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.group.clone())
    }

    /// Drains the remaining records and returns the sealed, checked stream.
    pub async fn into_stream(mut self) -> Result<SolutionStream, Error> {
        while self.next().await.is_some() {}
        self.outcome.take().unwrap_or_else(|| {
            Err(Error::new(ErrorKind::Internal).with_message("solver run ended without an outcome"))
        })
    }
}

impl Stream for AsyncSolutions {
    type Item = Solution;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Solution>> {
        let this = self.get_mut();
        if this.outcome.is_some() {
            return Poll::Ready(None);
        }
        match this.events.poll_recv(cx) {
            Poll::Ready(Some(Event::Solution(solution))) => Poll::Ready(Some(solution)),
            Poll::Ready(Some(Event::Done(result))) => {
                this.outcome = Some(result);
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.outcome = Some(Err(Error::new(ErrorKind::Internal)
                    .with_message("solver task stopped without reporting an outcome")));
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for AsyncSolutions {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.group.kill();
            self.driver.abort();
        }
    }
}

pub(super) async fn run_flatten(command: Command) -> Result<(), Error> {
    let line = describe(&command);
    let mut command = tokio::process::Command::from(command);
    command.stdin(Stdio::null()).kill_on_drop(true);
    debug!(command = %line, "flattening model");
    let output = command
        .output()
        .await
        .map_err(|err| spawn_error(&line, err))?;
    if !output.status.success() {
        return Err(flatten_error(output.status, &output.stderr));
    }
    Ok(())
}

struct Driver {
    child: Child,
    group: Arc<ProcessGroup>,
    stdout: ChildStdout,
    stderr: ChildStderr,
    parser: SolutionParser,
    guard: ArtifactGuard,
    deadline: Option<Instant>,
    events: mpsc::Sender<Event>,
}

async fn drive(driver: Driver) {
    let Driver {
        mut child,
        group,
        stdout,
        mut stderr,
        mut parser,
        guard,
        deadline,
        events,
    } = driver;
    let mut stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    let mut reader = BufReader::new(stdout);
    let mut collected = Vec::new();
    let mut failure = None;
    let mut timed_out = false;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, reader.read_until(b'\n', &mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        warn!(token = %guard.token(), "timeout expired; killing solver");
                        timed_out = true;
                        group.kill();
                        break;
                    }
                }
            }
            None => reader.read_until(b'\n', &mut buf).await,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                failure = Some(read_error(err));
                break;
            }
        }
        match parser.feed_line(&buf) {
            Ok(Some(solution)) => {
                collected.push(solution.clone());
                if events.send(Event::Solution(solution)).await.is_err() {
                    // Consumer went away; `guard` drops unfinished and counts as cancellation.
                    debug!(token = %guard.token(), "solution consumer dropped; stopping solver");
                    group.kill();
                    let _ = child.start_kill();
                    group.release();
                    let _ = child.wait().await;
                    stderr_task.abort();
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    if timed_out || failure.is_some() {
        group.kill();
        let _ = child.start_kill();
    }
    group.release();
    let exit = child.wait().await;
    let stderr = match tokio::time::timeout(STDERR_GRACE, &mut stderr_task).await {
        Ok(Ok(buf)) => String::from_utf8_lossy(&buf).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            // A detached grandchild still holds the pipe.
            stderr_task.abort();
            String::new()
        }
    };
    let failure = match failure {
        None if group.is_cancelled() => Some(cancelled_error()),
        failure => failure,
    };
    let result = match failure {
        Some(err) => abort(err, parser, collected, stderr, guard),
        None => conclude(parser, collected, exit, stderr, timed_out, guard),
    };
    let _ = events.send(Event::Done(result)).await;
}
