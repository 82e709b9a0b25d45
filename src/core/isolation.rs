//! Purpose: Collision-free artifact names per solving invocation and their cleanup.
//! Exports: `Token`, `TokenSource`, `next_token`, `ArtifactKind`, `ArtifactSet`, `CleanupPolicy`, `ArtifactGuard`.
//! Role: Isolation layer between concurrent invocations of the same model.
//! Invariants: Tokens come from one atomic increment; a value is never handed out twice.
//! Invariants: Every artifact an invocation creates is registered with its guard.
//! Invariants: Success deletes artifacts unless `keep`; failure or cancellation retains them by default.
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};

/// Opaque per-invocation isolation token.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Token(u64);

impl Token {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strictly increasing token counter. The counter itself is never exposed.
#[derive(Debug, Default)]
pub struct TokenSource {
    next: AtomicU64,
}

impl TokenSource {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_token(&self) -> Token {
        // Only uniqueness matters; no other memory is published through the counter.
        Token(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

static PROCESS_TOKENS: TokenSource = TokenSource::new();

/// Next token from the process-wide source.
pub fn next_token() -> Token {
    PROCESS_TOKENS.next_token()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    Model,
    Data,
    Flat,
    Output,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Model => "mzn",
            ArtifactKind::Data => "dzn",
            ArtifactKind::Flat => "fzn",
            ArtifactKind::Output => "ozn",
        }
    }
}

/// Names and registry of one invocation's artifacts.
#[derive(Clone, Debug)]
pub struct ArtifactSet {
    dir: PathBuf,
    base: String,
    token: Token,
    registered: Vec<PathBuf>,
}

impl ArtifactSet {
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>, token: Token) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
            token,
            registered: Vec::new(),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{base}_{pid}_{token}.{ext}` inside the artifact directory.
    pub fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.{}",
            self.base,
            std::process::id(),
            self.token,
            kind.extension()
        ))
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.registered.contains(&path) {
            self.registered.push(path);
        }
    }

    pub fn registered(&self) -> &[PathBuf] {
        &self.registered
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CleanupPolicy {
    /// Retain artifacts even after a successful invocation.
    pub keep: bool,
    /// Retain artifacts when the invocation fails or is cancelled.
    pub keep_on_error: bool,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            keep: false,
            keep_on_error: true,
        }
    }
}

/// Applies the cleanup policy exactly once. Dropping an unfinished guard
/// counts as a failed invocation.
#[derive(Debug)]
pub struct ArtifactGuard {
    set: ArtifactSet,
    policy: CleanupPolicy,
    finished: bool,
}

impl ArtifactGuard {
    pub fn new(set: ArtifactSet, policy: CleanupPolicy) -> Self {
        Self {
            set,
            policy,
            finished: false,
        }
    }

    pub fn token(&self) -> Token {
        self.set.token()
    }

    pub fn set(&self) -> &ArtifactSet {
        &self.set
    }

    pub fn paths(&self) -> &[PathBuf] {
        self.set.registered()
    }

    /// Registers the path a collaborator will write and returns it.
    pub fn reserve(&mut self, kind: ArtifactKind) -> PathBuf {
        let path = self.set.path(kind);
        self.set.register(path.clone());
        path
    }

    /// Writes a new artifact. Existing files are never overwritten.
    pub fn create(&mut self, kind: ArtifactKind, contents: &[u8]) -> Result<PathBuf, Error> {
        let path = self.set.path(kind);
        let io_error = |err: io::Error| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write artifact")
                .with_path(&path)
                .with_source(err)
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_error)?;
        // Registered only once we own the file; a partial write is still cleaned up.
        self.set.register(path.clone());
        file.write_all(contents)
            .and_then(|()| file.flush())
            .map_err(io_error)?;
        debug!(path = %path.display(), bytes = contents.len(), "created artifact");
        Ok(path)
    }

    /// Marks the invocation successful. Returns the artifacts left on disk.
    pub fn finish_ok(mut self) -> Vec<PathBuf> {
        self.apply(true)
    }

    /// Marks the invocation failed. Returns the artifacts left on disk.
    pub fn finish_err(mut self) -> Vec<PathBuf> {
        self.apply(false)
    }

    fn apply(&mut self, success: bool) -> Vec<PathBuf> {
        self.finished = true;
        let retain = self.policy.keep || (!success && self.policy.keep_on_error);
        let existing = self
            .set
            .registered()
            .iter()
            .filter(|path| path.exists())
            .cloned()
            .collect::<Vec<_>>();
        if retain {
            if success {
                debug!(token = %self.set.token(), count = existing.len(), "keeping artifacts");
            } else {
                for path in &existing {
                    warn!(path = %path.display(), "retaining artifact after failed invocation");
                }
            }
            return existing;
        }

        let mut left = Vec::new();
        for path in existing {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "deleted artifact"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to delete artifact");
                    left.push(path);
                }
            }
        }
        left
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!(token = %self.set.token(), "invocation abandoned before completion");
            self.apply(false);
        }
    }
}
