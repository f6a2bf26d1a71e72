//! Scoped output capture.
//!
//! `CaptureScope` takes over the dispatcher's `OutputSinks` for the duration
//! of one suite run. Everything written to either sink is forwarded unchanged
//! to the original output sink, and every line the protocol classifier accepts
//! is additionally appended to the capture artifact.
//!
//! The original sinks are put back when the scope is dropped, whether the run
//! returned normally, bailed out with `?`, or panicked. Holding the scope
//! borrows the sinks mutably, so two scopes can never be active at once.
//!
//! # Example
//!
//! ```no_run
//! use tally_core::{CaptureScope, OutputSinks};
//! use std::io::Write;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sinks = OutputSinks::stdio();
//! let mut scope = CaptureScope::enter(&mut sinks, "test_result.1.subunit")?;
//!
//! writeln!(scope.sinks().stdout(), "test: pkg.test_a")?;
//! writeln!(scope.sinks().stdout(), "progress: 50%")?;
//! writeln!(scope.sinks().stdout(), "successful: pkg.test_a")?;
//!
//! let stats = scope.finish()?;
//! assert_eq!(stats.events, 2);
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tally_proto::classify_bytes;
use thiserror::Error;

/// A boxed, thread-safe byte sink.
pub type Sink = Box<dyn Write + Send>;

/// The process-level output/error sinks suites write to.
///
/// The dispatcher owns one of these; entry points and worker pumps write
/// through it so a capture scope can intercept them.
pub struct OutputSinks {
    stdout: Sink,
    stderr: Sink,
}

impl OutputSinks {
    /// Creates sinks from explicit writers.
    pub fn new(stdout: Sink, stderr: Sink) -> Self {
        Self { stdout, stderr }
    }

    /// Sinks bound to the real process stdout/stderr.
    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// The output sink.
    pub fn stdout(&mut self) -> &mut (dyn Write + Send) {
        self.stdout.as_mut()
    }

    /// The error sink.
    pub fn stderr(&mut self) -> &mut (dyn Write + Send) {
        self.stderr.as_mut()
    }

    /// Flushes both sinks.
    pub fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()?;
        self.stderr.flush()
    }
}

impl std::fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSinks").finish_non_exhaustive()
    }
}

/// Errors that can occur during a capture scope.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture artifact {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write capture artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to close capture artifact {path}: {source}")]
    Close {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a finished scope wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    /// Path of the capture artifact.
    pub path: PathBuf,
    /// Number of protocol event lines persisted.
    pub events: usize,
}

/// State shared by the two tee handles of one scope.
struct TeeState {
    /// The original output sink; every write is forwarded here.
    forward: Option<Sink>,
    artifact: Option<Sink>,
    /// First artifact write failure, reported when the scope finishes.
    deferred: Option<io::Error>,
    events: usize,
}

impl TeeState {
    /// Persists one complete line, newline included, if it is an event.
    fn persist_line(&mut self, line: &[u8]) {
        if !classify_bytes(line) || self.deferred.is_some() {
            return;
        }
        let Some(artifact) = self.artifact.as_mut() else {
            return;
        };
        match artifact.write_all(line) {
            Ok(()) => self.events += 1,
            Err(e) => self.deferred = Some(e),
        }
    }
}

fn lock(state: &Mutex<TeeState>) -> MutexGuard<'_, TeeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sink installed in place of stdout/stderr while a scope is active.
///
/// Bytes are forwarded as they arrive; classification waits for a complete
/// line, since one formatted `writeln!` can reach us as several writes.
struct TeeHandle {
    state: Arc<Mutex<TeeState>>,
    line_buffer: Vec<u8>,
}

impl TeeHandle {
    fn new(state: &Arc<Mutex<TeeState>>) -> Self {
        Self {
            state: Arc::clone(state),
            line_buffer: Vec::new(),
        }
    }

    /// Persists a trailing partial line, terminating it.
    fn flush_partial_line(&mut self) {
        if self.line_buffer.is_empty() {
            return;
        }
        let mut line = std::mem::take(&mut self.line_buffer);
        line.push(b'\n');
        lock(&self.state).persist_line(&line);
    }
}

impl Write for TeeHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        match state.forward.as_mut() {
            Some(forward) => forward.write_all(buf)?,
            None => return Err(io::Error::other("capture scope already closed")),
        }

        self.line_buffer.extend_from_slice(buf);
        while let Some(newline_pos) = self.line_buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.line_buffer.drain(..=newline_pos).collect();
            state.persist_line(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        if let Some(forward) = state.forward.as_mut() {
            forward.flush()?;
        }
        if state.deferred.is_none()
            && let Some(artifact) = state.artifact.as_mut()
            && let Err(e) = artifact.flush()
        {
            state.deferred = Some(e);
        }
        Ok(())
    }
}

/// Reading from a captured sink yields nothing.
impl Read for TeeHandle {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

/// Runs when the scope puts the original sinks back.
impl Drop for TeeHandle {
    fn drop(&mut self) {
        self.flush_partial_line();
    }
}

/// Guard that owns the sink substitution for one suite run.
pub struct CaptureScope<'s> {
    sinks: &'s mut OutputSinks,
    saved_stderr: Option<Sink>,
    state: Arc<Mutex<TeeState>>,
    /// Handle on the artifact file used to sync it once closed.
    sync: Option<File>,
    path: PathBuf,
}

impl<'s> CaptureScope<'s> {
    /// Opens `path` for writing (truncating it) and redirects both sinks
    /// through the tee.
    pub fn enter(sinks: &'s mut OutputSinks, path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();
        let open = |source: io::Error| CaptureError::Open {
            path: path.clone(),
            source,
        };
        let file = File::create(&path).map_err(open)?;
        let sync = file.try_clone().map_err(open)?;

        Ok(Self::with_artifact(
            sinks,
            path,
            Box::new(BufWriter::new(file)),
            Some(sync),
        ))
    }

    fn with_artifact(
        sinks: &'s mut OutputSinks,
        path: PathBuf,
        artifact: Sink,
        sync: Option<File>,
    ) -> Self {
        let state = Arc::new(Mutex::new(TeeState {
            forward: None,
            artifact: Some(artifact),
            deferred: None,
            events: 0,
        }));

        let original_stdout = std::mem::replace(&mut sinks.stdout, Box::new(TeeHandle::new(&state)));
        let original_stderr = std::mem::replace(&mut sinks.stderr, Box::new(TeeHandle::new(&state)));
        lock(&state).forward = Some(original_stdout);

        tracing::debug!("Capture scope opened at {}", path.display());
        Self {
            sinks,
            saved_stderr: Some(original_stderr),
            state,
            sync,
            path,
        }
    }

    /// The redirected sinks; suite output goes here while the scope lives.
    pub fn sinks(&mut self) -> &mut OutputSinks {
        &mut *self.sinks
    }

    /// Path of the capture artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restores the original sinks, closes the artifact and reports any
    /// write failure that happened during the scope. A trailing line without
    /// a newline is persisted first.
    pub fn finish(mut self) -> Result<CaptureStats, CaptureError> {
        self.restore();

        let (artifact, deferred, events) = {
            let mut state = lock(&self.state);
            (state.artifact.take(), state.deferred.take(), state.events)
        };

        if let Some(source) = deferred {
            return Err(CaptureError::Write {
                path: self.path.clone(),
                source,
            });
        }

        if let Some(mut artifact) = artifact {
            artifact.flush().map_err(|source| CaptureError::Close {
                path: self.path.clone(),
                source,
            })?;
        }
        if let Some(file) = self.sync.take() {
            file.sync_all().map_err(|source| CaptureError::Close {
                path: self.path.clone(),
                source,
            })?;
        }

        tracing::debug!(
            "Capture scope closed at {} ({} events)",
            self.path.display(),
            events
        );
        Ok(CaptureStats {
            path: self.path.clone(),
            events,
        })
    }

    /// Puts the original sinks back. Runs at most once.
    fn restore(&mut self) {
        let Some(stderr) = self.saved_stderr.take() else {
            return;
        };
        let stdout = lock(&self.state).forward.take();
        if let Some(stdout) = stdout {
            self.sinks.stdout = stdout;
        }
        self.sinks.stderr = stderr;
    }
}

impl Drop for CaptureScope<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}
