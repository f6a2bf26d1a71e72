//! Isolated worker processes.
//!
//! An isolated group runs in a child process so a framework that corrupts
//! global state, or crashes outright, cannot take the dispatcher with it.
//! The child's stdout/stderr are pumped line by line into the parent's
//! current sinks. Its run result comes back through a [`ResultChannel`]: a
//! single-slot file in a private temporary directory, named to the child via
//! [`CHANNEL_ENV`] and written exactly once.
//!
//! The parent waits for the child to exit, bounded by the group's timeout.
//! A child that exits without pushing a result is [`WorkerOutcome::Crashed`];
//! one that outlives the timeout is killed and reported as
//! [`WorkerOutcome::TimedOut`].

use crate::capture::OutputSinks;
use crate::entry::EntryPoint;
use crate::process::pump_output;
use crate::status::{CRASHED_RESULT, RunResult, TIMED_OUT_RESULT};
use crate::suite::SuiteGroup;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;

/// Environment variable carrying the result channel path to the child.
pub const CHANNEL_ENV: &str = "TALLY_RESULT_CHANNEL";

const SLOT_NAME: &str = "result";

/// Errors from running an isolated worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{CHANNEL_ENV} is not set; worker was not started by tally")]
    MissingChannel,

    #[error("result already pushed to {0}")]
    AlreadyPushed(PathBuf),

    #[error("worker pushed an invalid result: {0:?}")]
    InvalidResult(String),
}

/// Receiving end of the one-shot result handoff. Owned by the parent.
#[derive(Debug)]
pub struct ResultChannel {
    dir: TempDir,
}

impl ResultChannel {
    /// Creates an empty channel in a fresh temporary directory.
    pub fn create() -> Result<Self, WorkerError> {
        let dir = tempfile::Builder::new().prefix("tally-worker-").tempdir()?;
        Ok(Self { dir })
    }

    /// Path the child writes its result to.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join(SLOT_NAME)
    }

    /// Takes the pushed result, if the child pushed one.
    pub fn take(&self) -> Result<Option<RunResult>, WorkerError> {
        let path = self.path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        std::fs::remove_file(&path)?;

        raw.trim()
            .parse()
            .map(Some)
            .map_err(|_| WorkerError::InvalidResult(raw))
    }
}

/// Sending end of the handoff, used by the worker child.
#[derive(Debug, Clone)]
pub struct ResultSender {
    path: PathBuf,
}

impl ResultSender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the channel location from [`CHANNEL_ENV`].
    pub fn from_env() -> Result<Self, WorkerError> {
        std::env::var_os(CHANNEL_ENV)
            .map(Self::new)
            .ok_or(WorkerError::MissingChannel)
    }

    /// Pushes the result. Consumes the sender; the slot accepts one value.
    pub fn push(self, result: RunResult) -> Result<(), WorkerError> {
        if self.path.exists() {
            return Err(WorkerError::AlreadyPushed(self.path));
        }
        // Write then rename so the parent never reads a partial value.
        let staging = self.path.with_extension("partial");
        std::fs::write(&staging, result.to_string())?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

/// A fully resolved worker process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// Decides which process runs a group's worker.
pub trait WorkerLauncher: Send + Sync {
    fn command(&self, group: &SuiteGroup, args: &[String]) -> WorkerCommand;
}

/// Launches workers by re-executing the current binary with the hidden
/// `worker` subcommand.
#[derive(Debug, Clone)]
pub struct SelfExecLauncher {
    program: PathBuf,
    config_path: PathBuf,
}

impl SelfExecLauncher {
    /// Uses the running executable and the config file it was started with.
    pub fn new(config_path: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self::with_program(std::env::current_exe()?, config_path))
    }

    pub fn with_program(program: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path: config_path.into(),
        }
    }
}

impl WorkerLauncher for SelfExecLauncher {
    fn command(&self, group: &SuiteGroup, args: &[String]) -> WorkerCommand {
        let mut argv = vec![
            "worker".to_string(),
            "--config".to_string(),
            self.config_path.to_string_lossy().into_owned(),
            "--group".to_string(),
            group.name().to_string(),
            "--".to_string(),
        ];
        argv.extend(args.iter().cloned());
        WorkerCommand {
            program: self.program.clone(),
            args: argv,
            timeout: group.timeout(),
        }
    }
}

/// How an isolated run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The child pushed a result and exited.
    Completed { result: RunResult },
    /// The child exited without pushing a result.
    Crashed { exit_code: Option<i32> },
    /// The child exceeded its timeout and was killed.
    TimedOut { after: Duration },
}

impl WorkerOutcome {
    pub fn run_result(&self) -> RunResult {
        match self {
            WorkerOutcome::Completed { result } => *result,
            WorkerOutcome::Crashed { .. } => CRASHED_RESULT,
            WorkerOutcome::TimedOut { .. } => TIMED_OUT_RESULT,
        }
    }
}

/// Runs one worker process to completion.
#[derive(Debug, Default, Clone, Copy)]
pub struct IsolatedRunner;

impl IsolatedRunner {
    pub fn new() -> Self {
        Self
    }

    /// Spawns the worker, forwards its output into `sinks` and waits for it
    /// to exit, then takes the result from the channel.
    pub async fn run(
        &self,
        command: &WorkerCommand,
        sinks: &mut OutputSinks,
    ) -> Result<WorkerOutcome, WorkerError> {
        let channel = ResultChannel::create()?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .env(CHANNEL_ENV, channel.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        tracing::debug!(
            "Worker {} started (pid {:?})",
            command.program.display(),
            child.id()
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let waited = tokio::time::timeout(command.timeout, async {
            pump_output(stdout, stderr, sinks).await?;
            child.wait().await
        })
        .await;

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!("Worker exceeded {:?}, killing it", command.timeout);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill worker: {}", e);
                }
                return Ok(WorkerOutcome::TimedOut {
                    after: command.timeout,
                });
            }
        };

        match channel.take()? {
            Some(result) => Ok(WorkerOutcome::Completed { result }),
            None => {
                tracing::warn!("Worker exited ({}) without pushing a result", status);
                Ok(WorkerOutcome::Crashed {
                    exit_code: status.code(),
                })
            }
        }
    }
}

/// Body of the worker child: invokes the entry point against the real
/// stdout/stderr and pushes its result exactly once.
///
/// An entry point error is returned without pushing, which the parent
/// observes as a crash.
pub async fn run_worker_child(
    entry: &EntryPoint,
    args: &[String],
    sender: ResultSender,
) -> anyhow::Result<RunResult> {
    let mut sinks = OutputSinks::stdio();
    let result = entry.invoke(args, &mut sinks).await?;
    sinks.flush()?;
    sender.push(result)?;
    Ok(result)
}
