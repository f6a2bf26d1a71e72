//! Suite entry points.
//!
//! A suite is started through one of two calling conventions, fixed when the
//! group is configured:
//!
//! - [`EntryPoint::WithArgs`] receives the resolved argument list directly.
//! - [`EntryPoint::WithAmbientContext`] is called with no arguments and reads
//!   its argv from the process-wide [`InvocationContext`], which is installed
//!   for exactly the duration of the call.
//!
//! [`CommandEntry`] implements both for external test programs; closures can
//! be wrapped with [`EntryPoint::with_args_fn`] and [`EntryPoint::ambient_fn`].

use crate::capture::OutputSinks;
use crate::config::{EntryConfig, Invocation};
use crate::process::pump_output;
use crate::status::{FAULT_RESULT, RunResult};
use anyhow::Context;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::process::Command;

/// An entry point that takes its arguments as a parameter.
#[async_trait]
pub trait ArgsEntry: Send + Sync {
    async fn call(&self, args: &[String], sinks: &mut OutputSinks) -> anyhow::Result<RunResult>;
}

/// An entry point that reads its arguments from the [`InvocationContext`].
#[async_trait]
pub trait AmbientEntry: Send + Sync {
    async fn call(&self, sinks: &mut OutputSinks) -> anyhow::Result<RunResult>;
}

/// A suite's entry point together with its calling convention.
#[derive(Clone)]
pub enum EntryPoint {
    WithArgs(Arc<dyn ArgsEntry>),
    WithAmbientContext {
        /// Recorded as argv[0] of the installed context.
        program: String,
        entry: Arc<dyn AmbientEntry>,
    },
}

impl EntryPoint {
    /// Wraps a synchronous closure taking the argument list.
    pub fn with_args_fn<F>(f: F) -> Self
    where
        F: Fn(&[String], &mut OutputSinks) -> anyhow::Result<RunResult> + Send + Sync + 'static,
    {
        EntryPoint::WithArgs(Arc::new(ArgsFn(f)))
    }

    /// Wraps a synchronous closure that reads [`InvocationContext::current`].
    pub fn ambient_fn<F>(program: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut OutputSinks) -> anyhow::Result<RunResult> + Send + Sync + 'static,
    {
        EntryPoint::WithAmbientContext {
            program: program.into(),
            entry: Arc::new(AmbientFn(f)),
        }
    }

    /// Builds the entry point for an external test program.
    pub fn from_config(config: &EntryConfig) -> Self {
        let command = CommandEntry::new(&config.command);
        match config.invocation {
            Invocation::Args => EntryPoint::WithArgs(Arc::new(command)),
            Invocation::Ambient => EntryPoint::WithAmbientContext {
                program: config
                    .argv0
                    .clone()
                    .unwrap_or_else(|| config.command.clone()),
                entry: Arc::new(command),
            },
        }
    }

    /// Calls the entry point with `args`, using its calling convention.
    pub async fn invoke(
        &self,
        args: &[String],
        sinks: &mut OutputSinks,
    ) -> anyhow::Result<RunResult> {
        match self {
            EntryPoint::WithArgs(entry) => entry.call(args, sinks).await,
            EntryPoint::WithAmbientContext { program, entry } => {
                let argv = std::iter::once(program.clone())
                    .chain(args.iter().cloned())
                    .collect();
                let _context = InvocationContext::install(argv);
                entry.call(sinks).await
            }
        }
    }

    pub fn convention(&self) -> Invocation {
        match self {
            EntryPoint::WithArgs(_) => Invocation::Args,
            EntryPoint::WithAmbientContext { .. } => Invocation::Ambient,
        }
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryPoint::WithArgs(_) => f.write_str("EntryPoint::WithArgs"),
            EntryPoint::WithAmbientContext { program, .. } => f
                .debug_struct("EntryPoint::WithAmbientContext")
                .field("program", program)
                .finish_non_exhaustive(),
        }
    }
}

struct ArgsFn<F>(F);

#[async_trait]
impl<F> ArgsEntry for ArgsFn<F>
where
    F: Fn(&[String], &mut OutputSinks) -> anyhow::Result<RunResult> + Send + Sync,
{
    async fn call(&self, args: &[String], sinks: &mut OutputSinks) -> anyhow::Result<RunResult> {
        (self.0)(args, sinks)
    }
}

struct AmbientFn<F>(F);

#[async_trait]
impl<F> AmbientEntry for AmbientFn<F>
where
    F: Fn(&mut OutputSinks) -> anyhow::Result<RunResult> + Send + Sync,
{
    async fn call(&self, sinks: &mut OutputSinks) -> anyhow::Result<RunResult> {
        (self.0)(sinks)
    }
}

static CONTEXT: RwLock<Option<Vec<String>>> = RwLock::new(None);

/// The process-wide argument vector read by ambient entry points.
pub struct InvocationContext;

impl InvocationContext {
    /// Installs `argv` until the returned guard is dropped, at which point
    /// the previous context (if any) is put back.
    pub fn install(argv: Vec<String>) -> ContextGuard {
        let mut slot = CONTEXT.write().unwrap_or_else(PoisonError::into_inner);
        let previous = slot.replace(argv);
        ContextGuard { previous }
    }

    /// The installed argv, if any.
    pub fn current() -> Option<Vec<String>> {
        CONTEXT
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Restores the previous invocation context on drop.
#[must_use = "the context is uninstalled when the guard is dropped"]
pub struct ContextGuard {
    previous: Option<Vec<String>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let mut slot = CONTEXT.write().unwrap_or_else(PoisonError::into_inner);
        *slot = self.previous.take();
    }
}

/// Runs an external test program, streaming its output through the sinks.
#[derive(Debug, Clone)]
pub struct CommandEntry {
    program: String,
}

impl CommandEntry {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[String], sinks: &mut OutputSinks) -> anyhow::Result<RunResult> {
        tracing::debug!("Spawning {} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;

        pump_output(child.stdout.take(), child.stderr.take(), sinks)
            .await
            .with_context(|| format!("failed to forward output of {}", self.program))?;
        let status = child.wait().await?;

        // Killed by a signal: no exit code to report.
        Ok(status.code().unwrap_or(FAULT_RESULT))
    }
}

#[async_trait]
impl ArgsEntry for CommandEntry {
    async fn call(&self, args: &[String], sinks: &mut OutputSinks) -> anyhow::Result<RunResult> {
        self.run(args, sinks).await
    }
}

#[async_trait]
impl AmbientEntry for CommandEntry {
    async fn call(&self, sinks: &mut OutputSinks) -> anyhow::Result<RunResult> {
        let argv = InvocationContext::current()
            .context("no invocation context installed for ambient entry point")?;
        self.run(argv.get(1..).unwrap_or_default(), sinks).await
    }
}
