//! Suite dispatch and result aggregation.
//!
//! The dispatcher walks the configured suite groups strictly in order. For
//! each one it picks the execution strategy, allocates a run number when the
//! run produces artifacts, wraps the run in a capture scope when asked to,
//! transcodes the captured stream, and folds the group's run result into the
//! aggregate status. A failing group never stops the loop.

use crate::artifact::{ArtifactPaths, RunCounter};
use crate::capture::{CaptureScope, OutputSinks};
use crate::config::Strategy;
use crate::status::{AggregateStatus, FAULT_RESULT, RunResult};
use crate::suite::SuiteGroup;
use crate::transcode::Transcoder;
use crate::worker::{IsolatedRunner, WorkerLauncher, WorkerOutcome};
use anyhow::Context;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Progress callback for dispatch updates.
pub type ProgressCallback = Box<dyn Fn(DispatchEvent) + Send + Sync>;

/// Events emitted while suite groups run.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A dispatch run has started.
    RunStarted { total_groups: usize },

    /// A group is about to execute.
    GroupStarted { name: String, strategy: Strategy },

    /// A group has finished and its result has been folded.
    GroupCompleted { report: GroupReport },

    /// All groups have run.
    RunCompleted { summary: RunSummary },
}

/// What happened to one suite group.
#[derive(Debug, Clone)]
pub struct GroupReport {
    pub name: String,
    pub strategy: Strategy,
    pub result: RunResult,
    /// Run number used for this group's artifacts, if any.
    pub run_id: Option<u64>,
    /// XML report written for this group, if any.
    pub report: Option<PathBuf>,
    /// Runner or reporting failure, if any.
    pub error: Option<String>,
    pub duration: Duration,
}

impl GroupReport {
    pub fn passed(&self) -> bool {
        self.result == 0
    }
}

/// Results of a full dispatch run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub groups: Vec<GroupReport>,
    pub status: AggregateStatus,
    pub duration: Duration,
}

impl RunSummary {
    /// True when every group passed (and vacuously for no groups).
    pub fn all_passed(&self) -> bool {
        self.status.is_success()
    }

    pub fn failed_groups(&self) -> Vec<&GroupReport> {
        self.groups.iter().filter(|g| !g.passed()).collect()
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Runs suite groups and owns everything that must not be shared between
/// them: the run counter, the aggregate status and the output sinks.
pub struct Dispatcher {
    suite_root: PathBuf,
    artifact_dir: PathBuf,
    counter: RunCounter,
    status: AggregateStatus,
    sinks: OutputSinks,
    launcher: Option<Box<dyn WorkerLauncher>>,
    runner: IsolatedRunner,
    on_progress: Option<ProgressCallback>,
}

impl Dispatcher {
    /// Creates a dispatcher writing to the process stdout/stderr.
    pub fn new(suite_root: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            suite_root: suite_root.into(),
            artifact_dir: artifact_dir.into(),
            counter: RunCounter::new(),
            status: AggregateStatus::new(),
            sinks: OutputSinks::stdio(),
            launcher: None,
            runner: IsolatedRunner::new(),
            on_progress: None,
        }
    }

    /// Replaces the output sinks suites write to.
    pub fn with_sinks(mut self, sinks: OutputSinks) -> Self {
        self.sinks = sinks;
        self
    }

    /// Sets how isolated groups start their worker process.
    pub fn with_launcher(mut self, launcher: Box<dyn WorkerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Sets a callback for progress updates.
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn status(&self) -> AggregateStatus {
        self.status
    }

    /// The last run number handed out (0 before any).
    pub fn last_run_id(&self) -> u64 {
        self.counter.current()
    }

    /// Runs every group in order and returns the summary.
    pub async fn run_all(&mut self, groups: &[SuiteGroup]) -> RunSummary {
        let start = Instant::now();
        self.emit_progress(DispatchEvent::RunStarted {
            total_groups: groups.len(),
        });

        let mut reports = Vec::with_capacity(groups.len());
        for group in groups {
            reports.push(self.run_group(group).await);
        }

        let summary = RunSummary {
            groups: reports,
            status: self.status,
            duration: start.elapsed(),
        };
        self.emit_progress(DispatchEvent::RunCompleted {
            summary: summary.clone(),
        });
        summary
    }

    /// Runs one group and folds its result into the aggregate status.
    pub async fn run_group(&mut self, group: &SuiteGroup) -> GroupReport {
        let start = Instant::now();
        self.emit_progress(DispatchEvent::GroupStarted {
            name: group.name().to_string(),
            strategy: group.strategy(),
        });
        tracing::info!("Running group '{}' ({})", group.name(), group.strategy());

        let mut report = GroupReport {
            name: group.name().to_string(),
            strategy: group.strategy(),
            result: 0,
            run_id: None,
            report: None,
            error: None,
            duration: Duration::ZERO,
        };
        self.execute(group, &mut report).await;
        report.duration = start.elapsed();

        self.status.fold(report.result);
        if let Some(error) = &report.error {
            tracing::warn!("Group '{}' failed: {}", group.name(), error);
        }
        tracing::info!(
            "Group '{}' finished with {} in {:.2}s",
            group.name(),
            report.result,
            report.duration.as_secs_f64()
        );

        self.emit_progress(DispatchEvent::GroupCompleted {
            report: report.clone(),
        });
        report
    }

    async fn execute(&mut self, group: &SuiteGroup, report: &mut GroupReport) {
        let paths = if group.needs_run_id() {
            let paths = ArtifactPaths::new(&self.artifact_dir, self.counter.peek_next());
            if let Err(e) = paths.prepare() {
                fail(
                    report,
                    format!("failed to prepare artifacts in {}: {e}", self.artifact_dir.display()),
                );
                return;
            }
            let run_id = self.counter.advance();
            tracing::debug!("Group '{}' is run {}", group.name(), run_id);
            report.run_id = Some(run_id);
            Some(paths)
        } else {
            None
        };

        let native_report = paths
            .as_ref()
            .filter(|_| group.wants_native_report())
            .map(|p| p.xml().to_path_buf());
        let args = group.resolve_args(&self.suite_root, native_report.as_deref());

        let launcher = self.launcher.as_deref();
        let runner = &self.runner;

        let Some(paths) = paths.filter(|_| group.captures()) else {
            match invoke(group, &args, &mut self.sinks, launcher, runner).await {
                Ok(result) => report.result = result,
                Err(e) => fail(report, format!("{e:#}")),
            }
            report.report = native_report.filter(|p| p.exists());
            return;
        };

        let mut scope = match CaptureScope::enter(&mut self.sinks, paths.subunit()) {
            Ok(scope) => scope,
            Err(e) => {
                fail(report, e.to_string());
                return;
            }
        };
        let run = invoke(group, &args, scope.sinks(), launcher, runner).await;
        let captured = scope.finish();

        match run {
            Ok(result) => report.result = result,
            Err(e) => fail(report, format!("{e:#}")),
        }
        if let Err(e) = captured {
            fail(report, e.to_string());
            return;
        }

        match Transcoder::new(group.name()).transcode(&paths) {
            Ok(summary) => {
                tracing::debug!(
                    "Transcoded {} events into {} test cases",
                    summary.events,
                    summary.test_cases
                );
                report.report = Some(summary.report_path);
            }
            Err(e) => fail(report, format!("report generation failed: {e}")),
        }
    }

    /// Emits a progress event if a callback is registered.
    fn emit_progress(&self, event: DispatchEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }
}

/// Marks the group as failed, keeping an existing nonzero result and the
/// first error message.
fn fail(report: &mut GroupReport, error: String) {
    if report.result == 0 {
        report.result = FAULT_RESULT;
    }
    if report.error.is_none() {
        report.error = Some(error);
    }
}

/// Calls the group's entry point in-process, or through a worker process
/// for isolated groups.
async fn invoke(
    group: &SuiteGroup,
    args: &[String],
    sinks: &mut OutputSinks,
    launcher: Option<&dyn WorkerLauncher>,
    runner: &IsolatedRunner,
) -> anyhow::Result<RunResult> {
    match group.strategy() {
        Strategy::Direct | Strategy::Capture => group.entry().invoke(args, sinks).await,
        Strategy::Isolated => {
            let launcher = launcher.context("no worker launcher configured")?;
            let command = launcher.command(group, args);
            let outcome = runner.run(&command, sinks).await?;
            match &outcome {
                WorkerOutcome::Completed { result } => {
                    tracing::debug!("Worker for '{}' pushed {}", group.name(), result);
                }
                WorkerOutcome::Crashed { exit_code } => {
                    tracing::warn!(
                        "Worker for '{}' crashed (exit code {:?})",
                        group.name(),
                        exit_code
                    );
                }
                WorkerOutcome::TimedOut { after } => {
                    tracing::warn!("Worker for '{}' timed out after {:?}", group.name(), after);
                }
            }
            Ok(outcome.run_result())
        }
    }
}
