//! # tally-core
//!
//! Suite orchestration for the Tally test runner.
//!
//! This crate provides:
//! - Configuration loading (`tally.yml`)
//! - Scoped capture of suite output into protocol artifacts
//! - Suite entry points with explicit calling conventions
//! - Isolated worker processes with a one-shot result handoff
//! - V1 → V2 → JUnit XML transcoding
//! - The sequential dispatcher that folds every group into one exit status

mod artifact;
mod capture;
mod config;
pub mod dispatcher;
pub mod entry;
pub mod junit;
mod process;
mod status;
mod suite;
pub mod testing;
pub mod transcode;
pub mod worker;

pub use artifact::{ArtifactPaths, RunCounter};
pub use capture::{CaptureError, CaptureScope, CaptureStats, OutputSinks, Sink};
pub use config::{
    ConfigError, DEFAULT_CONFIG_FILE, EntryConfig, GroupConfig, Invocation,
    REPORT_PATH_PLACEHOLDER, Strategy, TallyConfig,
};
pub use dispatcher::{DispatchEvent, Dispatcher, GroupReport, ProgressCallback, RunSummary};
pub use entry::{AmbientEntry, ArgsEntry, CommandEntry, ContextGuard, EntryPoint, InvocationContext};
pub use junit::{CaseStatus, JunitReport, TestCase};
pub use status::{AggregateStatus, CRASHED_RESULT, FAULT_RESULT, RunResult, TIMED_OUT_RESULT};
pub use suite::SuiteGroup;
pub use transcode::{TranscodeError, TranscodeSummary, Transcoder};
pub use worker::{
    CHANNEL_ENV, IsolatedRunner, ResultChannel, ResultSender, SelfExecLauncher, WorkerCommand,
    WorkerError, WorkerLauncher, WorkerOutcome, run_worker_child,
};
