//! # tally-cli
//!
//! Binary entry point for the Tally test orchestrator.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Logging setup via `tracing-subscriber`
//! - `tally run`: dispatch the configured suite groups and exit with the
//!   aggregate status
//! - `tally list`: show the configured groups
//! - `tally transcode`: convert a V1 capture file into a JUnit report
//! - `tally worker` (hidden): the child side of an isolated run

mod reporter;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use reporter::{TerminalReporter, Verbosity, create_progress_callback};
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tally_core::{
    DEFAULT_CONFIG_FILE, Dispatcher, EntryPoint, ResultSender, SelfExecLauncher, SuiteGroup,
    TallyConfig, Transcoder, run_worker_child,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// Tally - run test suites in-process or isolated, and turn their event
/// streams into JUnit reports
#[derive(Parser, Debug)]
#[command(name = "tally", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured suite groups
    Run(RunArgs),

    /// List the configured suite groups
    List,

    /// Convert a V1 event stream into a JUnit XML report
    Transcode(TranscodeArgs),

    /// Run one group's entry point as an isolated worker
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the run subcommand.
#[derive(Args, Debug)]
struct RunArgs {
    /// Only run these groups (repeatable); defaults to all, in config order
    #[arg(short, long = "group", value_name = "NAME")]
    groups: Vec<String>,

    /// Print only the final verdict (overrides --verbose)
    #[arg(short, long)]
    quiet: bool,
}

/// Arguments for the transcode subcommand.
#[derive(Args, Debug)]
struct TranscodeArgs {
    /// V1 event stream (e.g. test_result.1.subunit)
    input: PathBuf,

    /// Output path; defaults to the input with an .xml extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Test suite name in the report; defaults to the input file stem
    #[arg(long)]
    name: Option<String>,
}

/// Arguments for the worker subcommand.
#[derive(Args, Debug)]
struct WorkerArgs {
    /// Group whose entry point to invoke
    #[arg(long)]
    group: String,

    /// Resolved suite arguments
    #[arg(last = true)]
    args: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    colored::control::set_override(cli.color.should_use_colors());
    init_logging(&cli);

    let code = match cli.command {
        Commands::Run(args) => run_command(&cli.config, cli.verbose, args).await?,
        Commands::List => list_command(&cli.config)?,
        Commands::Transcode(args) => transcode_command(args)?,
        Commands::Worker(args) => worker_command(&cli.config, args).await?,
    };

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

/// Logs go to stderr so they never mix with suite output on stdout.
/// `TALLY_LOG` overrides the level chosen by `--verbose`.
fn init_logging(cli: &Cli) {
    let default = match cli.command {
        // Worker stderr is forwarded into the parent's output.
        Commands::Worker(_) => "warn",
        _ if cli.verbose => "debug",
        _ => "info",
    };
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<TallyConfig> {
    TallyConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Picks the requested groups, keeping config order.
fn select_groups(config: &TallyConfig, names: &[String]) -> Result<Vec<SuiteGroup>> {
    for name in names {
        if config.group(name).is_none() {
            bail!("Unknown group '{}'", name);
        }
    }

    let default_timeout = Duration::from_secs(config.worker_timeout_secs);
    Ok(config
        .groups
        .iter()
        .filter(|g| names.is_empty() || names.contains(&g.name))
        .map(|g| SuiteGroup::from_config(g, default_timeout))
        .collect())
}

async fn run_command(config_path: &Path, verbose: bool, args: RunArgs) -> Result<i32> {
    let config = load_config(config_path)?;
    let groups = select_groups(&config, &args.groups)?;

    // Workers re-read the config, possibly from another directory.
    let config_path = config_path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", config_path.display()))?;
    let launcher =
        SelfExecLauncher::new(&config_path).context("Failed to locate the tally executable")?;
    debug!("Workers will use config {}", config_path.display());

    let verbosity = Verbosity::resolve(verbose, args.quiet);
    let mut dispatcher = Dispatcher::new(&config.suite_root, &config.artifact_dir)
        .with_launcher(Box::new(launcher))
        .on_progress(create_progress_callback(verbosity));

    let summary = dispatcher.run_all(&groups).await;
    TerminalReporter::with_verbosity(verbosity).print_summary(&summary);

    Ok(summary.exit_code())
}

fn list_command(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;

    if config.groups.is_empty() {
        println!("No suite groups configured in {}", config_path.display());
        return Ok(0);
    }

    for group in &config.groups {
        let mut strategy = group.strategy.to_string();
        if group.captures() {
            strategy.push_str(", captured");
        }
        println!("{} ({})", group.name, strategy);
        println!("  command: {} {}", group.entry.command, group.entry.args.join(" "));
        for location in &group.locations {
            println!("  {location}");
        }
    }
    Ok(0)
}

fn transcode_command(args: TranscodeArgs) -> Result<i32> {
    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension("xml"));
    let name = args.name.unwrap_or_else(|| {
        args.input
            .file_stem()
            .map_or_else(|| "tally".to_string(), |s| s.to_string_lossy().into_owned())
    });

    let summary = Transcoder::new(name)
        .transcode_file(&args.input, &output)
        .with_context(|| format!("Failed to transcode {}", args.input.display()))?;

    println!(
        "Wrote {} test case{} ({} events) to {}",
        summary.test_cases,
        if summary.test_cases == 1 { "" } else { "s" },
        summary.events,
        summary.report_path.display()
    );
    Ok(0)
}

async fn worker_command(config_path: &Path, args: WorkerArgs) -> Result<i32> {
    let config = load_config(config_path)?;
    let group = config
        .group(&args.group)
        .with_context(|| format!("Unknown group '{}'", args.group))?;
    let sender = ResultSender::from_env()?;

    let entry = EntryPoint::from_config(&group.entry);
    debug!("Worker for '{}' invoking {:?}", group.name, entry);
    run_worker_child(&entry, &args.args, sender).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
groups:
  - { name: unit, strategy: direct, entry: { command: "true" } }
  - { name: http, strategy: isolated, entry: { command: "true" } }
  - { name: soap, strategy: capture, entry: { command: "true" } }
"#;

    #[test]
    fn test_select_all_groups_in_order() {
        let config = TallyConfig::parse(CONFIG).unwrap();
        let groups = select_groups(&config, &[]).unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["unit", "http", "soap"]);
    }

    #[test]
    fn test_select_keeps_config_order() {
        let config = TallyConfig::parse(CONFIG).unwrap();
        let groups = select_groups(&config, &["soap".to_string(), "unit".to_string()]).unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["unit", "soap"]);
    }

    #[test]
    fn test_select_unknown_group() {
        let config = TallyConfig::parse(CONFIG).unwrap();
        let err = select_groups(&config, &["nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Unknown group 'nope'"));
    }

    #[test]
    fn test_worker_args_after_separator() {
        let cli = Cli::parse_from([
            "tally", "worker", "--config", "t.yml", "--group", "http", "--", "--tb=line", "a.py",
        ]);
        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.group, "http");
                assert_eq!(args.args, vec!["--tb=line", "a.py"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("t.yml"));
    }

    #[test]
    fn test_color_mode() {
        assert!(ColorMode::Always.should_use_colors());
        assert!(!ColorMode::Never.should_use_colors());
    }
}
