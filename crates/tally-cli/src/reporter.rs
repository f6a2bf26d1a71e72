//! Terminal output for dispatch runs.
//!
//! Prints one `OK` / `FAIL` line per suite group as it finishes and a
//! colored verdict once all groups have run.

use colored::Colorize;
use std::time::Duration;
use tally_core::{DispatchEvent, GroupReport, ProgressCallback, RunSummary};

/// Verbosity level for terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only the final verdict.
    Quiet,
    /// Per-group status lines.
    #[default]
    Normal,
    /// Also announce each group before it runs.
    Verbose,
}

impl Verbosity {
    pub fn resolve(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

/// Colored terminal reporter.
#[derive(Debug, Default)]
pub struct TerminalReporter {
    verbosity: Verbosity,
}

impl TerminalReporter {
    pub fn with_verbosity(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    /// Handles a progress event, printing appropriate output.
    pub fn handle_progress(&self, event: DispatchEvent) {
        match event {
            DispatchEvent::RunStarted { total_groups } => {
                if self.verbosity == Verbosity::Verbose {
                    println!(
                        "{}",
                        format!(
                            "Running {} suite group{}",
                            total_groups,
                            if total_groups == 1 { "" } else { "s" }
                        )
                        .bold()
                    );
                }
            }
            DispatchEvent::GroupStarted { name, strategy } => {
                if self.verbosity == Verbosity::Verbose {
                    println!("{} {}", name.bold(), format!("({strategy})").dimmed());
                }
            }
            DispatchEvent::GroupCompleted { report } => {
                if self.verbosity != Verbosity::Quiet {
                    println!("{}", group_line(&report));
                }
            }
            // The verdict is printed separately via print_summary.
            DispatchEvent::RunCompleted { .. } => {}
        }
    }

    /// Prints the final verdict and any failed groups.
    pub fn print_summary(&self, summary: &RunSummary) {
        let failed = summary.failed_groups();
        if self.verbosity != Verbosity::Quiet && !failed.is_empty() {
            println!("\n{}", "Failed groups:".red().bold());
            for group in &failed {
                let reason = match &group.error {
                    Some(error) => error.clone(),
                    None => format!("exit code {}", group.result),
                };
                println!("  {} {}", group.name.red(), reason.dimmed());
            }
        }

        println!();
        println!("{}", verdict(summary));
        if self.verbosity != Verbosity::Quiet {
            println!(
                "{}",
                format!(
                    "{} group{} in {}",
                    summary.groups.len(),
                    if summary.groups.len() == 1 { "" } else { "s" },
                    format_duration(summary.duration)
                )
                .dimmed()
            );
        }
    }
}

/// `<group> OK` or `<group> FAIL`, with timing and report location.
fn group_line(report: &GroupReport) -> String {
    let status = if report.passed() {
        "OK".green().bold()
    } else {
        "FAIL".red().bold()
    };
    let mut line = format!(
        "{} {} {}",
        report.name,
        status,
        format!("({})", format_duration(report.duration)).dimmed()
    );
    if let Some(path) = &report.report {
        line.push_str(&format!(" {}", path.display()).dimmed().to_string());
    }
    line
}

fn verdict(summary: &RunSummary) -> String {
    if summary.all_passed() {
        "All suite groups passed.".green().bold().to_string()
    } else {
        "At least one suite group failed.".red().bold().to_string()
    }
}

fn format_duration(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// Creates a progress callback for use with `Dispatcher`.
pub fn create_progress_callback(verbosity: Verbosity) -> ProgressCallback {
    let reporter = TerminalReporter::with_verbosity(verbosity);
    Box::new(move |event| reporter.handle_progress(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{AggregateStatus, Strategy};

    fn group(name: &str, result: i32) -> GroupReport {
        GroupReport {
            name: name.to_string(),
            strategy: Strategy::Direct,
            result,
            run_id: None,
            report: None,
            error: None,
            duration: Duration::from_millis(1200),
        }
    }

    #[test]
    fn test_verbosity_resolve() {
        assert_eq!(Verbosity::resolve(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::resolve(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::resolve(true, true), Verbosity::Quiet);
    }

    #[test]
    fn test_group_line() {
        colored::control::set_override(false);
        assert_eq!(group_line(&group("unit", 0)), "unit OK (1.2s)");
        assert_eq!(group_line(&group("http", 70)), "http FAIL (1.2s)");
    }

    #[test]
    fn test_verdict_text() {
        colored::control::set_override(false);
        let mut status = AggregateStatus::new();
        let passed = RunSummary {
            groups: vec![group("a", 0)],
            status,
            duration: Duration::ZERO,
        };
        assert_eq!(verdict(&passed), "All suite groups passed.");

        status.fold(1);
        let failed = RunSummary {
            groups: vec![group("a", 0), group("b", 1)],
            status,
            duration: Duration::ZERO,
        };
        assert_eq!(verdict(&failed), "At least one suite group failed.");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(340)), "0.3s");
        assert_eq!(format_duration(Duration::from_secs(3)), "3.0s");
    }
}
