//! JUnit XML reports built from protocol events.
//!
//! Each test becomes one `<testcase>`. A start event opens a case and the
//! next outcome for the same id completes it; an outcome with no preceding
//! start still yields a case, and a start that never sees an outcome is
//! reported as an error. Metadata events are collected into the suite's
//! `<system-out>` rather than producing cases.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use tally_proto::{EventKind, Outcome, ProtocolEvent};

/// Message attached to a test that started but never reported an outcome.
pub const INCOMPLETE_MESSAGE: &str = "test did not complete";

/// How a test case ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseStatus {
    Passed,
    Failed { details: Option<String> },
    Errored { details: Option<String> },
    Skipped { reason: Option<String> },
    /// Skipped because the test is not supported in this environment.
    NotSupported { reason: Option<String> },
    /// Started but no outcome arrived.
    Incomplete,
}

impl CaseStatus {
    fn from_outcome(outcome: Outcome, details: Option<String>) -> Self {
        match outcome {
            Outcome::Success => CaseStatus::Passed,
            Outcome::Failure => CaseStatus::Failed { details },
            Outcome::Error => CaseStatus::Errored { details },
            Outcome::Skip => CaseStatus::Skipped { reason: details },
            Outcome::NotSupported => CaseStatus::NotSupported { reason: details },
        }
    }
}

/// One `<testcase>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub classname: String,
    pub name: String,
    pub status: CaseStatus,
    /// Seconds between start and outcome, when both carry timestamps.
    pub time: Option<f64>,
    started: Option<DateTime<Utc>>,
}

/// A single `<testsuite>` report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JunitReport {
    pub name: String,
    pub cases: Vec<TestCase>,
    /// Metadata lines, emitted as `<system-out>`.
    pub system_out: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl JunitReport {
    /// Builds a report from events in stream order.
    pub fn from_events<I>(name: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = ProtocolEvent>,
    {
        let mut report = JunitReport {
            name: name.into(),
            ..Self::default()
        };
        // Cases that have started but not yet completed, by test id.
        let mut open: HashMap<String, usize> = HashMap::new();

        for event in events {
            if report.timestamp.is_none() {
                report.timestamp = event.timestamp;
            }
            match event.kind {
                EventKind::Start => {
                    let mut case = report.new_case(&event.test_id, CaseStatus::Incomplete);
                    case.started = event.timestamp;
                    open.insert(event.test_id, report.cases.len());
                    report.cases.push(case);
                }
                EventKind::Outcome(outcome) => {
                    let status = CaseStatus::from_outcome(outcome, event.details);
                    match open.remove(&event.test_id) {
                        Some(index) => {
                            let case = &mut report.cases[index];
                            case.status = status;
                            if let (Some(start), Some(end)) = (case.started, event.timestamp) {
                                case.time = Some(seconds_between(start, end));
                            }
                        }
                        None => {
                            let case = report.new_case(&event.test_id, status);
                            report.cases.push(case);
                        }
                    }
                }
                EventKind::Metadata => {
                    let line = match event.details {
                        Some(details) => format!("{}: {}", event.test_id, details),
                        None => event.test_id,
                    };
                    report.system_out.push(line);
                }
            }
        }

        report
    }

    fn new_case(&self, test_id: &str, status: CaseStatus) -> TestCase {
        let (classname, name) = match test_id.rsplit_once('.') {
            Some((class, name)) if !class.is_empty() && !name.is_empty() => {
                (class.to_string(), name.to_string())
            }
            _ => (self.name.clone(), test_id.to_string()),
        };
        TestCase {
            classname,
            name,
            status,
            time: None,
            started: None,
        }
    }

    pub fn tests(&self) -> usize {
        self.cases.len()
    }

    pub fn failures(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Failed { .. }))
    }

    pub fn errors(&self) -> usize {
        self.count(|s| matches!(s, CaseStatus::Errored { .. } | CaseStatus::Incomplete))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| {
            matches!(
                s,
                CaseStatus::Skipped { .. } | CaseStatus::NotSupported { .. }
            )
        })
    }

    fn count(&self, pred: impl Fn(&CaseStatus) -> bool) -> usize {
        self.cases.iter().filter(|c| pred(&c.status)).count()
    }

    fn total_time(&self) -> f64 {
        self.cases.iter().filter_map(|c| c.time).sum()
    }

    /// Renders the report as an XML document.
    pub fn render(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        let _ = write!(
            xml,
            r#"<testsuite name="{}" tests="{}" failures="{}" errors="{}" skipped="{}" time="{:.3}""#,
            escape(&self.name),
            self.tests(),
            self.failures(),
            self.errors(),
            self.skipped(),
            self.total_time(),
        );
        if let Some(timestamp) = self.timestamp {
            let _ = write!(
                xml,
                r#" timestamp="{}""#,
                timestamp.format("%Y-%m-%dT%H:%M:%S")
            );
        }
        xml.push_str(">\n");

        for case in &self.cases {
            let _ = write!(
                xml,
                r#"  <testcase classname="{}" name="{}""#,
                escape(&case.classname),
                escape(&case.name)
            );
            if let Some(time) = case.time {
                let _ = write!(xml, r#" time="{time:.3}""#);
            }

            match &case.status {
                CaseStatus::Passed => xml.push_str("/>\n"),
                CaseStatus::Failed { details } => {
                    push_child(&mut xml, "failure", "failure", details.as_deref());
                }
                CaseStatus::Errored { details } => {
                    push_child(&mut xml, "error", "error", details.as_deref());
                }
                CaseStatus::Skipped { reason } => {
                    push_child(&mut xml, "skipped", "skipped", reason.as_deref());
                }
                CaseStatus::NotSupported { reason } => {
                    push_child(&mut xml, "skipped", "not supported", reason.as_deref());
                }
                CaseStatus::Incomplete => {
                    push_child(&mut xml, "error", INCOMPLETE_MESSAGE, None);
                }
            }
        }

        if !self.system_out.is_empty() {
            xml.push_str("  <system-out>");
            xml.push_str(&escape(&self.system_out.join("\n")));
            xml.push_str("</system-out>\n");
        }

        xml.push_str("</testsuite>\n");
        xml
    }

    /// Writes the rendered report to `path`.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }
}

/// Closes the open `<testcase` tag with a status child element. The first
/// line of the details becomes the `message` attribute, the full text the
/// element body.
fn push_child(xml: &mut String, element: &str, fallback: &str, details: Option<&str>) {
    let message = details
        .and_then(|d| d.lines().find(|l| !l.trim().is_empty()))
        .map_or(fallback, str::trim);
    let _ = write!(xml, ">\n    <{element} message=\"{}\"", escape(message));
    match details {
        Some(body) if !body.is_empty() => {
            let _ = write!(xml, ">{}</{element}>", escape(body));
        }
        _ => xml.push_str("/>"),
    }
    xml.push_str("\n  </testcase>\n");
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let micros = (end - start).num_microseconds().unwrap_or(0).max(0);
    micros as f64 / 1_000_000.0
}

/// Escapes XML special characters. Control characters XML 1.0 cannot carry
/// are replaced with U+FFFD.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if c.is_control() && (c as u32) < 0x20 => out.push('\u{FFFD}'),
            c => out.push(c),
        }
    }
    out
}
