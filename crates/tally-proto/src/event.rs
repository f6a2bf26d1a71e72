//! Abstract protocol events shared by every encoding.
//!
//! A `ProtocolEvent` is what the V1 line protocol, the V2 packet protocol and
//! the JUnit report all describe. Each codec converts to and from this model,
//! so no stage needs to know about any other stage's wire format.

use chrono::{DateTime, Utc};

/// Terminal status of a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Error,
    Failure,
    Skip,
    NotSupported,
}

impl Outcome {
    /// The V1 line prefix (without the trailing colon) for this outcome.
    pub fn v1_keyword(self) -> &'static str {
        match self {
            Outcome::Success => "successful",
            Outcome::Error => "error",
            Outcome::Failure => "failure",
            Outcome::Skip => "skip",
            Outcome::NotSupported => "notsupported",
        }
    }

    /// Returns true for outcomes that make a suite fail.
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Error | Outcome::Failure)
    }

    /// Returns true for outcomes reported as skipped.
    pub fn is_skipped(self) -> bool {
        matches!(self, Outcome::Skip | Outcome::NotSupported)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.v1_keyword())
    }
}

/// What a protocol event says about its test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The test has started running.
    Start,
    /// The test has finished with the given outcome.
    Outcome(Outcome),
    /// Out-of-band information (attachments, annotations) with no status.
    Metadata,
}

/// One unit of the test event protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEvent {
    pub kind: EventKind,

    /// Identifier of the test the event refers to. May be empty for
    /// stream-level metadata.
    pub test_id: String,

    /// Free-form detail text: traceback, skip reason, attachment body.
    pub details: Option<String>,

    /// When the event happened, if the producer recorded it.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProtocolEvent {
    /// Creates a test-start event.
    pub fn start(test_id: impl Into<String>) -> Self {
        Self::new(EventKind::Start, test_id)
    }

    /// Creates an outcome event.
    pub fn outcome(outcome: Outcome, test_id: impl Into<String>) -> Self {
        Self::new(EventKind::Outcome(outcome), test_id)
    }

    /// Creates a metadata event.
    pub fn metadata(test_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(EventKind::Metadata, test_id).with_details(details)
    }

    fn new(kind: EventKind, test_id: impl Into<String>) -> Self {
        Self {
            kind,
            test_id: test_id.into(),
            details: None,
            timestamp: None,
        }
    }

    /// Attaches detail text.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attaches a timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Returns the outcome if this is an outcome event.
    pub fn outcome_kind(&self) -> Option<Outcome> {
        match self.kind {
            EventKind::Outcome(outcome) => Some(outcome),
            _ => None,
        }
    }
}
