//! V1 → V2 → JUnit XML transcoding.
//!
//! The pipeline is three stages, each a plain function over events:
//!
//! 1. [`v1_to_v2`] parses the captured line stream and re-encodes every event
//!    as a V2 packet in an in-memory buffer.
//! 2. [`v2_to_events`] decodes that buffer from the start.
//! 3. [`events_to_report`] builds the JUnit report.
//!
//! [`Transcoder`] composes them for one run's artifacts and checks that no
//! event was lost between the two encodings.

use crate::artifact::ArtifactPaths;
use crate::junit::JunitReport;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tally_proto::{ProtoError, ProtocolEvent, v1, v2};
use thiserror::Error;

/// Errors that abort a group's report.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("event count changed while transcoding: {v1} in V1, {v2} in V2")]
    EventCountMismatch { v1: usize, v2: usize },
}

/// What one transcoding run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSummary {
    /// Protocol events read from the V1 stream.
    pub events: usize,
    /// `<testcase>` elements written.
    pub test_cases: usize,
    pub report_path: PathBuf,
}

/// Stage one: V1 lines to a V2 buffer. Returns the buffer and the number of
/// events it holds.
pub fn v1_to_v2<R: BufRead>(reader: R) -> Result<(Vec<u8>, usize), TranscodeError> {
    let mut buf = Vec::new();
    let mut count = 0;
    for event in v1::parse(reader) {
        v2::encode_event(&event?, &mut buf)?;
        count += 1;
    }
    Ok((buf, count))
}

/// Stage two: a V2 buffer back to events.
pub fn v2_to_events(buf: &[u8]) -> Result<Vec<ProtocolEvent>, TranscodeError> {
    v2::decode(buf)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TranscodeError::from)
}

/// Stage three: events to a JUnit report.
pub fn events_to_report(suite_name: &str, events: Vec<ProtocolEvent>) -> JunitReport {
    JunitReport::from_events(suite_name, events)
}

/// Runs the full pipeline for one suite group.
#[derive(Debug, Clone)]
pub struct Transcoder {
    suite_name: String,
}

impl Transcoder {
    /// `suite_name` becomes the report's `<testsuite name>`.
    pub fn new(suite_name: impl Into<String>) -> Self {
        Self {
            suite_name: suite_name.into(),
        }
    }

    /// Transcodes a run's `.subunit` artifact into its `.xml` artifact.
    pub fn transcode(&self, paths: &ArtifactPaths) -> Result<TranscodeSummary, TranscodeError> {
        self.transcode_file(paths.subunit(), paths.xml())
    }

    /// Transcodes an arbitrary V1 file into a JUnit file.
    pub fn transcode_file(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<TranscodeSummary, TranscodeError> {
        let file = File::open(input).map_err(|source| TranscodeError::Io {
            path: input.to_path_buf(),
            source,
        })?;

        let (buf, v1_events) = v1_to_v2(BufReader::new(file))?;
        tracing::debug!(
            "Encoded {} events into {} bytes of V2",
            v1_events,
            buf.len()
        );

        let events = v2_to_events(&buf)?;
        if events.len() != v1_events {
            return Err(TranscodeError::EventCountMismatch {
                v1: v1_events,
                v2: events.len(),
            });
        }

        let report = events_to_report(&self.suite_name, events);
        report
            .write_to(output)
            .map_err(|source| TranscodeError::Io {
                path: output.to_path_buf(),
                source,
            })?;

        tracing::debug!(
            "Wrote {} test cases to {}",
            report.tests(),
            output.display()
        );
        Ok(TranscodeSummary {
            events: v1_events,
            test_cases: report.tests(),
            report_path: output.to_path_buf(),
        })
    }
}
