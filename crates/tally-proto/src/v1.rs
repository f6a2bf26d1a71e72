//! V1: the flat, line-oriented event protocol (subunit v1 style).
//!
//! Each event is one line: `<keyword>: <test id>`, optionally followed by
//! bracketed detail text on the same line (`failure: pkg.test [ boom ]`).
//! A trailing lone `[` opens a multi-line detail block in subunit v1; only the
//! opener is ever persisted by the capture tee, so it is accepted and dropped.

use crate::classify::classify;
use crate::error::{ProtoError, Result};
use crate::event::{EventKind, Outcome, ProtocolEvent};
use std::io::BufRead;

/// Parses a single V1 line.
///
/// Returns `Ok(None)` for lines that are not protocol events.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<ProtocolEvent>> {
    let line = line.trim_end_matches(['\n', '\r']);
    if !classify(line) {
        return Ok(None);
    }

    let (keyword, rest) = line.split_once(':').ok_or_else(|| ProtoError::MalformedLine {
        line: line_no,
        reason: "missing ':' after keyword".to_string(),
    })?;

    let kind = match keyword {
        "test" => EventKind::Start,
        "successful" => EventKind::Outcome(Outcome::Success),
        "error" => EventKind::Outcome(Outcome::Error),
        "failure" => EventKind::Outcome(Outcome::Failure),
        "skip" => EventKind::Outcome(Outcome::Skip),
        "notsupported" => EventKind::Outcome(Outcome::NotSupported),
        other => {
            return Err(ProtoError::MalformedLine {
                line: line_no,
                reason: format!("unknown keyword '{other}'"),
            });
        }
    };

    // A bare prefix still counts as an event; its test id is empty.
    let (test_id, details) = split_details(rest.trim());

    Ok(Some(ProtocolEvent {
        kind,
        test_id: test_id.to_string(),
        details: details.map(str::to_string),
        timestamp: None,
    }))
}

/// Splits `name [ details ]` into its parts.
fn split_details(rest: &str) -> (&str, Option<&str>) {
    if let Some(name) = rest.strip_suffix(" [") {
        return (name.trim_end(), None);
    }
    if rest.ends_with(']')
        && let Some(open) = rest.find(" [")
    {
        let name = rest[..open].trim_end();
        let body = rest[open + 2..rest.len() - 1].trim();
        return (name, (!body.is_empty()).then_some(body));
    }
    (rest, None)
}

/// Formats an event as a V1 line, including the trailing newline.
///
/// Metadata has no V1 representation and yields `None`. Line breaks inside
/// details are folded to spaces so the event stays on one line.
pub fn format_line(event: &ProtocolEvent) -> Option<String> {
    let keyword = match event.kind {
        EventKind::Start => "test",
        EventKind::Outcome(outcome) => outcome.v1_keyword(),
        EventKind::Metadata => return None,
    };

    let mut line = format!("{keyword}: {}", event.test_id);
    if let Some(details) = &event.details {
        let folded: String = details
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        line.push_str(" [ ");
        line.push_str(folded.trim());
        line.push_str(" ]");
    }
    line.push('\n');
    Some(line)
}

/// Streaming V1 parser over any buffered reader.
///
/// Lines are read as raw bytes and decoded lossily, since capture artifacts
/// are written from arbitrary suite output.
pub struct V1Events<R> {
    reader: R,
    line_no: usize,
    buf: Vec<u8>,
}

/// Parses a V1 stream into protocol events, in order.
pub fn parse<R: BufRead>(reader: R) -> V1Events<R> {
    V1Events {
        reader,
        line_no: 0,
        buf: Vec::new(),
    }
}

impl<R: BufRead> Iterator for V1Events<R> {
    type Item = Result<ProtocolEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.line_no += 1;

            let line = String::from_utf8_lossy(&self.buf);
            match parse_line(&line, self.line_no) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
