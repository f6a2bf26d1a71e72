//! V2: the framed binary event protocol (subunit v2 packet layout).
//!
//! Packet layout, all integers big-endian:
//!
//! ```text
//! ┌──────┬───────┬────────┬───────────┬─────────┬──────┬──────┬──────────────┬───────┐
//! │ 0xB3 │ flags │ length │ timestamp │ test id │ tags │ mime │ file content │ CRC32 │
//! │  u8  │  u16  │ number │ optional  │   opt   │ opt  │ opt  │   optional   │  u32  │
//! └──────┴───────┴────────┴───────────┴─────────┴──────┴──────┴──────────────┴───────┘
//! ```
//!
//! `length` covers the whole packet, signature to CRC inclusive. Numbers use
//! 1–4 bytes; the top two bits of the first byte hold the count of extra
//! bytes. Strings are a number followed by UTF-8 bytes.
//!
//! One event is one packet. Detail text and the finer V1 outcome (error vs.
//! failure, skip vs. not supported) travel in the file content field, so a
//! V1 → V2 → event round trip loses nothing.

use crate::error::{ProtoError, Result};
use crate::event::{EventKind, Outcome, ProtocolEvent};
use chrono::{DateTime, Utc};

/// First byte of every packet.
pub const SIGNATURE: u8 = 0xB3;

const FLAG_VERSION_MASK: u16 = 0xF000;
const FLAG_VERSION_2: u16 = 0x2000;
const FLAG_TEST_ID: u16 = 0x0800;
const FLAG_ROUTE_CODE: u16 = 0x0400;
const FLAG_TIMESTAMP: u16 = 0x0200;
const FLAG_TAGS: u16 = 0x0080;
const FLAG_FILE_CONTENT: u16 = 0x0040;
const FLAG_MIME_TYPE: u16 = 0x0020;
const FLAG_EOF: u16 = 0x0010;
const STATUS_MASK: u16 = 0x0007;

const STATUS_UNDEFINED: u16 = 0;
const STATUS_EXISTS: u16 = 1;
const STATUS_IN_PROGRESS: u16 = 2;
const STATUS_SUCCESS: u16 = 3;
const STATUS_UNEXPECTED_SUCCESS: u16 = 4;
const STATUS_SKIP: u16 = 5;
const STATUS_FAIL: u16 = 6;
const STATUS_EXPECTED_FAIL: u16 = 7;

const MAX_NUMBER: u64 = (1 << 30) - 1;
const TEXT_MIME: &str = "text/plain;charset=utf8";

/// Attachment names that carry detail text for each event kind.
mod attachment {
    pub const TRACEBACK: &str = "traceback";
    pub const ERROR: &str = "error";
    pub const REASON: &str = "reason";
    pub const NOT_SUPPORTED: &str = "notsupported";
    pub const DETAILS: &str = "details";
    pub const METADATA: &str = "metadata";
}

/// Appends one packet per event to `out`, preserving order.
pub fn encode<'a, I>(events: I, out: &mut Vec<u8>) -> Result<usize>
where
    I: IntoIterator<Item = &'a ProtocolEvent>,
{
    let mut count = 0;
    for event in events {
        encode_event(event, out)?;
        count += 1;
    }
    Ok(count)
}

/// Appends a single packet for `event` to `out`.
pub fn encode_event(event: &ProtocolEvent, out: &mut Vec<u8>) -> Result<()> {
    let (status, file_name) = match event.kind {
        EventKind::Start => (STATUS_IN_PROGRESS, None),
        EventKind::Outcome(Outcome::Success) => (STATUS_SUCCESS, None),
        EventKind::Outcome(Outcome::Failure) => (STATUS_FAIL, Some(attachment::TRACEBACK)),
        EventKind::Outcome(Outcome::Error) => (STATUS_FAIL, Some(attachment::ERROR)),
        EventKind::Outcome(Outcome::Skip) => (STATUS_SKIP, None),
        EventKind::Outcome(Outcome::NotSupported) => {
            (STATUS_SKIP, Some(attachment::NOT_SUPPORTED))
        }
        EventKind::Metadata => (STATUS_UNDEFINED, Some(attachment::METADATA)),
    };

    // Kinds that do not need an attachment to be told apart only get one
    // when there is detail text to carry.
    let file_name = file_name.or_else(|| {
        event.details.as_ref().map(|_| match event.kind {
            EventKind::Outcome(Outcome::Skip) => attachment::REASON,
            _ => attachment::DETAILS,
        })
    });

    let mut flags = FLAG_VERSION_2 | status;
    let mut body = Vec::new();

    if let Some(ts) = event.timestamp {
        flags |= FLAG_TIMESTAMP;
        let secs = u32::try_from(ts.timestamp().max(0)).unwrap_or(u32::MAX);
        body.extend_from_slice(&secs.to_be_bytes());
        write_number(u64::from(ts.timestamp_subsec_nanos()), &mut body)?;
    }

    if !event.test_id.is_empty() {
        flags |= FLAG_TEST_ID;
        write_string(&event.test_id, &mut body)?;
    }

    if let Some(name) = file_name {
        flags |= FLAG_MIME_TYPE | FLAG_FILE_CONTENT | FLAG_EOF;
        write_string(TEXT_MIME, &mut body)?;
        write_string(name, &mut body)?;
        let content = event.details.as_deref().unwrap_or_default().as_bytes();
        write_number(content.len() as u64, &mut body)?;
        body.extend_from_slice(content);
    }

    // signature + flags + body + crc, then the length field's own size.
    let base = 1 + 2 + body.len() + 4;
    let total = if base + 1 <= 0x3F {
        base + 1
    } else if base + 2 <= 0x3FFF {
        base + 2
    } else if base + 3 <= 0x003F_FFFF {
        base + 3
    } else {
        base + 4
    };

    let start = out.len();
    out.push(SIGNATURE);
    out.extend_from_slice(&flags.to_be_bytes());
    write_number(total as u64, out)?;
    out.extend_from_slice(&body);
    let crc = crc32fast::hash(&out[start..]);
    out.extend_from_slice(&crc.to_be_bytes());

    debug_assert_eq!(out.len() - start, total);
    Ok(())
}

/// Decodes a V2 buffer into protocol events, in order.
///
/// Iteration stops after the first error.
pub fn decode(buf: &[u8]) -> V2Events<'_> {
    V2Events {
        buf,
        pos: 0,
        failed: false,
    }
}

/// Iterator over the packets of a V2 buffer.
pub struct V2Events<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl Iterator for V2Events<'_> {
    type Item = Result<ProtocolEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        match decode_packet(self.buf, self.pos) {
            Ok((event, next)) => {
                self.pos = next;
                Some(Ok(event))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decodes the packet starting at `offset`. Returns the event and the offset
/// of the next packet.
fn decode_packet(buf: &[u8], offset: usize) -> Result<(ProtocolEvent, usize)> {
    let signature = buf[offset];
    if signature != SIGNATURE {
        return Err(ProtoError::BadSignature {
            offset,
            byte: signature,
        });
    }

    let mut cursor = Cursor {
        buf,
        pos: offset + 1,
        packet_start: offset,
    };
    let flags = cursor.u16("flags")?;
    let version = ((flags & FLAG_VERSION_MASK) >> 12) as u8;
    if flags & FLAG_VERSION_MASK != FLAG_VERSION_2 {
        return Err(ProtoError::UnsupportedVersion { offset, version });
    }

    let length = cursor.number("length")? as usize;
    let end = offset + length;
    if length < 8 || end > buf.len() {
        return Err(ProtoError::Truncated {
            offset,
            reason: "packet length exceeds buffer",
        });
    }

    let expected = u32::from_be_bytes([buf[end - 4], buf[end - 3], buf[end - 2], buf[end - 1]]);
    let actual = crc32fast::hash(&buf[offset..end - 4]);
    if expected != actual {
        return Err(ProtoError::ChecksumMismatch {
            offset,
            expected,
            actual,
        });
    }

    // Restrict field parsing to this packet's body.
    cursor.buf = &buf[..end - 4];

    let timestamp = if flags & FLAG_TIMESTAMP != 0 {
        let secs = cursor.u32("timestamp")?;
        let nanos = cursor.number("timestamp nanos")? as u32;
        DateTime::<Utc>::from_timestamp(i64::from(secs), nanos)
    } else {
        None
    };

    let test_id = if flags & FLAG_TEST_ID != 0 {
        cursor.string("test id")?
    } else {
        String::new()
    };

    if flags & FLAG_TAGS != 0 {
        let count = cursor.number("tag count")?;
        for _ in 0..count {
            cursor.string("tag")?;
        }
    }

    if flags & FLAG_MIME_TYPE != 0 {
        cursor.string("mime type")?;
    }

    let attachment = if flags & FLAG_FILE_CONTENT != 0 {
        let name = cursor.string("file name")?;
        let len = cursor.number("file length")? as usize;
        let bytes = cursor.take(len, "file content")?;
        Some((name, String::from_utf8_lossy(bytes).into_owned()))
    } else {
        None
    };

    if flags & FLAG_ROUTE_CODE != 0 {
        cursor.string("route code")?;
    }

    let kind = event_kind(flags & STATUS_MASK, attachment.as_ref().map(|(n, _)| n.as_str()));
    let details = attachment
        .map(|(_, content)| content)
        .filter(|content| !content.is_empty());

    Ok((
        ProtocolEvent {
            kind,
            test_id,
            details,
            timestamp,
        },
        end,
    ))
}

fn event_kind(status: u16, file_name: Option<&str>) -> EventKind {
    match status {
        STATUS_IN_PROGRESS => EventKind::Start,
        STATUS_SUCCESS | STATUS_EXPECTED_FAIL => EventKind::Outcome(Outcome::Success),
        STATUS_UNEXPECTED_SUCCESS => EventKind::Outcome(Outcome::Failure),
        STATUS_FAIL if file_name == Some(attachment::ERROR) => EventKind::Outcome(Outcome::Error),
        STATUS_FAIL => EventKind::Outcome(Outcome::Failure),
        STATUS_SKIP if file_name == Some(attachment::NOT_SUPPORTED) => {
            EventKind::Outcome(Outcome::NotSupported)
        }
        STATUS_SKIP => EventKind::Outcome(Outcome::Skip),
        STATUS_UNDEFINED | STATUS_EXISTS => EventKind::Metadata,
        _ => EventKind::Metadata,
    }
}

fn write_number(value: u64, out: &mut Vec<u8>) -> Result<()> {
    if value > MAX_NUMBER {
        return Err(ProtoError::NumberTooLarge(value));
    }
    let v = value as u32;
    if v < 0x40 {
        out.push(v as u8);
    } else if v < 0x4000 {
        out.extend_from_slice(&((v as u16) | 0x4000).to_be_bytes());
    } else if v < 0x0040_0000 {
        let bytes = (v | 0x0080_0000).to_be_bytes();
        out.extend_from_slice(&bytes[1..]);
    } else {
        out.extend_from_slice(&(v | 0xC000_0000).to_be_bytes());
    }
    Ok(())
}

fn write_string(value: &str, out: &mut Vec<u8>) -> Result<()> {
    write_number(value.len() as u64, out)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Bounds-checked reader over one packet.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    packet_start: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(ProtoError::Truncated {
                offset: self.packet_start,
                reason: what,
            }),
        }
    }

    fn u16(&mut self, what: &'static str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn number(&mut self, what: &'static str) -> Result<u64> {
        let first = self.take(1, what)?[0];
        let extra = usize::from(first >> 6);
        let mut value = u64::from(first & 0x3F);
        for byte in self.take(extra, what)? {
            value = (value << 8) | u64::from(*byte);
        }
        Ok(value)
    }

    fn string(&mut self, what: &'static str) -> Result<String> {
        let len = self.number(what)? as usize;
        let offset = self.packet_start;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtoError::InvalidUtf8 { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(events: &[ProtocolEvent]) -> Vec<ProtocolEvent> {
        let mut buf = Vec::new();
        assert_eq!(encode(events, &mut buf).unwrap(), events.len());
        decode(&buf).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_number_encoding_widths() {
        let cases: [(u64, &[u8]); 5] = [
            (0, &[0x00]),
            (63, &[0x3F]),
            (64, &[0x40, 0x40]),
            (16_384, &[0x80, 0x40, 0x00]),
            (4_194_304, &[0xC0, 0x40, 0x00, 0x00]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            write_number(value, &mut out).unwrap();
            assert_eq!(out, expected, "encoding {value}");

            let mut cursor = Cursor {
                buf: &out,
                pos: 0,
                packet_start: 0,
            };
            assert_eq!(cursor.number("n").unwrap(), value);
        }
    }

    #[test]
    fn test_number_too_large() {
        let mut out = Vec::new();
        assert!(matches!(
            write_number(1 << 30, &mut out),
            Err(ProtoError::NumberTooLarge(_))
        ));
    }

    #[test]
    fn test_packet_header_and_length() {
        let mut buf = Vec::new();
        encode_event(&ProtocolEvent::start("a"), &mut buf).unwrap();

        assert_eq!(buf[0], SIGNATURE);
        let flags = u16::from_be_bytes([buf[1], buf[2]]);
        assert_eq!(flags & FLAG_VERSION_MASK, FLAG_VERSION_2);
        assert_eq!(flags & STATUS_MASK, STATUS_IN_PROGRESS);
        assert_ne!(flags & FLAG_TEST_ID, 0);
        // 1 sig + 2 flags + 1 length + 1 id len + 1 id + 4 crc
        assert_eq!(buf[3] as usize, buf.len());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_every_kind_survives_roundtrip() {
        let events = vec![
            ProtocolEvent::start("t1"),
            ProtocolEvent::outcome(Outcome::Success, "t1"),
            ProtocolEvent::outcome(Outcome::Failure, "t2").with_details("assert False"),
            ProtocolEvent::outcome(Outcome::Error, "t3"),
            ProtocolEvent::outcome(Outcome::Error, "t4").with_details("Traceback ..."),
            ProtocolEvent::outcome(Outcome::Skip, "t5"),
            ProtocolEvent::outcome(Outcome::Skip, "t6").with_details("slow"),
            ProtocolEvent::outcome(Outcome::NotSupported, "t7"),
            ProtocolEvent::metadata("t7", "stdout capture"),
        ];
        assert_eq!(roundtrip(&events), events);
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let events = vec![ProtocolEvent::start("t").with_timestamp(ts)];
        assert_eq!(roundtrip(&events)[0].timestamp, Some(ts));
    }

    #[test]
    fn test_large_details_use_wide_length() {
        let details = "x".repeat(20_000);
        let events = vec![ProtocolEvent::outcome(Outcome::Failure, "big").with_details(details)];
        assert_eq!(roundtrip(&events), events);
    }

    #[test]
    fn test_empty_buffer_decodes_to_nothing() {
        assert_eq!(decode(&[]).count(), 0);
    }

    #[test]
    fn test_bad_signature() {
        let err = decode(&[0x00, 0x20, 0x00]).next().unwrap().unwrap_err();
        assert!(matches!(err, ProtoError::BadSignature { offset: 0, byte: 0 }));
    }

    #[test]
    fn test_truncated_packet() {
        let mut buf = Vec::new();
        encode_event(&ProtocolEvent::start("abc"), &mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        let results: Vec<_> = decode(&buf).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ProtoError::Truncated { .. })));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut buf = Vec::new();
        encode_event(&ProtocolEvent::start("abc"), &mut buf).unwrap();
        let id_byte = buf.len() - 5;
        buf[id_byte] ^= 0xFF;

        let err = decode(&buf).next().unwrap().unwrap_err();
        assert!(matches!(err, ProtoError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_decoding_stops_after_first_error() {
        let mut buf = Vec::new();
        encode_event(&ProtocolEvent::start("a"), &mut buf).unwrap();
        buf.push(0x00);
        encode_event(&ProtocolEvent::start("b"), &mut buf).unwrap();

        let results: Vec<_> = decode(&buf).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_foreign_statuses_map_to_outcomes() {
        assert_eq!(
            event_kind(STATUS_EXPECTED_FAIL, None),
            EventKind::Outcome(Outcome::Success)
        );
        assert_eq!(
            event_kind(STATUS_UNEXPECTED_SUCCESS, None),
            EventKind::Outcome(Outcome::Failure)
        );
        assert_eq!(event_kind(STATUS_EXISTS, None), EventKind::Metadata);
    }
}
