//! Protocol line classification.
//!
//! Decides whether a line of suite output is a V1 protocol event worth
//! persisting. Matching is a case-sensitive prefix test; content is never
//! modified here.

/// Line prefixes that mark a V1 protocol event.
pub const EVENT_PREFIXES: [&str; 6] = [
    "test:",
    "successful:",
    "error:",
    "failure:",
    "skip:",
    "notsupported:",
];

/// Returns true if `line` starts with one of [`EVENT_PREFIXES`].
pub fn classify(line: &str) -> bool {
    classify_bytes(line.as_bytes())
}

/// Byte-level variant of [`classify`] for output that is not known to be UTF-8.
pub fn classify_bytes(line: &[u8]) -> bool {
    EVENT_PREFIXES
        .iter()
        .any(|prefix| line.starts_with(prefix.as_bytes()))
}
