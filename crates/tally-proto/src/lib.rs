//! # tally-proto
//!
//! Protocol types and codecs for the Tally test orchestrator.
//!
//! This crate provides the event model every other Tally crate speaks,
//! including:
//! - The protocol line classifier used by the capture tee
//! - The abstract `ProtocolEvent` model
//! - The V1 line protocol parser/formatter
//! - The V2 framed binary protocol encoder/decoder

pub mod classify;
mod error;
mod event;
pub mod v1;
pub mod v2;

pub use classify::{EVENT_PREFIXES, classify, classify_bytes};
pub use error::{ProtoError, Result};
pub use event::{EventKind, Outcome, ProtocolEvent};
