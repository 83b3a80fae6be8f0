//! Protocol module - frames, wire records, and record framing.
//!
//! This module implements the data model shared by both relay directions:
//! - CAN [`Frame`] with classic CAN limits
//! - [`WireMessage`] JSON schema exchanged with the peer
//! - [`LineBuffer`] for reassembling newline-delimited records from partial reads

mod frame;
mod line_buffer;
mod wire_format;

pub use frame::{Frame, MAX_DLC, MAX_EXTENDED_ID, MAX_STANDARD_ID};
pub use line_buffer::{Line, LineBuffer};
pub use wire_format::{WireMessage, DEFAULT_MAX_RECORD_LEN, RECORD_SEPARATOR};
