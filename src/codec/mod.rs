//! Codec module - conversion between bus frames and peer records.
//!
//! - [`FrameCodec`] - CAN [`Frame`](crate::protocol::Frame) ⇄ JSON
//!   [`WireMessage`](crate::protocol::WireMessage) ⇄ newline-terminated bytes
//!
//! # Design
//!
//! The codec is a marker struct with static methods rather than a trait
//! object; there is exactly one wire format and both relays call it directly.
//!
//! # Example
//!
//! ```
//! use can_bridge::codec::FrameCodec;
//! use can_bridge::protocol::Frame;
//!
//! let frame = Frame::new(0x200, &[9, 9]).unwrap();
//! let line = FrameCodec::encode_line(&frame).unwrap();
//! let back = FrameCodec::decode_line(&line).unwrap();
//! assert_eq!(back.data(), &[9, 9]);
//! ```

mod json;

pub use json::{now_millis, FrameCodec};
