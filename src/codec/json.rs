//! JSON frame codec.
//!
//! Converts between bus [`Frame`]s and peer [`WireMessage`]s.
//!
//! # Timestamps
//!
//! The bus timestamp is *not* carried to the peer. `Time` on an encoded
//! record is the host wall-clock in milliseconds at encode time, so the
//! sub-millisecond resolution and the bus's own time base are lost. A decoded
//! frame gets `Time` as its timestamp (negative values clamp to 0); the bus
//! restamps it on transmission anyway.
//!
//! # Example
//!
//! ```
//! use can_bridge::codec::FrameCodec;
//! use can_bridge::protocol::Frame;
//!
//! let frame = Frame::new(0x100, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
//! let msg = FrameCodec::encode_at(&frame, 1_000).unwrap();
//! assert_eq!(msg.id, 256);
//! assert_eq!(msg.dlc, Some(8));
//!
//! let back = FrameCodec::decode(&msg).unwrap();
//! assert_eq!(back.id(), frame.id());
//! assert_eq!(back.data(), frame.data());
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::{BridgeError, Result};
use crate::protocol::{Frame, WireMessage, MAX_DLC, MAX_EXTENDED_ID};

/// Codec between CAN frames and JSON wire records.
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame, stamping it with the current wall-clock time.
    #[inline]
    pub fn encode(frame: &Frame) -> Result<WireMessage> {
        Self::encode_at(frame, now_millis())
    }

    /// Encode a frame with an explicit `Time` value.
    ///
    /// # Errors
    ///
    /// `Encoding` if the payload is longer than 8 bytes.
    pub fn encode_at(frame: &Frame, time_ms: i64) -> Result<WireMessage> {
        if frame.data().len() > MAX_DLC as usize || frame.dlc() > MAX_DLC {
            return Err(BridgeError::Encoding(format!(
                "frame 0x{:X} carries {} bytes, limit is {}",
                frame.id(),
                frame.data().len(),
                MAX_DLC
            )));
        }

        if frame.is_remote() {
            return Ok(WireMessage::remote(time_ms, frame.id(), frame.dlc()));
        }
        Ok(WireMessage::new(time_ms, frame.id(), frame.data().to_vec()))
    }

    /// Decode a wire record into a frame.
    ///
    /// # Errors
    ///
    /// `Decoding` when the identifier exceeds 29 bits, `DLC` is outside
    /// `0..=8`, `DLC` disagrees with the data length, or a remote record
    /// carries data.
    pub fn decode(msg: &WireMessage) -> Result<Frame> {
        if msg.id > MAX_EXTENDED_ID {
            return Err(BridgeError::Decoding(format!(
                "ID {} exceeds 29 bits",
                msg.id
            )));
        }

        let dlc = match msg.dlc {
            Some(dlc) if !(0..=MAX_DLC as i32).contains(&dlc) => {
                return Err(BridgeError::Decoding(format!("DLC {} out of range", dlc)));
            }
            Some(dlc) => dlc as u8,
            None if msg.rtr => 0,
            None => {
                if msg.data.len() > MAX_DLC as usize {
                    return Err(BridgeError::Decoding(format!(
                        "{} data bytes exceed {}",
                        msg.data.len(),
                        MAX_DLC
                    )));
                }
                msg.data.len() as u8
            }
        };

        let timestamp = msg.time.max(0) as u64;

        if msg.rtr {
            if !msg.data.is_empty() {
                return Err(BridgeError::Decoding(
                    "remote record must not carry data".to_string(),
                ));
            }
            let frame = Frame::remote(msg.id, dlc)
                .map_err(|e| BridgeError::Decoding(e.to_string()))?;
            return Ok(frame.with_timestamp(timestamp));
        }

        if dlc as usize != msg.data.len() {
            return Err(BridgeError::Decoding(format!(
                "DLC {} does not match {} data bytes",
                dlc,
                msg.data.len()
            )));
        }

        let frame = Frame::from_bytes(msg.id, Bytes::copy_from_slice(&msg.data))
            .map_err(|e| BridgeError::Decoding(e.to_string()))?;
        Ok(frame.with_timestamp(timestamp))
    }

    /// Encode a frame straight to a newline-terminated record.
    pub fn encode_line(frame: &Frame) -> Result<Bytes> {
        let msg = Self::encode(frame)?;
        msg.to_line()
            .map_err(|e| BridgeError::Encoding(e.to_string()))
    }

    /// Decode one record (with or without its terminator) into a frame.
    pub fn decode_line(line: &[u8]) -> Result<Frame> {
        let msg = WireMessage::from_line(line)?;
        Self::decode(&msg)
    }
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_data_frame() {
        let frame = Frame::new(0x100, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        let msg = FrameCodec::encode_at(&frame, 42).unwrap();

        assert_eq!(msg.time, 42);
        assert_eq!(msg.id, 256);
        assert_eq!(msg.dlc, Some(8));
        assert_eq!(msg.data, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(!msg.rtr);
    }

    #[test]
    fn test_encode_uses_wall_clock() {
        let before = now_millis();
        let msg = FrameCodec::encode(&Frame::new(1, &[]).unwrap()).unwrap();
        let after = now_millis();

        assert!(msg.time >= before && msg.time <= after);
    }

    #[test]
    fn test_encode_remote_frame() {
        let frame = Frame::remote(0x55, 6).unwrap();
        let msg = FrameCodec::encode_at(&frame, 0).unwrap();

        assert!(msg.rtr);
        assert_eq!(msg.dlc, Some(6));
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_round_trip_all_lengths() {
        for len in 0..=8u8 {
            let payload: Vec<u8> = (0..len).map(|i| i.wrapping_mul(37)).collect();
            let frame = Frame::new(0x1234_5678 & MAX_EXTENDED_ID, &payload).unwrap();

            let back = FrameCodec::decode(&FrameCodec::encode(&frame).unwrap()).unwrap();

            assert_eq!(back.id(), frame.id());
            assert_eq!(back.data(), frame.data());
            assert_eq!(back.dlc(), len);
        }
    }

    #[test]
    fn test_round_trip_remote() {
        let frame = Frame::remote(0x7FF, 3).unwrap();
        let back = FrameCodec::decode(&FrameCodec::encode(&frame).unwrap()).unwrap();

        assert!(back.is_remote());
        assert_eq!(back.dlc(), 3);
        assert_eq!(back.id(), 0x7FF);
    }

    #[test]
    fn test_decode_dlc_mismatch() {
        let mut msg = WireMessage::new(0, 1, vec![1, 2]);
        msg.dlc = Some(3);

        assert!(matches!(
            FrameCodec::decode(&msg),
            Err(BridgeError::Decoding(_))
        ));
    }

    #[test]
    fn test_decode_dlc_out_of_range() {
        let mut msg = WireMessage::new(0, 1, vec![]);
        msg.dlc = Some(-1);
        assert!(FrameCodec::decode(&msg).is_err());

        msg.dlc = Some(9);
        assert!(FrameCodec::decode(&msg).is_err());
    }

    #[test]
    fn test_decode_id_out_of_range() {
        let msg = WireMessage::new(0, MAX_EXTENDED_ID + 1, vec![]);
        assert!(matches!(
            FrameCodec::decode(&msg),
            Err(BridgeError::Decoding(_))
        ));
    }

    #[test]
    fn test_decode_too_much_data_without_dlc() {
        let mut msg = WireMessage::new(0, 1, vec![0; 9]);
        msg.dlc = None;
        assert!(FrameCodec::decode(&msg).is_err());
    }

    #[test]
    fn test_decode_remote_with_data_rejected() {
        let mut msg = WireMessage::remote(0, 1, 2);
        msg.data = vec![1, 2];
        assert!(FrameCodec::decode(&msg).is_err());
    }

    #[test]
    fn test_decode_negative_time_clamps() {
        let msg = WireMessage::new(-5, 1, vec![]);
        assert_eq!(FrameCodec::decode(&msg).unwrap().timestamp(), 0);
    }

    #[test]
    fn test_decode_line() {
        let frame = FrameCodec::decode_line(b"{\"ID\":512,\"DLC\":2,\"Data\":[9,9]}\n").unwrap();
        assert_eq!(frame.id(), 512);
        assert_eq!(frame.data(), &[9, 9]);
    }

    #[test]
    fn test_decode_line_malformed() {
        assert!(matches!(
            FrameCodec::decode_line(b"{\"ID\":"),
            Err(BridgeError::Decoding(_))
        ));
    }

    #[test]
    fn test_encode_line_terminated() {
        let line = FrameCodec::encode_line(&Frame::new(2, &[1]).unwrap()).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
    }
}
