//! CAN frame with typed accessors.
//!
//! A [`Frame`] is what the bus collaborator hands to the bridge and what the
//! bridge hands back for transmission. It is immutable once constructed and
//! always satisfies the classic CAN limits checked by the constructors.
//!
//! # Example
//!
//! ```
//! use can_bridge::protocol::Frame;
//!
//! let frame = Frame::new(0x100, &[0, 1, 2, 3]).unwrap();
//! assert_eq!(frame.id(), 0x100);
//! assert_eq!(frame.dlc(), 4);
//! assert!(!frame.is_extended());
//!
//! let rtr = Frame::remote(0x1ABCDEF, 2).unwrap();
//! assert!(rtr.is_remote());
//! assert!(rtr.data().is_empty());
//! ```

use std::fmt;

use bytes::Bytes;

use crate::error::{BridgeError, Result};

/// Largest identifier a 29-bit extended frame can carry.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Largest identifier an 11-bit standard frame can carry.
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Maximum payload length of a classic CAN frame.
pub const MAX_DLC: u8 = 8;

/// A single CAN bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    timestamp: u64,
    id: u32,
    remote: bool,
    dlc: u8,
    data: Bytes,
}

impl Frame {
    /// Create a data frame. The DLC is the payload length.
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        Self::from_bytes(id, Bytes::copy_from_slice(data))
    }

    /// Create a data frame from an existing `Bytes` payload (zero-copy).
    pub fn from_bytes(id: u32, data: Bytes) -> Result<Self> {
        check_id(id)?;
        if data.len() > MAX_DLC as usize {
            return Err(BridgeError::InvalidFrame(format!(
                "payload of {} bytes exceeds {}",
                data.len(),
                MAX_DLC
            )));
        }

        Ok(Self {
            timestamp: 0,
            id,
            remote: false,
            dlc: data.len() as u8,
            data,
        })
    }

    /// Create a remote transmission request with a declared length.
    pub fn remote(id: u32, dlc: u8) -> Result<Self> {
        check_id(id)?;
        if dlc > MAX_DLC {
            return Err(BridgeError::InvalidFrame(format!(
                "remote DLC {} exceeds {}",
                dlc, MAX_DLC
            )));
        }

        Ok(Self {
            timestamp: 0,
            id,
            remote: true,
            dlc,
            data: Bytes::new(),
        })
    }

    /// Return the same frame stamped with a bus timestamp.
    #[inline]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Bus timestamp; the unit is defined by the bus that produced it.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True for remote transmission requests.
    #[inline]
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// True when the identifier does not fit in 11 bits.
    #[inline]
    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }

    /// Declared data length. Equals `data().len()` except for remote frames.
    #[inline]
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

fn check_id(id: u32) -> Result<()> {
    if id > MAX_EXTENDED_ID {
        return Err(BridgeError::InvalidFrame(format!(
            "identifier 0x{:X} exceeds 29 bits",
            id
        )));
    }
    Ok(())
}

/// Operator line, e.g. `Time:       1200  ID: 100  DLC: 2  Data: 0A FF`.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time: {:>10}  ID: {:>3X}  DLC: {}",
            self.timestamp, self.id, self.dlc
        )?;

        if self.remote {
            return f.write_str("  Remote Frame");
        }

        f.write_str("  Data:")?;
        for byte in self.data.iter() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}
