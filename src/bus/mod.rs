//! Bus module - the CAN collaborator the bridge drives.
//!
//! The bridge never talks to a controller directly. It consumes the
//! [`CanBus`] trait:
//! - a bounded wait for inbound frames plus a drain of everything ready
//! - a single-frame transmit
//! - start/stop/status of one cyclic (periodic) frame
//!
//! Implementations:
//! - [`VirtualBus`] - in-process loopback bus with a software scheduler
//! - `SocketCanBus` - Linux SocketCAN (feature `socketcan`)

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan_bus;
mod virtual_bus;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub use socketcan_bus::SocketCanBus;
pub use virtual_bus::{VirtualBus, DEFAULT_TRANSMIT_LOG_CAPACITY};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::error::Result;
use crate::protocol::Frame;

/// Failure reported by a bus implementation.
#[derive(Debug, Error)]
pub enum BusError {
    /// Underlying socket or driver error.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bus has been released.
    #[error("bus closed")]
    Closed,

    /// The requested facility does not exist on this bus.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The bus refused the frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Run state of the cyclic scheduler as reported by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclicStatus {
    Idle,
    Running,
    /// The bus has no scheduler.
    Unsupported,
}

/// Payload modification applied between cyclic transmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoIncrement {
    /// Send the payload unchanged every period.
    #[default]
    None,
}

/// Default cyclic identifier.
pub const DEFAULT_CYCLIC_ID: u32 = 200;

/// Default cyclic period.
pub const DEFAULT_CYCLIC_PERIOD: Duration = Duration::from_millis(100);

/// Parameters of the single periodic frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicSpec {
    frame: Frame,
    period: Duration,
    auto_increment: AutoIncrement,
}

impl CyclicSpec {
    /// Create a cyclic spec. Fails if the frame fields are out of range or
    /// the period is zero.
    pub fn new(id: u32, period: Duration, data: &[u8]) -> Result<Self> {
        if period.is_zero() {
            return Err(crate::error::BridgeError::Config(
                "cyclic period must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            frame: Frame::from_bytes(id, Bytes::copy_from_slice(data))?,
            period,
            auto_increment: AutoIncrement::None,
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.frame.id()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.frame.data()
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[inline]
    pub fn auto_increment(&self) -> AutoIncrement {
        self.auto_increment
    }

    /// The frame sent on every period.
    #[inline]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl Default for CyclicSpec {
    /// Identifier 200, every 100 ms, payload `0..8`.
    fn default() -> Self {
        let data: Vec<u8> = (0..8).collect();
        Self {
            frame: Frame::from_bytes(DEFAULT_CYCLIC_ID, Bytes::from(data))
                .expect("default cyclic frame is valid"),
            period: DEFAULT_CYCLIC_PERIOD,
            auto_increment: AutoIncrement::None,
        }
    }
}

/// Interface the bridge consumes from a CAN controller.
///
/// All methods take `&self`; implementations synchronize internally so one
/// handle can be shared by the inbound relay, outbound relays and the
/// cyclic controller.
pub trait CanBus: Send + Sync {
    /// Block up to `timeout` until at least one frame can be drained.
    fn receive_ready(&self, timeout: Duration) -> bool;

    /// Return every frame currently available, oldest first.
    fn drain_frames(&self) -> std::result::Result<Vec<Frame>, BusError>;

    /// Hand one frame to the bus.
    fn transmit(&self, frame: &Frame) -> std::result::Result<(), BusError>;

    /// Arm the scheduler with `spec` and start it.
    fn cyclic_start(&self, spec: &CyclicSpec) -> std::result::Result<(), BusError>;

    /// Cancel the periodic frame.
    fn cyclic_stop(&self) -> std::result::Result<(), BusError>;

    /// Current scheduler state; the source of truth for toggling.
    fn cyclic_status(&self) -> CyclicStatus;
}

/// Shared handle to a bus.
pub type SharedBus = Arc<dyn CanBus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cyclic_spec() {
        let spec = CyclicSpec::default();
        assert_eq!(spec.id(), 200);
        assert_eq!(spec.period(), Duration::from_millis(100));
        assert_eq!(spec.data(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(spec.auto_increment(), AutoIncrement::None);
    }

    #[test]
    fn test_cyclic_spec_validation() {
        assert!(CyclicSpec::new(1, Duration::from_millis(10), &[0; 9]).is_err());
        assert!(CyclicSpec::new(1, Duration::ZERO, &[]).is_err());
        assert!(CyclicSpec::new(0x2000_0000, Duration::from_millis(10), &[]).is_err());

        let spec = CyclicSpec::new(0x18FF_0001, Duration::from_millis(250), &[1, 2]).unwrap();
        assert!(spec.frame().is_extended());
        assert_eq!(spec.frame().dlc(), 2);
    }
}
