//! Linux SocketCAN bus.
//!
//! Opens two raw CAN sockets on the interface, one for reception and one for
//! transmission. Frames sent through the transmit socket are looped back to
//! the receive socket by the kernel, which gives the same self-reception
//! behaviour as the virtual bus.
//!
//! Raw sockets have no cyclic scheduler, so [`CanBus::cyclic_status`]
//! reports `Unsupported` and the bridge disables cyclic toggling.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use socketcan::{
    CanFrame as SocketCanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as _, Id, Socket,
    StandardId,
};
use tracing::{debug, info, warn};

use super::{BusError, CanBus, CyclicSpec, CyclicStatus};
use crate::protocol::{Frame, MAX_STANDARD_ID};

/// SocketCAN-backed bus.
pub struct SocketCanBus {
    interface: String,
    rx_socket: CanSocket,
    tx_socket: CanSocket,
    /// Frame read by `receive_ready` and not yet drained.
    pending: Mutex<VecDeque<Frame>>,
    epoch: Instant,
}

impl SocketCanBus {
    /// Open `interface` (e.g. `can0`, `vcan0`).
    pub fn open(interface: &str) -> Result<Self, BusError> {
        info!(interface = %interface, "Opening SocketCAN interface");

        let rx_socket = Self::open_socket(interface)?;
        let tx_socket = Self::open_socket(interface)?;

        Ok(Self {
            interface: interface.to_string(),
            rx_socket,
            tx_socket,
            pending: Mutex::new(VecDeque::new()),
            epoch: Instant::now(),
        })
    }

    fn open_socket(interface: &str) -> Result<CanSocket, BusError> {
        CanSocket::open(interface).map_err(|e| {
            if e.kind() == ErrorKind::NotFound || e.to_string().contains("No such device") {
                BusError::Unsupported(format!("CAN interface {} not found", interface))
            } else {
                BusError::Io(e)
            }
        })
    }

    /// Interface name this bus was opened on.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timestamp(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Convert a kernel frame; error frames are reported and dropped.
    fn convert_socket_frame(&self, frame: &SocketCanFrame) -> Option<Frame> {
        if frame.is_error_frame() {
            warn!(interface = %self.interface, "CAN error frame: 0x{:X}", frame.raw_id());
            return None;
        }

        let converted = if EmbeddedFrame::is_remote_frame(frame) {
            Frame::remote(frame.raw_id(), EmbeddedFrame::dlc(frame) as u8)
        } else {
            Frame::new(frame.raw_id(), EmbeddedFrame::data(frame))
        };

        match converted {
            Ok(f) => Some(f.with_timestamp(self.timestamp())),
            Err(e) => {
                warn!("Failed to convert CAN frame: {}", e);
                None
            }
        }
    }

    fn convert_to_socket_frame(frame: &Frame) -> Result<SocketCanFrame, BusError> {
        let id = if frame.id() > MAX_STANDARD_ID {
            ExtendedId::new(frame.id()).map(Id::Extended)
        } else {
            StandardId::new(frame.id() as u16).map(Id::Standard)
        }
        .ok_or_else(|| BusError::InvalidFrame(format!("identifier 0x{:X}", frame.id())))?;

        let socket_frame = if frame.is_remote() {
            <SocketCanFrame as EmbeddedFrame>::new_remote(id, frame.dlc() as usize)
        } else {
            <SocketCanFrame as EmbeddedFrame>::new(id, frame.data())
        };

        socket_frame.ok_or_else(|| {
            BusError::InvalidFrame(format!("frame 0x{:X} rejected by socketcan", frame.id()))
        })
    }

    fn is_timeout(kind: ErrorKind) -> bool {
        matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
    }
}

/// Read until the socket has nothing more. `read` yields `None` for frames
/// that were skipped.
///
/// A read error ends the drain without losing what was already collected;
/// it is returned only when nothing was.
fn drain_until_empty<F>(mut frames: Vec<Frame>, mut read: F) -> Result<Vec<Frame>, BusError>
where
    F: FnMut() -> std::io::Result<Option<Frame>>,
{
    loop {
        match read() {
            Ok(frame) => frames.extend(frame),
            Err(e) if SocketCanBus::is_timeout(e.kind()) => return Ok(frames),
            Err(e) if frames.is_empty() => return Err(BusError::Io(e)),
            Err(e) => {
                warn!("CAN read failed mid-drain, keeping {} frames: {}", frames.len(), e);
                return Ok(frames);
            }
        }
    }
}

impl CanBus for SocketCanBus {
    fn receive_ready(&self, timeout: Duration) -> bool {
        if !self.pending().is_empty() {
            return true;
        }

        // Blocking mode is restored here in case a drain could not restore it
        let armed = self
            .rx_socket
            .set_nonblocking(false)
            .and_then(|()| self.rx_socket.set_read_timeout(timeout));
        if let Err(e) = armed {
            warn!("Failed to set socket timeout: {}", e);
            std::thread::sleep(timeout);
            return false;
        }

        match self.rx_socket.read_frame() {
            Ok(frame) => match self.convert_socket_frame(&frame) {
                Some(frame) => {
                    self.pending().push_back(frame);
                    true
                }
                None => false,
            },
            Err(e) if Self::is_timeout(e.kind()) => false,
            Err(e) => {
                warn!(interface = %self.interface, "Error reading CAN frame: {}", e);
                false
            }
        }
    }

    fn drain_frames(&self) -> Result<Vec<Frame>, BusError> {
        let frames: Vec<Frame> = self.pending().drain(..).collect();

        if let Err(e) = self.rx_socket.set_nonblocking(true) {
            if frames.is_empty() {
                return Err(e.into());
            }
            warn!(interface = %self.interface, "Failed to enter non-blocking drain: {}", e);
            return Ok(frames);
        }

        let result = drain_until_empty(frames, || {
            self.rx_socket
                .read_frame()
                .map(|frame| self.convert_socket_frame(&frame))
        });

        if let Err(e) = self.rx_socket.set_nonblocking(false) {
            warn!(interface = %self.interface, "Failed to restore blocking mode: {}", e);
        }

        result
    }

    fn transmit(&self, frame: &Frame) -> Result<(), BusError> {
        let socket_frame = Self::convert_to_socket_frame(frame)?;
        self.tx_socket.write_frame(&socket_frame)?;
        debug!(interface = %self.interface, "Transmitted 0x{:X}", frame.id());
        Ok(())
    }

    fn cyclic_start(&self, _spec: &CyclicSpec) -> Result<(), BusError> {
        Err(BusError::Unsupported(
            "raw SocketCAN has no cyclic scheduler".to_string(),
        ))
    }

    fn cyclic_stop(&self) -> Result<(), BusError> {
        Err(BusError::Unsupported(
            "raw SocketCAN has no cyclic scheduler".to_string(),
        ))
    }

    fn cyclic_status(&self) -> CyclicStatus {
        CyclicStatus::Unsupported
    }
}
