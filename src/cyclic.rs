//! Cyclic transmit controller.
//!
//! Owns the single periodic frame and drives the bus scheduler through a
//! two-state machine, `Idle -> Running -> Idle`. The bus-reported status is
//! the source of truth: [`toggle`](CyclicController::toggle) decides from a
//! fresh [`CanBus::cyclic_status`] call, never from a cached flag, because the
//! scheduler may stop on its own.
//!
//! A bus without a scheduler disables the controller: every operation then
//! returns [`BridgeError::CyclicUnsupported`] and the bus is left alone.

use tracing::{info, warn};

use crate::bus::{BusError, CanBus, CyclicSpec, CyclicStatus, SharedBus};
use crate::error::{BridgeError, Result};

/// Observable state of the periodic frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclicState {
    Idle,
    Running,
}

/// Start/stop control over one periodic frame.
pub struct CyclicController {
    bus: SharedBus,
    spec: CyclicSpec,
    supported: bool,
}

impl CyclicController {
    /// Create a controller; probes the bus once for scheduler support.
    pub fn new(bus: SharedBus, spec: CyclicSpec) -> Self {
        let supported = bus.cyclic_status() != CyclicStatus::Unsupported;
        if !supported {
            info!("Cyclic messages not supported");
        }

        Self {
            bus,
            spec,
            supported,
        }
    }

    /// False when the bus has no scheduler; toggling is disabled.
    #[inline]
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// The periodic frame parameters.
    #[inline]
    pub fn spec(&self) -> &CyclicSpec {
        &self.spec
    }

    /// Current state as reported by the bus.
    pub fn state(&self) -> Result<CyclicState> {
        self.observe()
    }

    /// Start the periodic frame. No-op when already running.
    pub fn start(&self) -> Result<CyclicState> {
        if self.observe()? == CyclicState::Running {
            return Ok(CyclicState::Running);
        }

        self.bus.cyclic_start(&self.spec).map_err(scheduler_error)?;
        info!(
            "Cyclic frame 0x{:X} started every {:?}",
            self.spec.id(),
            self.spec.period()
        );
        Ok(CyclicState::Running)
    }

    /// Stop the periodic frame. No-op when already idle.
    pub fn stop(&self) -> Result<CyclicState> {
        if self.observe()? == CyclicState::Idle {
            return Ok(CyclicState::Idle);
        }

        self.bus.cyclic_stop().map_err(scheduler_error)?;
        info!("Cyclic frame 0x{:X} stopped", self.spec.id());
        Ok(CyclicState::Idle)
    }

    /// Flip the state reported by the bus. Returns the new state.
    pub fn toggle(&self) -> Result<CyclicState> {
        match self.observe()? {
            CyclicState::Running => self.stop(),
            CyclicState::Idle => self.start(),
        }
    }

    fn observe(&self) -> Result<CyclicState> {
        if !self.supported {
            return Err(BridgeError::CyclicUnsupported);
        }

        match self.bus.cyclic_status() {
            CyclicStatus::Idle => Ok(CyclicState::Idle),
            CyclicStatus::Running => Ok(CyclicState::Running),
            CyclicStatus::Unsupported => {
                warn!("Bus stopped reporting cyclic support");
                Err(BridgeError::CyclicUnsupported)
            }
        }
    }
}

/// A bus that refuses the scheduler is treated as having none.
fn scheduler_error(e: BusError) -> BridgeError {
    match e {
        BusError::Unsupported(what) => {
            warn!("Bus refused cyclic control: {}", what);
            BridgeError::CyclicUnsupported
        }
        other => BridgeError::Bus(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::VirtualBus;
    use crate::protocol::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Bus whose scheduler status is scripted by the test.
    struct ScriptedBus {
        status: Mutex<CyclicStatus>,
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: Option<fn() -> BusError>,
    }

    impl ScriptedBus {
        fn new(status: CyclicStatus) -> Arc<Self> {
            Arc::new(Self {
                status: Mutex::new(status),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail_start: None,
            })
        }

        fn failing(error: fn() -> BusError) -> Arc<Self> {
            Arc::new(Self {
                status: Mutex::new(CyclicStatus::Idle),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail_start: Some(error),
            })
        }

        fn set(&self, status: CyclicStatus) {
            *self.status.lock().unwrap() = status;
        }
    }

    impl CanBus for ScriptedBus {
        fn receive_ready(&self, _timeout: Duration) -> bool {
            false
        }

        fn drain_frames(&self) -> std::result::Result<Vec<Frame>, BusError> {
            Ok(Vec::new())
        }

        fn transmit(&self, _frame: &Frame) -> std::result::Result<(), BusError> {
            Ok(())
        }

        fn cyclic_start(&self, _spec: &CyclicSpec) -> std::result::Result<(), BusError> {
            if let Some(error) = self.fail_start {
                return Err(error());
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.set(CyclicStatus::Running);
            Ok(())
        }

        fn cyclic_stop(&self) -> std::result::Result<(), BusError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.set(CyclicStatus::Idle);
            Ok(())
        }

        fn cyclic_status(&self) -> CyclicStatus {
            *self.status.lock().unwrap()
        }
    }

    #[test]
    fn test_toggle_starts_and_stops() {
        let bus = ScriptedBus::new(CyclicStatus::Idle);
        let ctl = CyclicController::new(bus.clone(), CyclicSpec::default());

        assert_eq!(ctl.toggle().unwrap(), CyclicState::Running);
        assert_eq!(ctl.toggle().unwrap(), CyclicState::Idle);
        assert_eq!(bus.starts.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_when_running_is_noop() {
        let bus = ScriptedBus::new(CyclicStatus::Running);
        let ctl = CyclicController::new(bus.clone(), CyclicSpec::default());

        assert_eq!(ctl.start().unwrap(), CyclicState::Running);
        assert_eq!(bus.starts.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.state().unwrap(), CyclicState::Running);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let bus = ScriptedBus::new(CyclicStatus::Idle);
        let ctl = CyclicController::new(bus.clone(), CyclicSpec::default());

        assert_eq!(ctl.stop().unwrap(), CyclicState::Idle);
        assert_eq!(bus.stops.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.state().unwrap(), CyclicState::Idle);
    }

    #[test]
    fn test_toggle_follows_bus_status() {
        let bus = ScriptedBus::new(CyclicStatus::Idle);
        let ctl = CyclicController::new(bus.clone(), CyclicSpec::default());

        ctl.start().unwrap();
        // Scheduler stopped behind our back
        bus.set(CyclicStatus::Idle);

        assert_eq!(ctl.toggle().unwrap(), CyclicState::Running);
        assert_eq!(bus.starts.load(Ordering::SeqCst), 2);
        assert_eq!(bus.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsupported_disables_controller() {
        let bus = ScriptedBus::new(CyclicStatus::Unsupported);
        let ctl = CyclicController::new(bus.clone(), CyclicSpec::default());

        assert!(!ctl.is_supported());
        assert!(matches!(ctl.toggle(), Err(BridgeError::CyclicUnsupported)));
        assert!(matches!(ctl.start(), Err(BridgeError::CyclicUnsupported)));
        assert!(matches!(ctl.stop(), Err(BridgeError::CyclicUnsupported)));
        assert_eq!(bus.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_failure_surfaces_as_bus_error() {
        let ctl = CyclicController::new(
            ScriptedBus::failing(|| BusError::Closed),
            CyclicSpec::default(),
        );

        assert!(matches!(ctl.start(), Err(BridgeError::Bus(BusError::Closed))));
        assert_eq!(ctl.state().unwrap(), CyclicState::Idle);
    }

    #[test]
    fn test_refused_start_reads_as_unsupported() {
        let bus = ScriptedBus::failing(|| BusError::Unsupported("no scheduler".to_string()));
        let ctl = CyclicController::new(bus.clone(), CyclicSpec::default());

        assert!(ctl.is_supported());
        assert!(matches!(ctl.toggle(), Err(BridgeError::CyclicUnsupported)));
        assert_eq!(bus.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_with_virtual_bus() {
        let bus = Arc::new(VirtualBus::with_options(false, true));
        let spec = CyclicSpec::new(0x300, Duration::from_millis(5), &[1]).unwrap();
        let ctl = CyclicController::new(bus.clone(), spec);

        assert_eq!(ctl.toggle().unwrap(), CyclicState::Running);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ctl.toggle().unwrap(), CyclicState::Idle);

        assert!(!bus.transmitted().is_empty());
        assert!(bus.transmitted().iter().all(|f| f.id() == 0x300));
    }
}
