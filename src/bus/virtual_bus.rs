//! In-process loopback bus.
//!
//! `VirtualBus` behaves like a controller on a bus with no other traffic
//! unless frames are [`inject`](VirtualBus::inject)ed:
//! - transmitted frames are kept in a bounded log (oldest dropped first)
//!   and, with self-reception enabled (the default), queued for reception
//!   exactly as the bus received them
//! - the cyclic scheduler is a background thread that transmits the
//!   armed frame once per period until stopped
//!
//! Timestamps are microseconds since the bus was created.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use can_bridge::bus::{CanBus, VirtualBus};
//! use can_bridge::protocol::Frame;
//!
//! let bus = VirtualBus::new();
//! bus.transmit(&Frame::new(0x100, &[1, 2]).unwrap()).unwrap();
//!
//! assert!(bus.receive_ready(Duration::from_millis(10)));
//! let frames = bus.drain_frames().unwrap();
//! assert_eq!(frames[0].data(), &[1, 2]);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{BusError, CanBus, CyclicSpec, CyclicStatus};
use crate::protocol::Frame;

/// Frames kept in the transmit log by default.
pub const DEFAULT_TRANSMIT_LOG_CAPACITY: usize = 1024;

struct BusState {
    rx: VecDeque<Frame>,
    transmitted: VecDeque<Frame>,
    log_capacity: usize,
    closed: bool,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            rx: VecDeque::new(),
            transmitted: VecDeque::new(),
            log_capacity: DEFAULT_TRANSMIT_LOG_CAPACITY,
            closed: false,
        }
    }
}

struct Shared {
    state: Mutex<BusState>,
    ready: Condvar,
    epoch: Instant,
    self_reception: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stamp(&self, frame: &Frame) -> Frame {
        frame
            .clone()
            .with_timestamp(self.epoch.elapsed().as_micros() as u64)
    }

    fn transmit(&self, frame: &Frame) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }

        let stamped = self.stamp(frame);
        if self.self_reception {
            state.rx.push_back(stamped.clone());
            self.ready.notify_all();
        }
        if state.log_capacity > 0 {
            if state.transmitted.len() >= state.log_capacity {
                state.transmitted.pop_front();
            }
            state.transmitted.push_back(stamped);
        }
        Ok(())
    }
}

/// Stop flag shared with the scheduler thread.
struct StopFlag {
    stopped: Mutex<bool>,
    wake: Condvar,
}

struct Scheduler {
    stop: Arc<StopFlag>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    fn spawn(shared: Arc<Shared>, spec: CyclicSpec) -> Result<Self, BusError> {
        let stop = Arc::new(StopFlag {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("can-cyclic".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                loop {
                    if shared.transmit(spec.frame()).is_err() {
                        tracing::debug!("Cyclic scheduler stopping: bus closed");
                        return;
                    }

                    next += spec.period();
                    let mut stopped = thread_stop
                        .stopped
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    while !*stopped {
                        let now = Instant::now();
                        if now >= next {
                            break;
                        }
                        stopped = thread_stop
                            .wake
                            .wait_timeout(stopped, next - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                    if *stopped {
                        return;
                    }
                }
            })?;

        Ok(Self { stop, handle })
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn stop(self) {
        *self.stop.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.stop.wake.notify_all();
        if self.handle.join().is_err() {
            tracing::error!("Cyclic scheduler thread panicked");
        }
    }
}

/// Loopback CAN bus for tests and for running the bridge without hardware.
pub struct VirtualBus {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<Scheduler>>,
    cyclic_supported: bool,
}

impl VirtualBus {
    /// Create a bus with self-reception and a cyclic scheduler.
    pub fn new() -> Self {
        Self::with_options(true, true)
    }

    /// Create a bus with explicit self-reception and scheduler support.
    pub fn with_options(self_reception: bool, cyclic_supported: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BusState::default()),
                ready: Condvar::new(),
                epoch: Instant::now(),
                self_reception,
            }),
            scheduler: Mutex::new(None),
            cyclic_supported,
        }
    }

    /// Keep at most `capacity` frames in the transmit log. Zero disables it.
    ///
    /// Default: 1024
    pub fn with_transmit_log_capacity(self, capacity: usize) -> Self {
        {
            let mut state = self.shared.lock();
            state.log_capacity = capacity;
            state.transmitted.clear();
        }
        self
    }

    /// Queue a frame as if another node had sent it.
    pub fn inject(&self, frame: Frame) -> Result<(), BusError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        let stamped = self.shared.stamp(&frame);
        state.rx.push_back(stamped);
        self.shared.ready.notify_all();
        Ok(())
    }

    /// The most recent frames handed to the bus, oldest first, cyclic ones
    /// included.
    pub fn transmitted(&self) -> Vec<Frame> {
        self.shared.lock().transmitted.iter().cloned().collect()
    }

    /// Number of frames waiting to be drained.
    pub fn pending(&self) -> usize {
        self.shared.lock().rx.len()
    }

    /// Release the bus; further operations fail with [`BusError::Closed`].
    pub fn close(&self) {
        self.stop_scheduler();
        let mut state = self.shared.lock();
        state.closed = true;
        state.rx.clear();
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    fn scheduler(&self) -> MutexGuard<'_, Option<Scheduler>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_scheduler(&self) {
        let scheduler = self.scheduler().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop();
        }
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VirtualBus {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}

impl CanBus for VirtualBus {
    fn receive_ready(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .ready
            .wait_timeout_while(state, timeout, |s| s.rx.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !state.rx.is_empty()
    }

    fn drain_frames(&self) -> Result<Vec<Frame>, BusError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        Ok(state.rx.drain(..).collect())
    }

    fn transmit(&self, frame: &Frame) -> Result<(), BusError> {
        self.shared.transmit(frame)
    }

    fn cyclic_start(&self, spec: &CyclicSpec) -> Result<(), BusError> {
        if !self.cyclic_supported {
            return Err(BusError::Unsupported("cyclic scheduler".to_string()));
        }
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let mut slot = self.scheduler();
        if slot.as_ref().is_some_and(Scheduler::is_running) {
            return Ok(());
        }
        // A finished scheduler thread has nothing left to stop
        if let Some(old) = slot.take() {
            old.stop();
        }

        *slot = Some(Scheduler::spawn(self.shared.clone(), spec.clone())?);
        Ok(())
    }

    fn cyclic_stop(&self) -> Result<(), BusError> {
        if !self.cyclic_supported {
            return Err(BusError::Unsupported("cyclic scheduler".to_string()));
        }
        self.stop_scheduler();
        Ok(())
    }

    fn cyclic_status(&self) -> CyclicStatus {
        if !self.cyclic_supported {
            return CyclicStatus::Unsupported;
        }
        match self.scheduler().as_ref() {
            Some(scheduler) if scheduler.is_running() => CyclicStatus::Running,
            _ => CyclicStatus::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);

    #[test]
    fn test_self_reception() {
        let bus = VirtualBus::new();
        let frame = Frame::new(0x100, &[0, 1, 2]).unwrap();

        bus.transmit(&frame).unwrap();

        assert!(bus.receive_ready(WAIT));
        let frames = bus.drain_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), 0x100);
        assert_eq!(frames[0].data(), &[0, 1, 2]);
        assert_eq!(bus.transmitted().len(), 1);
    }

    #[test]
    fn test_without_self_reception() {
        let bus = VirtualBus::with_options(false, true);
        bus.transmit(&Frame::new(1, &[]).unwrap()).unwrap();

        assert!(!bus.receive_ready(Duration::from_millis(10)));
        assert_eq!(bus.transmitted().len(), 1);
    }

    #[test]
    fn test_transmit_log_is_bounded() {
        let bus = VirtualBus::with_options(false, true).with_transmit_log_capacity(4);
        for id in 0..10u32 {
            bus.transmit(&Frame::new(id, &[]).unwrap()).unwrap();
        }

        let ids: Vec<u32> = bus.transmitted().iter().map(Frame::id).collect();
        assert_eq!(ids, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_default_log_stays_at_capacity() {
        let bus = VirtualBus::new();
        for _ in 0..DEFAULT_TRANSMIT_LOG_CAPACITY * 3 {
            bus.transmit(&Frame::new(1, &[]).unwrap()).unwrap();
            bus.drain_frames().unwrap();
        }

        assert_eq!(bus.transmitted().len(), DEFAULT_TRANSMIT_LOG_CAPACITY);
    }

    #[test]
    fn test_transmit_log_disabled() {
        let bus = VirtualBus::new().with_transmit_log_capacity(0);
        bus.transmit(&Frame::new(1, &[2]).unwrap()).unwrap();

        assert!(bus.transmitted().is_empty());
        assert!(bus.receive_ready(WAIT));
    }

    #[test]
    fn test_receive_ready_times_out() {
        let bus = VirtualBus::new();
        let start = Instant::now();

        assert!(!bus.receive_ready(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_receive_ready_wakes_on_inject() {
        let bus = Arc::new(VirtualBus::new());
        let injector = bus.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            injector.inject(Frame::new(0x42, &[1]).unwrap()).unwrap();
        });

        assert!(bus.receive_ready(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_drain_preserves_order_and_timestamps() {
        let bus = VirtualBus::new();
        for id in 1..=3 {
            bus.inject(Frame::new(id, &[]).unwrap()).unwrap();
        }

        let frames = bus.drain_frames().unwrap();
        let ids: Vec<u32> = frames.iter().map(Frame::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(frames.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn test_closed_bus_rejects_operations() {
        let bus = VirtualBus::new();
        bus.close();

        assert!(matches!(
            bus.transmit(&Frame::new(1, &[]).unwrap()),
            Err(BusError::Closed)
        ));
        assert!(matches!(bus.drain_frames(), Err(BusError::Closed)));
        assert!(matches!(
            bus.inject(Frame::new(1, &[]).unwrap()),
            Err(BusError::Closed)
        ));
    }

    #[test]
    fn test_cyclic_start_stop() {
        let bus = VirtualBus::with_options(false, true);
        let spec = CyclicSpec::new(200, Duration::from_millis(10), &[7, 7]).unwrap();

        assert_eq!(bus.cyclic_status(), CyclicStatus::Idle);
        bus.cyclic_start(&spec).unwrap();
        assert_eq!(bus.cyclic_status(), CyclicStatus::Running);

        thread::sleep(Duration::from_millis(55));
        bus.cyclic_stop().unwrap();
        assert_eq!(bus.cyclic_status(), CyclicStatus::Idle);

        let sent = bus.transmitted();
        assert!(sent.len() >= 3, "expected several periods, got {}", sent.len());
        assert!(sent.iter().all(|f| f.id() == 200 && f.data() == [7, 7]));

        // Nothing more after stop
        let count = sent.len();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(bus.transmitted().len(), count);
    }

    #[test]
    fn test_cyclic_start_twice_is_noop() {
        let bus = VirtualBus::with_options(false, true);
        let spec = CyclicSpec::new(1, Duration::from_secs(10), &[]).unwrap();

        bus.cyclic_start(&spec).unwrap();
        bus.cyclic_start(&spec).unwrap();
        thread::sleep(Duration::from_millis(30));

        // One immediate transmission from the single scheduler
        assert_eq!(bus.transmitted().len(), 1);
        assert_eq!(bus.cyclic_status(), CyclicStatus::Running);
        bus.cyclic_stop().unwrap();
    }

    #[test]
    fn test_cyclic_unsupported() {
        let bus = VirtualBus::with_options(true, false);
        assert_eq!(bus.cyclic_status(), CyclicStatus::Unsupported);
        assert!(matches!(
            bus.cyclic_start(&CyclicSpec::default()),
            Err(BusError::Unsupported(_))
        ));
        assert!(matches!(bus.cyclic_stop(), Err(BusError::Unsupported(_))));
    }

    #[test]
    fn test_close_stops_scheduler() {
        let bus = VirtualBus::new();
        bus.cyclic_start(&CyclicSpec::default()).unwrap();

        bus.close();

        assert_eq!(bus.cyclic_status(), CyclicStatus::Idle);
        assert!(bus.cyclic_start(&CyclicSpec::default()).is_err());
    }
}
