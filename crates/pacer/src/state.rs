use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::frame::{Released, StillImage};

/// Lifecycle of the render scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    AwaitingSize,
    Ready,
    Processing,
    Idle,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Created => "created",
            Phase::AwaitingSize => "awaiting-size",
            Phase::Ready => "ready",
            Phase::Processing => "processing",
            Phase::Idle => "idle",
            Phase::ShuttingDown => "shutting-down",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Frames handed to `signal_new_frame`.
    pub enqueued: u64,
    /// Frames from the queue that reached at least the latch.
    pub drawn: u64,
    /// Frames discarded for arriving behind the display.
    pub dropped: u64,
    /// Source buffers handed back, whatever the outcome.
    pub released: u64,
    pub stale_releases: u64,
    pub stills_drawn: u64,
    pub immediate_draws: u64,
    /// Successful per-target presents.
    pub presents: u64,
    pub target_errors: u64,
    /// Completed draw-or-drop cycles.
    pub cycles: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub enqueued: AtomicU64,
    pub drawn: AtomicU64,
    pub dropped: AtomicU64,
    pub released: AtomicU64,
    pub stale_releases: AtomicU64,
    pub stills_drawn: AtomicU64,
    pub immediate_draws: AtomicU64,
    pub presents: AtomicU64,
    pub target_errors: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The latest presented timestamp plus a cycle counter waiters can key on.
#[derive(Debug, Default)]
pub(crate) struct Presented {
    state: Mutex<PresentedState>,
    changed: Condvar,
}

#[derive(Debug, Default, Clone, Copy)]
struct PresentedState {
    latest_ns: Option<i64>,
    cycles: u64,
}

impl Presented {
    pub fn complete_cycle(&self, latest_ns: Option<i64>) {
        let mut state = self.state.lock();
        if latest_ns.is_some() {
            state.latest_ns = latest_ns;
        }
        state.cycles += 1;
        drop(state);
        self.changed.notify_all();
    }

    pub fn cycles(&self) -> u64 {
        self.state.lock().cycles
    }

    pub fn latest_ns(&self) -> Option<i64> {
        self.state.lock().latest_ns
    }

    /// Waits for the next completed cycle and returns the latest timestamp.
    pub fn await_next(&self, timeout: Duration, done: &AtomicBool) -> Option<i64> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let seen = state.cycles;
        while state.cycles == seen && !done.load(Ordering::Acquire) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        if state.cycles == seen {
            None
        } else {
            state.latest_ns
        }
    }

    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }
}

/// State shared between the engine handle, frame sinks and the scheduler.
///
/// Each field carries its own guard so producers never contend with the
/// scheduler on unrelated state.
#[derive(Debug)]
pub(crate) struct Shared {
    pub done: AtomicBool,
    pub pending: AtomicU64,
    pub counters: Counters,
    pub presented: Presented,
    pub still: Mutex<Option<StillImage>>,
    pub size: Mutex<Option<(u32, u32)>>,
    phase: Mutex<Phase>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            counters: Counters::default(),
            presented: Presented::default(),
            still: Mutex::new(None),
            size: Mutex::new(None),
            phase: Mutex::new(Phase::Created),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.lock();
        if *current != phase {
            tracing::trace!(from = %*current, to = %phase, "scheduler phase change");
            *current = phase;
        }
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    pub fn add_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub fn take_pending(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                value.checked_sub(1)
            });
    }

    pub fn record_release(&self, outcome: Released) {
        Counters::bump(&self.counters.released);
        if outcome == Released::Stale {
            Counters::bump(&self.counters.stale_releases);
        }
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            drawn: c.drawn.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
            stale_releases: c.stale_releases.load(Ordering::Relaxed),
            stills_drawn: c.stills_drawn.load(Ordering::Relaxed),
            immediate_draws: c.immediate_draws.load(Ordering::Relaxed),
            presents: c.presents.load(Ordering::Relaxed),
            target_errors: c.target_errors.load(Ordering::Relaxed),
            cycles: self.presented.cycles(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn await_next_times_out_with_sentinel() {
        let presented = Presented::default();
        let done = AtomicBool::new(false);
        let started = Instant::now();
        assert_eq!(presented.await_next(Duration::from_millis(20), &done), None);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn await_next_sees_completed_cycle() {
        let shared = Arc::new(Shared::new());
        let worker = shared.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker.presented.complete_cycle(Some(33_000_000));
        });
        let latest = shared
            .presented
            .await_next(Duration::from_secs(5), &shared.done);
        assert_eq!(latest, Some(33_000_000));
        handle.join().unwrap();
    }

    #[test]
    fn await_next_with_unbounded_timeout_wakes_on_cycle() {
        let shared = Arc::new(Shared::new());
        let worker = shared.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker.presented.complete_cycle(Some(7));
        });
        let latest = shared.presented.await_next(Duration::MAX, &shared.done);
        assert_eq!(latest, Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn dropped_cycle_keeps_previous_timestamp() {
        let presented = Presented::default();
        presented.complete_cycle(Some(10));
        presented.complete_cycle(None);
        assert_eq!(presented.latest_ns(), Some(10));
        assert_eq!(presented.cycles(), 2);
    }

    #[test]
    fn pending_counter_saturates_at_zero() {
        let shared = Shared::new();
        shared.take_pending();
        assert_eq!(shared.pending(), 0);
        shared.add_pending();
        shared.take_pending();
        assert_eq!(shared.pending(), 0);
    }
}
