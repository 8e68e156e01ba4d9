//! Display refresh clock.
//!
//! [`VsyncClock`] turns raw tick timestamps into an offset relative to the
//! first tick it ever saw. The scheduler reads that offset to compute drift
//! and parks on the clock while it is running ahead of the display.
//! Ticks come either from a [`VsyncSource`] pulled by a dedicated
//! [`VsyncThread`] or straight from a host callback via
//! [`VsyncClock::on_tick`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VsyncSample {
    pub raw_ns: i64,
    /// `raw_ns` minus the first raw timestamp, never decreasing.
    pub offset_ns: i64,
    /// Number of ticks observed so far; zero before the first tick.
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct ClockState {
    epoch_ns: Option<i64>,
    latest: VsyncSample,
}

#[derive(Debug, Default)]
pub struct VsyncClock {
    state: Mutex<ClockState>,
    ticked: Condvar,
}

impl VsyncClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tick and wakes anyone waiting on pacing.
    pub fn on_tick(&self, raw_ns: i64) -> VsyncSample {
        let mut state = self.state.lock();
        let epoch = *state.epoch_ns.get_or_insert(raw_ns);
        let offset_ns = raw_ns.saturating_sub(epoch).max(state.latest.offset_ns);
        state.latest = VsyncSample {
            raw_ns,
            offset_ns,
            sequence: state.latest.sequence + 1,
        };
        let sample = state.latest;
        drop(state);
        self.ticked.notify_all();
        sample
    }

    pub fn latest(&self) -> VsyncSample {
        self.state.lock().latest
    }

    /// Waits for a tick newer than `sequence`.
    ///
    /// Returns `None` on timeout or when woken by [`VsyncClock::interrupt`];
    /// callers re-check their own exit condition either way.
    pub fn wait_past(&self, sequence: u64, timeout: Duration) -> Option<VsyncSample> {
        let mut state = self.state.lock();
        if state.latest.sequence > sequence {
            return Some(state.latest);
        }
        self.ticked.wait_for(&mut state, timeout);
        (state.latest.sequence > sequence).then_some(state.latest)
    }

    /// Wakes every waiter without publishing a tick.
    pub fn interrupt(&self) {
        let _state = self.state.lock();
        self.ticked.notify_all();
    }
}

/// A periodic refresh notification, pulled one tick at a time.
pub trait VsyncSource: Send + 'static {
    /// Blocks until the next refresh and returns its raw timestamp in
    /// nanoseconds. `None` ends the subscription.
    fn next_tick(&mut self) -> Option<i64>;
}

/// Shortest and longest period an [`IntervalVsync`] will tick at.
pub const MIN_VSYNC_PERIOD: Duration = Duration::from_micros(100);
pub const MAX_VSYNC_PERIOD: Duration = Duration::from_secs(10);

const FALLBACK_HZ: f64 = 60.0;

/// Synthetic display clock ticking at a fixed rate.
#[derive(Debug)]
pub struct IntervalVsync {
    period: Duration,
    origin: Instant,
    next: Instant,
}

impl IntervalVsync {
    /// `period` is clamped to [`MIN_VSYNC_PERIOD`]..=[`MAX_VSYNC_PERIOD`].
    pub fn new(period: Duration) -> Self {
        let origin = Instant::now();
        Self {
            period: period.clamp(MIN_VSYNC_PERIOD, MAX_VSYNC_PERIOD),
            origin,
            next: origin,
        }
    }

    /// Rates that are not a positive finite number fall back to 60 Hz.
    pub fn from_hz(hz: f64) -> Self {
        let hz = if hz.is_finite() && hz > 0.0 { hz } else { FALLBACK_HZ };
        let period = Duration::try_from_secs_f64(1.0 / hz).unwrap_or(MAX_VSYNC_PERIOD);
        Self::new(period)
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl VsyncSource for IntervalVsync {
    fn next_tick(&mut self) -> Option<i64> {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        }
        let tick = self.next.max(now);
        // Skip missed intervals instead of bursting to catch up.
        while self.next <= tick {
            self.next += self.period;
        }
        i64::try_from(tick.duration_since(self.origin).as_nanos()).ok()
    }
}

/// Where the engine's vsync ticks come from.
pub enum VsyncFeed {
    /// Pulled from a source on a dedicated thread.
    Thread(Box<dyn VsyncSource>),
    /// The host calls [`VsyncClock::on_tick`] from its own callback.
    Manual,
}

impl VsyncFeed {
    pub fn interval(period: Duration) -> Self {
        Self::Thread(Box::new(IntervalVsync::new(period)))
    }
}

/// Dedicated thread forwarding ticks from a [`VsyncSource`] into a clock.
pub struct VsyncThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VsyncThread {
    pub fn spawn(
        mut source: Box<dyn VsyncSource>,
        clock: Arc<VsyncClock>,
    ) -> Result<Self, EngineError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("pacer-vsync".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    match source.next_tick() {
                        Some(raw_ns) => {
                            let sample = clock.on_tick(raw_ns);
                            tracing::trace!(
                                offset_ns = sample.offset_ns,
                                sequence = sample.sequence,
                                "vsync tick"
                            );
                        }
                        None => {
                            tracing::debug!("vsync source ended");
                            break;
                        }
                    }
                }
            })
            .map_err(|source| EngineError::Spawn {
                role: "vsync",
                source,
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("vsync thread panicked");
            }
        }
    }
}

impl Drop for VsyncThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_defines_epoch() {
        let clock = VsyncClock::new();
        assert_eq!(clock.latest().sequence, 0);
        let first = clock.on_tick(5_000_000);
        assert_eq!(first.offset_ns, 0);
        let second = clock.on_tick(21_000_000);
        assert_eq!(second.offset_ns, 16_000_000);
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn offset_never_moves_backwards() {
        let clock = VsyncClock::new();
        clock.on_tick(100);
        clock.on_tick(200);
        let sample = clock.on_tick(150);
        assert_eq!(sample.offset_ns, 100);
    }

    #[test]
    fn wait_past_times_out_without_ticks() {
        let clock = VsyncClock::new();
        let started = Instant::now();
        assert!(clock.wait_past(0, Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn wait_past_returns_already_published_tick() {
        let clock = VsyncClock::new();
        clock.on_tick(1);
        let sample = clock.wait_past(0, Duration::from_secs(1)).unwrap();
        assert_eq!(sample.sequence, 1);
    }

    #[test]
    fn wait_past_wakes_on_tick_from_other_thread() {
        let clock = Arc::new(VsyncClock::new());
        let ticker = clock.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ticker.on_tick(42);
        });
        let sample = clock.wait_past(0, Duration::from_secs(5)).unwrap();
        assert_eq!(sample.raw_ns, 42);
        handle.join().unwrap();
    }

    #[test]
    fn offset_saturates_on_extreme_timestamps() {
        let clock = VsyncClock::new();
        clock.on_tick(i64::MAX);
        let sample = clock.on_tick(i64::MIN);
        assert_eq!(sample.offset_ns, 0);
        assert_eq!(sample.sequence, 2);

        let clock = VsyncClock::new();
        clock.on_tick(i64::MIN);
        assert_eq!(clock.on_tick(i64::MAX).offset_ns, i64::MAX);
    }

    #[test]
    fn wait_past_accepts_unbounded_timeouts() {
        let clock = VsyncClock::new();
        clock.on_tick(1);
        let sample = clock.wait_past(0, Duration::MAX).unwrap();
        assert_eq!(sample.sequence, 1);
    }

    #[test]
    fn from_hz_derives_the_period() {
        assert_eq!(IntervalVsync::from_hz(4.0).period(), Duration::from_millis(250));
    }

    #[test]
    fn from_hz_falls_back_for_unusable_rates() {
        let fallback = IntervalVsync::from_hz(FALLBACK_HZ).period();
        for hz in [0.0, -30.0, f64::NAN, f64::INFINITY] {
            assert_eq!(IntervalVsync::from_hz(hz).period(), fallback, "{hz}");
        }
        assert_eq!(IntervalVsync::from_hz(1e-300).period(), MAX_VSYNC_PERIOD);
        assert_eq!(IntervalVsync::from_hz(1e300).period(), MIN_VSYNC_PERIOD);
    }

    #[test]
    fn interval_source_ticks_forward() {
        let mut source = IntervalVsync::new(Duration::from_millis(2));
        assert_eq!(source.period(), Duration::from_millis(2));
        let a = source.next_tick().unwrap();
        let b = source.next_tick().unwrap();
        assert!(b > a);
    }

    #[test]
    fn vsync_thread_feeds_clock_until_stopped() {
        let clock = Arc::new(VsyncClock::new());
        let mut thread = VsyncThread::spawn(
            Box::new(IntervalVsync::new(Duration::from_millis(1))),
            clock.clone(),
        )
        .unwrap();
        assert!(clock.wait_past(1, Duration::from_secs(5)).is_some());
        thread.stop();
        let after = clock.latest().sequence;
        thread::sleep(Duration::from_millis(10));
        assert_eq!(clock.latest().sequence, after);
    }
}
