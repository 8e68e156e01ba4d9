use std::time::Duration;

/// Nominal pacing tolerance: a frame may run this far ahead of the display
/// before the scheduler waits for vsync.
pub const DEFAULT_LATE_TOLERANCE: Duration = Duration::from_secs(15);

/// Upper bound on every steady-state wait inside the scheduler.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, PartialEq)]
pub struct PacerConfig {
    /// Discard frames whose drift is negative once pacing is done.
    pub drop_late_frames: bool,
    pub late_tolerance: Duration,
    pub idle_timeout: Duration,
    pub thread_name: String,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            drop_late_frames: true,
            late_tolerance: DEFAULT_LATE_TOLERANCE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name: "pacer-render".into(),
        }
    }
}

impl PacerConfig {
    pub fn late_tolerance_ns(&self) -> i64 {
        i64::try_from(self.late_tolerance.as_nanos()).unwrap_or(i64::MAX)
    }

    pub(crate) fn wait_slice(&self) -> Duration {
        if self.idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            self.idle_timeout
        }
    }
}

/// Pacing error of a frame against the display, in nanoseconds.
///
/// Positive values mean the frame is early; negative values mean the display
/// has already moved past it.
pub fn drift_ns(pts_us: i64, epoch_us: i64, vsync_offset_ns: i64) -> i64 {
    pts_us
        .saturating_sub(epoch_us)
        .saturating_mul(1000)
        .saturating_sub(vsync_offset_ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_nominal_pacing() {
        let config = PacerConfig::default();
        assert!(config.drop_late_frames);
        assert_eq!(config.late_tolerance_ns(), 15_000_000_000);
        assert_eq!(config.idle_timeout, Duration::from_secs(3));
    }

    #[test]
    fn drift_is_relative_to_epoch_and_vsync() {
        assert_eq!(drift_ns(1_033_000, 1_000_000, 0), 33_000_000);
        assert_eq!(drift_ns(1_033_000, 1_000_000, 50_000_000), -17_000_000);
        assert_eq!(drift_ns(1_000_000, 1_000_000, 0), 0);
    }

    #[test]
    fn zero_idle_timeout_falls_back_to_default() {
        let config = PacerConfig {
            idle_timeout: Duration::ZERO,
            ..PacerConfig::default()
        };
        assert_eq!(config.wait_slice(), DEFAULT_IDLE_TIMEOUT);
    }
}
