//! Frame pacing.
//!
//! Playback holds a fixed cadence by sleeping away whatever is left of each
//! frame's budget after the send. A frame that overruns is followed
//! immediately by the next one; drift accumulates and is never caught up.

use std::time::Duration;

/// Time to wait after a frame that took `elapsed` to dispatch.
///
/// Returns `max(1/fps - elapsed, 0)`.
pub fn frame_delay(fps: f64, elapsed: Duration) -> Duration {
    frame_period(fps).saturating_sub(elapsed)
}

/// `1/fps` as a duration.
///
/// Saturates to [`Duration::MAX`] when the period is not representable;
/// a validated config never gets there.
pub fn frame_period(fps: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6;

    #[test]
    fn test_delay_fills_remaining_budget() {
        for fps in [1.0, 10.0, 29.97, 30.0, 100.0, 1000.0] {
            let period = 1.0 / fps;
            for fraction in [0.0, 0.1, 0.5, 0.9, 0.999] {
                let elapsed = Duration::from_secs_f64(period * fraction);
                let delay = frame_delay(fps, elapsed).as_secs_f64();
                assert!(
                    (delay - (period - elapsed.as_secs_f64())).abs() < TOLERANCE,
                    "fps={} fraction={} delay={}",
                    fps,
                    fraction,
                    delay
                );
            }
        }
    }

    #[test]
    fn test_overrun_gives_zero_delay() {
        assert_eq!(
            frame_delay(10.0, Duration::from_millis(100)),
            Duration::ZERO
        );
        assert_eq!(frame_delay(10.0, Duration::from_secs(3)), Duration::ZERO);
        assert_eq!(frame_delay(1000.0, Duration::from_millis(2)), Duration::ZERO);
    }

    #[test]
    fn test_unrepresentable_period_saturates() {
        assert_eq!(frame_period(1e-20), Duration::MAX);
        assert_eq!(frame_delay(1e-20, Duration::from_secs(1)), Duration::MAX - Duration::from_secs(1));
        assert_eq!(frame_period(0.0), Duration::MAX);
    }

    #[test]
    fn test_period() {
        assert_eq!(frame_period(4.0), Duration::from_millis(250));
        assert!((frame_period(30.0).as_secs_f64() - 1.0 / 30.0).abs() < TOLERANCE);
    }
}
