//! Segment split decisions.
//!
//! Two competing cutoffs close an open segment: its duration limit and the
//! time since the last loud block. Both are explicit deadline comparisons
//! against one clock reading rather than concurrent timers, which keeps the
//! race deterministic: at most one trigger wins per evaluation, duration
//! taking precedence when both have expired.

use std::time::{Duration, Instant};

/// Why the current segment was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitReason {
    /// Segment lifetime reached the configured duration limit.
    DurationExpired,
    /// No block reached the loudness threshold for the silence-cutoff span.
    SilenceExpired,
    /// Engine stop or device failure closed the segment early.
    SessionEnded,
}

/// Deadline tracker for one open segment.
#[derive(Debug, Clone)]
pub struct SplitPolicy {
    segment_duration: Duration,
    silence_cutoff: Duration,
    opened_at: Instant,
    last_loud: Instant,
}

impl SplitPolicy {
    pub fn new(segment_duration: Duration, silence_cutoff: Duration, now: Instant) -> Self {
        Self {
            segment_duration,
            silence_cutoff,
            opened_at: now,
            last_loud: now,
        }
    }

    /// Start a new segment: both deadlines rebase to `now`.
    pub fn reset(&mut self, now: Instant) {
        self.opened_at = now;
        self.last_loud = now;
    }

    /// Record a block at or above the loudness threshold.
    pub fn mark_loud(&mut self, now: Instant) {
        self.last_loud = now;
    }

    /// Evaluate both triggers against `now`.
    ///
    /// Returns at most one reason; duration expiry is checked first so the
    /// two triggers can never both fire in one iteration.
    pub fn check(&self, now: Instant) -> Option<SplitReason> {
        if now.duration_since(self.opened_at) >= self.segment_duration {
            return Some(SplitReason::DurationExpired);
        }
        if now.duration_since(self.last_loud) >= self.silence_cutoff {
            return Some(SplitReason::SilenceExpired);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECS_30: Duration = Duration::from_secs(30);
    const SECS_20: Duration = Duration::from_secs(20);

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    #[test]
    fn no_trigger_before_either_deadline() {
        let base = Instant::now();
        let policy = SplitPolicy::new(SECS_30, SECS_20, base);
        assert_eq!(policy.check(at(base, 19.99)), None);
    }

    #[test]
    fn duration_never_fires_early() {
        let base = Instant::now();
        let mut policy = SplitPolicy::new(SECS_30, SECS_20, base);
        // Keep marking loud so silence never expires.
        for s in 1..30 {
            policy.mark_loud(at(base, s as f64));
            assert_eq!(policy.check(at(base, s as f64)), None, "early at t={s}");
        }
        assert_eq!(
            policy.check(at(base, 30.0)),
            Some(SplitReason::DurationExpired)
        );
    }

    #[test]
    fn silence_fires_measured_from_last_loud_block() {
        // Loud pulse in the first second, then pure silence: the segment
        // closes at t ≈ 21 s, 20 s after the pulse.
        let base = Instant::now();
        let mut policy = SplitPolicy::new(SECS_30, SECS_20, base);
        policy.mark_loud(at(base, 1.0));

        assert_eq!(policy.check(at(base, 20.9)), None);
        assert_eq!(
            policy.check(at(base, 21.0)),
            Some(SplitReason::SilenceExpired)
        );
    }

    #[test]
    fn duration_wins_when_silence_has_not_yet_expired() {
        // 10 s silence, 1 s loud (until t=11), 25 s silence: at t=30 the
        // silence span is 19 s < 20 s, so the duration trigger closes the
        // segment at t ≈ 30 s, not the silence trigger at t ≈ 31 s.
        let base = Instant::now();
        let mut policy = SplitPolicy::new(SECS_30, SECS_20, base);
        policy.mark_loud(at(base, 10.0));
        policy.mark_loud(at(base, 11.0));

        assert_eq!(policy.check(at(base, 29.9)), None);
        assert_eq!(
            policy.check(at(base, 30.0)),
            Some(SplitReason::DurationExpired)
        );
    }

    #[test]
    fn duration_takes_precedence_when_both_expired() {
        let base = Instant::now();
        let policy = SplitPolicy::new(SECS_30, SECS_20, base);
        // No loud block ever: at t=30 both deadlines are long past.
        assert_eq!(
            policy.check(at(base, 30.0)),
            Some(SplitReason::DurationExpired)
        );
    }

    #[test]
    fn silence_fires_when_segment_is_all_quiet() {
        let base = Instant::now();
        let policy = SplitPolicy::new(SECS_30, SECS_20, base);
        assert_eq!(
            policy.check(at(base, 20.0)),
            Some(SplitReason::SilenceExpired)
        );
    }

    #[test]
    fn cutoff_longer_than_duration_is_legal() {
        let base = Instant::now();
        let policy = SplitPolicy::new(Duration::from_secs(10), Duration::from_secs(40), base);
        assert_eq!(policy.check(at(base, 9.9)), None);
        assert_eq!(
            policy.check(at(base, 10.0)),
            Some(SplitReason::DurationExpired)
        );
    }

    #[test]
    fn reset_rebases_both_deadlines() {
        let base = Instant::now();
        let mut policy = SplitPolicy::new(SECS_30, SECS_20, base);
        policy.reset(at(base, 30.0));
        assert_eq!(policy.check(at(base, 49.9)), None);
        assert_eq!(
            policy.check(at(base, 50.0)),
            Some(SplitReason::SilenceExpired)
        );
    }
}
