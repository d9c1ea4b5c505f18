//! Wait pacing: session lookup backoff and reconciliation jitter.

use std::time::Duration;

/// Exponential backoff for polling a session that has not propagated yet.
///
/// Yields 1ms, 2ms, 4ms, ... doubling up to `cap` and then repeating `cap`.
/// The caller bounds the total wait with its own deadline.
#[derive(Debug, Clone)]
pub struct LookupBackoff {
    next: Duration,
    cap: Duration,
}

impl LookupBackoff {
    /// Start at `initial`, doubling up to `cap`.
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self { next: initial, cap }
    }
}

impl Default for LookupBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_secs(1))
    }
}

impl Iterator for LookupBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next.min(self.cap);
        self.next = current.saturating_mul(2).min(self.cap);
        Some(current)
    }
}

/// A random interval in `[min, max)`, or `min` when the range is empty.
///
/// Routers validating against one controller would otherwise send their
/// chunks in lockstep.
pub fn jittered_interval(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    let spread = (max - min).as_millis() as u64;
    if spread == 0 {
        return min;
    }
    min + Duration::from_millis(random_u64() % spread)
}

fn random_u64() -> u64 {
    let mut bytes = [0u8; 8];
    // Without entropy, fall back to no jitter rather than failing the pass.
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_backoff_doubles_to_cap() {
        let waits: Vec<u64> = LookupBackoff::default()
            .take(13)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(
            waits,
            vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1000, 1000, 1000]
        );
    }

    #[test]
    fn lookup_backoff_respects_small_cap() {
        let mut backoff = LookupBackoff::new(Duration::from_millis(10), Duration::from_millis(15));
        assert_eq!(backoff.next(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(15)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(15)));
    }

    #[test]
    fn jitter_stays_in_range() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(200);
        for _ in 0..1_000 {
            let interval = jittered_interval(min, max);
            assert!(interval >= min && interval < max, "{:?}", interval);
        }
    }

    #[test]
    fn empty_range_uses_min() {
        let d = Duration::from_millis(50);
        assert_eq!(jittered_interval(d, d), d);
        assert_eq!(jittered_interval(d, Duration::from_millis(10)), d);
    }

    #[test]
    fn sub_millisecond_range_uses_min() {
        let min = Duration::from_micros(100);
        assert_eq!(jittered_interval(min, Duration::from_micros(900)), min);
    }
}
