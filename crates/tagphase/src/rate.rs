//! Read-rate estimation

use std::time::Instant;

use arraydeque::ArrayDeque;

/// Number of past updates the rate is measured across
pub const RATE_HISTORY: usize = 6;

/// Estimates tag reads per second
///
/// Remembers the cumulative tag count at each of the last
/// [`RATE_HISTORY`] updates and measures the rate against the
/// oldest. The counter is created with one entry: the time of
/// construction and the initial count.
#[derive(Clone, Debug)]
pub struct ReadRateCounter {
    history: ArrayDeque<(Instant, u64), RATE_HISTORY, arraydeque::Wrapping>,
}

impl ReadRateCounter {
    /// New counter starting now, at a count of `initial`
    pub fn new(initial: u64) -> Self {
        Self::new_at(Instant::now(), initial)
    }

    /// New counter starting at `now`
    pub fn new_at(now: Instant, initial: u64) -> Self {
        let mut history: ArrayDeque<(Instant, u64), RATE_HISTORY, arraydeque::Wrapping> =
            ArrayDeque::new();
        history.push_back((now, initial));
        Self { history }
    }

    /// Record the cumulative count `total` and estimate the rate
    pub fn update(&mut self, total: u64) -> Option<f64> {
        self.update_at(Instant::now(), total)
    }

    /// Record the cumulative count `total` at time `now`
    ///
    /// Returns reads per second since the oldest remembered
    /// update. If no time has elapsed, the rate is unavailable
    /// and `None` is returned. The update is recorded either way.
    pub fn update_at(&mut self, now: Instant, total: u64) -> Option<f64> {
        let rate = self.history.front().and_then(|&(then, count)| {
            let elapsed = now.saturating_duration_since(then).as_secs_f64();
            if elapsed > 0.0 {
                Some((total as f64 - count as f64) / elapsed)
            } else {
                None
            }
        });

        self.history.push_back((now, total));
        rate
    }

    /// Forget all updates and restart at `initial`
    pub fn reset(&mut self, initial: u64) {
        self.reset_at(Instant::now(), initial);
    }

    /// Forget all updates and restart at `now`
    pub fn reset_at(&mut self, now: Instant, initial: u64) {
        self.history.clear();
        self.history.push_back((now, initial));
    }
}

impl Default for ReadRateCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_rate() {
        let t0 = Instant::now();
        let at = |secs: u64| t0 + Duration::from_secs(secs);

        let mut ctr = ReadRateCounter::new_at(t0, 0);

        // measured against the start until the ring is full
        assert_approx_eq!(10.0, ctr.update_at(at(1), 10).unwrap());
        assert_approx_eq!(15.0, ctr.update_at(at(2), 30).unwrap());
        for s in 3..=5 {
            ctr.update_at(at(s), 30);
        }
        assert_approx_eq!(5.0, ctr.update_at(at(6), 30).unwrap());

        // oldest is now the first update
        assert_approx_eq!((90.0 - 10.0) / 6.0, ctr.update_at(at(7), 90).unwrap());
    }

    #[test]
    fn test_zero_elapsed() {
        let t0 = Instant::now();
        let mut ctr = ReadRateCounter::new_at(t0, 0);
        assert_eq!(None, ctr.update_at(t0, 100));

        ctr.reset_at(t0, 100);
        assert_eq!(
            Some(0.0),
            ctr.update_at(t0 + Duration::from_millis(500), 100)
        );
    }
}
