use std::time::Duration;

/// Reconnect delay that doubles after every failure up to a ceiling.
///
/// `next_delay` hands out the current delay and then doubles it, so the
/// first reconnect waits `initial`, the second `2 * initial`, and so on.
/// A successful open calls `reset`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(initial_ms), Duration::from_millis(max_ms))
    }

    /// Delay to wait before the next reconnect; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Delay the next call to `next_delay` will return.
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_millis(1500, 30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_to_ceiling() {
        let mut b = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1500, 3000, 6000, 12_000, 24_000, 30_000, 30_000]);
        assert_eq!(b.attempts(), 7);
    }

    #[test]
    fn test_reset_restores_initial() {
        let mut b = Backoff::default();
        b.next_delay();
        b.next_delay();
        assert_eq!(b.peek(), Duration::from_millis(6000));
        b.reset();
        assert_eq!(b.peek(), Duration::from_millis(1500));
        assert_eq!(b.attempts(), 0);
    }

    #[test]
    fn test_ceiling_below_initial_is_raised() {
        let mut b = Backoff::from_millis(5000, 1000);
        assert_eq!(b.next_delay(), Duration::from_millis(5000));
        assert_eq!(b.next_delay(), Duration::from_millis(5000));
    }
}
