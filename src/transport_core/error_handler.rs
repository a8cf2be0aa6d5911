use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxRetriesExceeded {
    pub operation: String,
    pub attempts: u32,
}

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Maximum retry attempts exceeded for '{}' after {} attempts",
            self.operation, self.attempts
        )
    }
}

impl std::error::Error for MaxRetriesExceeded {}

/// nth Fibonacci number, 1-indexed: 1, 1, 2, 3, 5, 8, ...
pub fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

/// Retry spacing for connection attempts.
///
/// The k-th failure waits `fib(k) * base`, capped at `max_delay`. After
/// `max_tries` waits the next failure is reported as exhausted.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    base: Duration,
    max_delay: Duration,
    max_tries: u32,
    current_attempt: u32,
}

impl FibonacciBackoff {
    pub fn new(base: Duration, max_delay: Duration, max_tries: u32) -> Self {
        Self {
            base,
            max_delay,
            max_tries,
            current_attempt: 0,
        }
    }

    /// Record a failure of `operation` and return how long to wait before
    /// the next attempt.
    pub fn next_delay(&mut self, operation: &str) -> Result<Duration, MaxRetriesExceeded> {
        if self.current_attempt >= self.max_tries {
            return Err(MaxRetriesExceeded {
                operation: operation.to_string(),
                attempts: self.current_attempt + 1,
            });
        }

        self.current_attempt += 1;
        let factor = u32::try_from(fibonacci(self.current_attempt)).unwrap_or(u32::MAX);
        let delay = std::cmp::min(self.base.saturating_mul(factor), self.max_delay);

        log::warn!(
            "⏳ Retry attempt {} of {} for {} in {:?}",
            self.current_attempt,
            self.max_tries,
            operation,
            delay
        );

        Ok(delay)
    }

    /// First delay of the sequence, used before re-entering the connect loop
    pub fn initial_delay(&self) -> Duration {
        std::cmp::min(self.base, self.max_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Constant-interval polling with a capped number of attempts
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    interval: Duration,
    max_tries: u32,
    current_attempt: u32,
}

impl ConstantBackoff {
    pub fn new(interval: Duration, max_tries: u32) -> Self {
        Self {
            interval,
            max_tries,
            current_attempt: 0,
        }
    }

    pub fn next_delay(&mut self, operation: &str) -> Result<Duration, MaxRetriesExceeded> {
        self.current_attempt += 1;
        if self.current_attempt >= self.max_tries {
            return Err(MaxRetriesExceeded {
                operation: operation.to_string(),
                attempts: self.current_attempt,
            });
        }
        Ok(self.interval)
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_sequence() {
        let seq: Vec<u64> = (1..=8).map(fibonacci).collect();
        assert_eq!(seq, vec![1, 1, 2, 3, 5, 8, 13, 21]);
        assert_eq!(fibonacci(0), 0);
        assert_eq!(fibonacci(200), u64::MAX);
    }

    #[test]
    fn test_delays_follow_fibonacci_with_cap() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(10), 15);
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay("connect").unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 1, 2, 3, 5, 8, 10, 10]);
    }

    #[test]
    fn test_exhaustion_after_max_tries() {
        let mut backoff =
            FibonacciBackoff::new(Duration::from_millis(10), Duration::from_secs(60), 15);
        for _ in 0..15 {
            assert!(backoff.next_delay("connect").is_ok());
        }
        let err = backoff.next_delay("connect").unwrap_err();
        assert_eq!(err.attempts, 16);
        assert_eq!(err.operation, "connect");
        assert!(err.to_string().contains("connect"));
    }

    #[test]
    fn test_reset() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(2), Duration::from_secs(60), 3);
        backoff.next_delay("connect").unwrap();
        backoff.next_delay("connect").unwrap();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay("connect").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_constant_backoff_budget() {
        let mut probe = ConstantBackoff::new(Duration::from_millis(500), 3);
        assert_eq!(probe.next_delay("probe").unwrap(), Duration::from_millis(500));
        assert_eq!(probe.next_delay("probe").unwrap(), Duration::from_millis(500));
        let err = probe.next_delay("probe").unwrap_err();
        assert_eq!(err.attempts, 3);
    }
}
