use std::time::Duration;

/// Controls how a channel paces its connection attempts
///
/// Implementations are owned by a single channel task.
pub trait RetryStrategy: Send {
    /// Reset internal state. Called when a connection is established or a port is opened
    fn reset(&mut self);
    /// Return the delay before the next attempt after a failed connect/open
    fn after_failed_connect(&mut self) -> Duration;
    /// Return the delay after an established session ends
    fn after_disconnect(&mut self) -> Duration;
}

/// Return the default [`RetryStrategy`]: doubling from one second up to one minute
pub fn default_retry_strategy() -> Box<dyn RetryStrategy> {
    doubling_retry_strategy(Duration::from_secs(1), Duration::from_secs(60))
}

/// Return a [`RetryStrategy`] that doubles on failure up to a maximum value
pub fn doubling_retry_strategy(min: Duration, max: Duration) -> Box<dyn RetryStrategy> {
    Box::new(Doubling::new(min, max))
}

struct Doubling {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Doubling {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }
}

impl RetryStrategy for Doubling {
    fn reset(&mut self) {
        self.current = self.min;
    }

    fn after_failed_connect(&mut self) -> Duration {
        let ret = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        ret
    }

    fn after_disconnect(&mut self) -> Duration {
        self.min
    }
}
