use std::time::{Duration, Instant};

/// Exponential backoff with a cap, used to pace hot polling loops.
///
/// Runs inside a single worker task — no synchronization needed. A backoff
/// is "live" from the moment `backoff()` is called until `next_activation`
/// passes; the dequeue worker excludes a topic from its queries while the
/// topic's backoff is live.
pub struct BackoffStrategy {
    base: Duration,
    factor: f32,
    cap: Duration,

    delay: Duration,
    next_activation: Instant,
}

impl BackoffStrategy {
    pub fn new(base: Duration, factor: f32, cap: Duration) -> Self {
        Self {
            base,
            factor,
            cap,
            delay: Duration::ZERO,
            next_activation: Instant::now(),
        }
    }

    /// Escalate the delay: `delay <- min(cap, base + delay * factor)`.
    pub fn backoff(&mut self) {
        self.delay = (self.base + self.delay.mul_f64(f64::from(self.factor))).min(self.cap);
        self.next_activation = Instant::now() + self.delay;
    }

    /// Return the strategy to its initial, non-blocking state.
    pub fn reset(&mut self) {
        self.delay = Duration::ZERO;
        self.next_activation = Instant::now();
    }

    /// A sleep that completes once the current delay has elapsed. Completes
    /// immediately when no backoff has been applied.
    pub fn after(&self) -> tokio::time::Sleep {
        tokio::time::sleep(self.delay)
    }

    /// True while the backoff is live, i.e. `next_activation` has not
    /// passed yet.
    pub fn is_active(&self) -> bool {
        Instant::now() < self.next_activation
    }

    /// The current delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}
