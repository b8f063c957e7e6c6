//! Bounded polling schedule with exponential backoff and jitter.

use std::time::{Duration, Instant};

use rand::Rng;

/// Delay before poll number `attempt` (0-based): `base * 2^attempt`, capped at `max`,
/// plus up to 10% jitter.
pub fn poll_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    let capped = base.saturating_mul(factor).min(max);

    let jitter_range = capped.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    capped + Duration::from_millis(jitter)
}

/// A deadline-bounded sequence of poll delays.
///
/// `next_delay` returns `None` once the deadline has passed; the final delay
/// is clipped so the last poll lands on the deadline rather than after it.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    base: Duration,
    max: Duration,
    deadline: Instant,
    attempt: u32,
}

impl PollSchedule {
    pub fn new(base: Duration, max: Duration, budget: Duration) -> Self {
        Self {
            base,
            max,
            deadline: Instant::now() + budget,
            attempt: 0,
        }
    }

    /// Delay to sleep before the next poll, or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }
        let delay = poll_delay(self.attempt, self.base, self.max);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay.min(remaining))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
