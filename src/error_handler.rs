use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Capped exponential backoff for loops that must never give up
///
/// Delays double from `initial` up to `max`, with up to 10% jitter so that
/// several workers restarting together do not retry in lockstep.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            current_attempt: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    /// Delay for the current attempt, advancing the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2_u32.saturating_pow(self.current_attempt.min(16));
        let base = self
            .initial_delay
            .saturating_mul(factor)
            .min(self.max_delay);

        let jitter_cap = (base.as_millis() / 10) as u64;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };

        self.current_attempt = self.current_attempt.saturating_add(1);
        base + Duration::from_millis(jitter)
    }

    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        log::warn!(
            "⏳ Retry attempt {} in {}ms",
            self.current_attempt,
            delay.as_millis()
        );
        sleep(delay).await;
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
