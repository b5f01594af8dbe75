use crate::config::EngineConfig;
use rand::Rng;
use std::time::Duration;

const BACK_OFF_MULTIPLIER: f64 = 0.5;

/// Jittered idle wait between poll attempts
#[derive(Debug, Clone)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.sleep_buffer_min, config.sleep_buffer_max)
    }

    /// No waiting at all (tests, replay)
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Uniform random duration within `[min, max]`
    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    pub async fn idle(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        tracing::debug!("[idle] sleep .. {:.2}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

/// Fatal-error backoff for the cycle scheduler
///
/// Each wait is `base + base * 0.5`; the wait is then added to `base`,
/// which falls back to the start value once it reaches the limit.
#[derive(Debug, Clone)]
pub struct Backoff {
    start: Duration,
    limit: Duration,
    base: Duration,
}

impl Backoff {
    pub fn new(start: Duration, limit: Duration) -> Self {
        Self {
            start,
            limit,
            base: start,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.back_off_start, config.back_off_limit)
    }

    pub fn next_wait(&mut self) -> Duration {
        let wait = self.base + self.base.mul_f64(BACK_OFF_MULTIPLIER);
        self.base += wait;
        if self.base >= self.limit {
            self.base = self.start;
        }
        wait
    }

    pub fn reset(&mut self) {
        self.base = self.start;
    }

    pub async fn wait(&mut self) {
        let wait = self.next_wait();
        tracing::debug!("[backoff] sleep .. {:.2}s", wait.as_secs_f64());
        tokio::time::sleep(wait).await;
    }
}
