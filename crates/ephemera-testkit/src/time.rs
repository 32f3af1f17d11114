//! Clock for deterministic tests.
//!
//! Physical time is a fixed base plus the elapsed tokio time, so under
//! `#[tokio::test(start_paused = true)]` the clock only moves when the
//! runtime auto-advances past pending sleeps or the test calls
//! `tokio::time::advance`.

use async_trait::async_trait;
use ephemera_core::{PhysicalTime, PhysicalTimeEffects, TimeError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Tokio-driven controllable clock
#[derive(Debug)]
pub struct TokioClock {
    base: PhysicalTime,
    origin: Instant,
    failing: AtomicBool,
    sleep_failing: AtomicBool,
}

impl TokioClock {
    /// Clock reading `base_ms` now. Create inside the runtime.
    pub fn new(base_ms: u64) -> Self {
        Self {
            base: PhysicalTime::from_millis(base_ms),
            origin: Instant::now(),
            failing: AtomicBool::new(false),
            sleep_failing: AtomicBool::new(false),
        }
    }

    /// Current reading without going through the trait.
    pub fn now(&self) -> PhysicalTime {
        self.base.saturating_add(self.origin.elapsed())
    }

    /// Timestamp `offset` after the current reading.
    pub fn after(&self, offset: Duration) -> PhysicalTime {
        self.now().saturating_add(offset)
    }

    /// Make `physical_time` fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `sleep_ms` fail immediately until reset.
    pub fn set_sleep_failing(&self, failing: bool) {
        self.sleep_failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PhysicalTimeEffects for TokioClock {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TimeError::ServiceUnavailable);
        }
        Ok(self.now())
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        if self.sleep_failing.load(Ordering::SeqCst) {
            return Err(TimeError::ServiceUnavailable);
        }
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn advances_with_paused_runtime() {
        let clock = TokioClock::new(1_000);
        assert_eq!(clock.physical_time().await.unwrap().ts_ms, 1_000);

        clock.sleep_ms(2_500).await.unwrap();
        assert_eq!(clock.physical_time().await.unwrap().ts_ms, 3_500);

        clock.set_failing(true);
        assert!(clock.physical_time().await.is_err());

        clock.set_sleep_failing(true);
        assert!(clock.sleep_ms(10).await.is_err());
    }
}
