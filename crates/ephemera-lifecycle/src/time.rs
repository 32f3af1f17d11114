//! Real time handler for production use

use async_trait::async_trait;
use ephemera_core::{PhysicalTime, PhysicalTimeEffects, TimeError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time with tokio sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeHandler;

impl SystemTimeHandler {
    /// Create a new system time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for SystemTimeHandler {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TimeError::OperationFailed {
                reason: e.to_string(),
            })?;
        let ts_ms = u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX);
        Ok(PhysicalTime::from_millis(ts_ms))
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_time_after_2020() {
        let now = SystemTimeHandler::new().physical_time().await.unwrap();
        assert!(now.ts_ms > 1_577_836_800_000);
    }
}
