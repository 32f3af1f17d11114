//! Lifecycle coordinator configuration.

use crate::errors::{LifecycleError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the lifecycle coordinator and its epoch monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Below this remaining time the timer switches to fine ticks (default: 60s)
    #[serde(with = "duration_ms", rename = "fine_tick_threshold_ms")]
    pub fine_tick_threshold: Duration,

    /// Tick interval near a phase boundary (default: 500ms)
    #[serde(with = "duration_ms", rename = "fine_tick_interval_ms")]
    pub fine_tick_interval: Duration,

    /// Longest sleep while far from a boundary (default: 60s)
    #[serde(with = "duration_ms", rename = "coarse_tick_interval_ms")]
    pub coarse_tick_interval: Duration,

    /// Re-fetch cadence while closed and awaiting finalization, also used as
    /// back-off after a failed purge (default: 30s)
    #[serde(with = "duration_ms", rename = "closed_poll_interval_ms")]
    pub closed_poll_interval: Duration,

    /// Refuse guarded ephemeral access until startup cleanup has completed
    pub require_startup_cleanup: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            fine_tick_threshold: Duration::from_secs(60),
            fine_tick_interval: Duration::from_millis(500),
            coarse_tick_interval: Duration::from_secs(60),
            closed_poll_interval: Duration::from_secs(30),
            require_startup_cleanup: true,
        }
    }
}

impl LifecycleConfig {
    /// Create config for testing (shorter intervals)
    pub fn for_testing() -> Self {
        Self {
            fine_tick_threshold: Duration::from_secs(5),
            fine_tick_interval: Duration::from_millis(100),
            coarse_tick_interval: Duration::from_secs(5),
            closed_poll_interval: Duration::from_secs(1),
            require_startup_cleanup: false,
        }
    }

    /// Parse from TOML. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| LifecycleError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every interval is non-zero.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("fine_tick_interval", self.fine_tick_interval),
            ("coarse_tick_interval", self.coarse_tick_interval),
            ("closed_poll_interval", self.closed_poll_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(LifecycleError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// Set the fine tick threshold
    pub fn with_fine_tick_threshold(mut self, threshold: Duration) -> Self {
        self.fine_tick_threshold = threshold;
        self
    }

    /// Set the fine tick interval
    pub fn with_fine_tick_interval(mut self, interval: Duration) -> Self {
        self.fine_tick_interval = interval;
        self
    }

    /// Set the coarse tick interval
    pub fn with_coarse_tick_interval(mut self, interval: Duration) -> Self {
        self.coarse_tick_interval = interval;
        self
    }

    /// Set the closed poll interval
    pub fn with_closed_poll_interval(mut self, interval: Duration) -> Self {
        self.closed_poll_interval = interval;
        self
    }

    /// Require or skip startup cleanup before guarded access
    pub fn with_required_startup_cleanup(mut self, required: bool) -> Self {
        self.require_startup_cleanup = required;
        self
    }

    /// How long the timer sleeps when `remaining` is left until the next
    /// boundary.
    ///
    /// Far from the boundary the timer sleeps until it enters the fine window,
    /// capped at the coarse interval. Inside the window it ticks at the fine
    /// interval, never past the boundary itself.
    pub fn tick_interval_for(&self, remaining: Duration) -> Duration {
        if remaining <= self.fine_tick_threshold {
            remaining.min(self.fine_tick_interval)
        } else {
            (remaining - self.fine_tick_threshold).min(self.coarse_tick_interval)
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn coarse_ticks_stop_at_fine_window() {
        let config = LifecycleConfig::default();
        assert_eq!(
            config.tick_interval_for(Duration::from_secs(3 * 60 * 60)),
            Duration::from_secs(60)
        );
        assert_eq!(
            config.tick_interval_for(Duration::from_secs(90)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn fine_ticks_never_overshoot_the_boundary() {
        let config = LifecycleConfig::default();
        assert_eq!(
            config.tick_interval_for(Duration::from_secs(45)),
            Duration::from_millis(500)
        );
        assert_eq!(
            config.tick_interval_for(Duration::from_millis(200)),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn toml_overrides_and_defaults() {
        let config = LifecycleConfig::from_toml_str(
            r#"
            fine_tick_interval_ms = 250
            require_startup_cleanup = false
            "#,
        )
        .unwrap();
        assert_eq!(config.fine_tick_interval, Duration::from_millis(250));
        assert!(!config.require_startup_cleanup);
        assert_eq!(config.closed_poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        assert_matches!(
            LifecycleConfig::from_toml_str("closed_poll_interval_ms = 0"),
            Err(LifecycleError::InvalidConfig(_))
        );
        assert!(LifecycleConfig::for_testing().validate().is_ok());
    }
}
