//! Configuration for caches, the module registry and session timing.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for the HRMS client core.
///
/// Durations deserialize from whole seconds (`*_secs`) or milliseconds
/// (`*_ms`) so the struct can be loaded from a plain JSON settings file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// TTL for slow-changing reference data (employees, departments, ...).
    #[serde(rename = "reference_data_ttl_secs", with = "secs")]
    pub reference_data_ttl: Duration,
    /// TTL for the department-scoped position sub-cache.
    #[serde(rename = "department_positions_ttl_secs", with = "secs")]
    pub department_positions_ttl: Duration,
    /// TTL for the module registry list.
    #[serde(rename = "module_registry_ttl_secs", with = "secs")]
    pub module_registry_ttl: Duration,
    /// Quiet period before a burst of permission updates is processed.
    #[serde(rename = "permission_update_debounce_ms", with = "millis")]
    pub permission_update_debounce: Duration,
    /// How long before token expiry the proactive refresh fires.
    #[serde(rename = "token_refresh_lead_secs", with = "secs")]
    pub token_refresh_lead: Duration,
    /// Below this remaining lifetime no refresh is scheduled.
    #[serde(rename = "token_refresh_min_remaining_secs", with = "secs")]
    pub token_refresh_min_remaining: Duration,
    /// Name of the cross-tab broadcast channel.
    pub channel_name: String,
    /// Buffered messages per channel subscriber.
    pub channel_capacity: usize,
    /// Durable-store key holding the cached module list.
    pub module_cache_key: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            reference_data_ttl: Duration::from_secs(24 * 60 * 60),
            department_positions_ttl: Duration::from_secs(30 * 60),
            module_registry_ttl: Duration::from_secs(60 * 60),
            permission_update_debounce: Duration::from_millis(500),
            token_refresh_lead: Duration::from_secs(5 * 60),
            token_refresh_min_remaining: Duration::from_secs(60),
            channel_name: "hrms-auth-sync".to_string(),
            channel_capacity: 64,
            module_cache_key: "hrms.modules.cache".to_string(),
        }
    }
}

impl CoreConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the reference data TTL.
    pub fn reference_data_ttl(mut self, ttl: Duration) -> Self {
        self.reference_data_ttl = ttl;
        self
    }

    /// Set the department-scoped positions TTL.
    pub fn department_positions_ttl(mut self, ttl: Duration) -> Self {
        self.department_positions_ttl = ttl;
        self
    }

    /// Set the module registry TTL.
    pub fn module_registry_ttl(mut self, ttl: Duration) -> Self {
        self.module_registry_ttl = ttl;
        self
    }

    /// Set the permission update debounce window.
    pub fn permission_update_debounce(mut self, debounce: Duration) -> Self {
        self.permission_update_debounce = debounce;
        self
    }

    /// Set the cross-tab channel name.
    pub fn channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = name.into();
        self
    }

    /// Check the configuration for values that would disable caching or sync.
    pub fn validate(&self) -> Result<()> {
        let ttls = [
            ("reference_data_ttl", self.reference_data_ttl),
            ("department_positions_ttl", self.department_positions_ttl),
            ("module_registry_ttl", self.module_registry_ttl),
        ];
        for (name, ttl) in ttls {
            if ttl.is_zero() {
                return Err(Error::InvalidConfiguration(format!("{name} must be non-zero")));
            }
        }
        if self.token_refresh_min_remaining >= self.token_refresh_lead {
            return Err(Error::InvalidConfiguration(
                "token_refresh_min_remaining must be shorter than token_refresh_lead".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "channel_capacity must be non-zero".to_string(),
            ));
        }
        if self.channel_name.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "channel_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.reference_data_ttl, Duration::from_secs(86_400));
        assert_eq!(config.department_positions_ttl, Duration::from_secs(1_800));
        assert_eq!(config.module_registry_ttl, Duration::from_secs(3_600));
        assert_eq!(config.permission_update_debounce, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = CoreConfig::from_json_str(
            r#"{"module_registry_ttl_secs": 120, "permission_update_debounce_ms": 50}"#,
        )
        .unwrap();
        assert_eq!(config.module_registry_ttl, Duration::from_secs(120));
        assert_eq!(config.permission_update_debounce, Duration::from_millis(50));
        assert_eq!(config.reference_data_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_validation_rejects_zero_ttl() {
        let config = CoreConfig::default().reference_data_ttl(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));

        assert!(CoreConfig::from_json_str(r#"{"channel_capacity": 0}"#).is_err());
        assert!(CoreConfig::from_json_str("not json").is_err());
    }
}
