//! Engine configuration

use serde::{Deserialize, Serialize};

use sotto_core::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_SEARCH_BUDGET_MS, DEFAULT_SESSION_TTL_MS,
    MAX_CONCURRENT_RECOVERIES, RECOVERY_ATTEMPT_TIMEOUT_MS,
};

use crate::recovery::RecoveryOptions;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long an activated session lives
    pub session_ttl_ms: u64,

    /// Time budget for one candidate search
    pub search_budget_ms: u64,

    /// Cap on concurrently tracked recovery operations
    pub max_concurrent_recoveries: usize,

    /// Timeout for a single recovery strategy attempt
    pub recovery_timeout_ms: u64,

    /// Default retry budget for recovery operations
    pub max_retries: u32,

    /// Default delay between recovery attempts
    pub retry_delay_ms: u64,

    /// Whether recovery delays grow exponentially
    pub exponential_backoff: bool,

    /// Panic phrases recognized in addition to the built-ins
    pub extra_panic_phrases: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl_ms: DEFAULT_SESSION_TTL_MS,
            search_budget_ms: DEFAULT_SEARCH_BUDGET_MS,
            max_concurrent_recoveries: MAX_CONCURRENT_RECOVERIES,
            recovery_timeout_ms: RECOVERY_ATTEMPT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            exponential_backoff: true,
            extra_panic_phrases: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Recovery options seeded from this configuration
    pub fn recovery_options(&self) -> RecoveryOptions {
        RecoveryOptions {
            can_retry: true,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            exponential_backoff: self.exponential_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.session_ttl_ms, 15 * 60 * 1000);
        assert_eq!(config.search_budget_ms, 2_000);
        assert_eq!(config.max_concurrent_recoveries, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1_000);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");

        let mut config = EngineConfig::default();
        config.session_ttl_ms = 60_000;
        config.extra_panic_phrases.push("code red".to_string());
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.session_ttl_ms, 60_000);
        assert_eq!(loaded.extra_panic_phrases, vec!["code red".to_string()]);
    }
}
