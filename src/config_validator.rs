use crate::config::Config;
use crate::error::DemoError;
use crate::rate_limit_config::RateLimitPolicies;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL. Empty means in-process counters.
    pub fn validate_redis_url(url: &str) -> Result<(), DemoError> {
        if url.is_empty() {
            return Ok(());
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(DemoError::Validation(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the demo URL service base, when one is configured
    pub fn validate_service_base(base: Option<&str>) -> Result<(), DemoError> {
        match base {
            None => Ok(()),
            Some(base) if base.starts_with("http://") || base.starts_with("https://") => Ok(()),
            Some(base) => Err(DemoError::Validation(format!(
                "Demo URL service base must be an http(s) URL, got '{}'",
                base
            ))),
        }
    }

    /// Validates download bounds
    pub fn validate_download_limits(max_file_size: u64, timeout_secs: u64) -> Result<(), DemoError> {
        if max_file_size == 0 {
            return Err(DemoError::Validation(
                "Maximum demo file size must be greater than 0".to_string(),
            ));
        }

        if timeout_secs == 0 {
            return Err(DemoError::Validation(
                "Download timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates retention sweep parameters
    pub fn validate_retention(max_age_secs: u64, interval_secs: u64) -> Result<(), DemoError> {
        if max_age_secs == 0 {
            return Err(DemoError::Validation(
                "Retention max age must be greater than 0".to_string(),
            ));
        }

        if interval_secs == 0 {
            return Err(DemoError::Validation(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate(config: &Config) -> Result<(), DemoError> {
        Self::validate_redis_url(config.redis_url.trim())?;
        Self::validate_service_base(config.demo_url_service_base.as_deref())?;
        Self::validate_download_limits(config.max_file_size, config.download_timeout_secs)?;
        Self::validate_retention(config.retention_max_age_secs, config.sweep_interval_secs)?;

        for policy in RateLimitPolicies::from_config(config).all() {
            policy
                .validate()
                .map_err(|e| DemoError::Validation(format!("{}: {}", policy.service, e)))?;
        }

        if config.resolve_timeout_secs == 0 {
            return Err(DemoError::Validation(
                "Resolve timeout must be greater than 0".to_string(),
            ));
        }

        if config.request_timeout_secs == 0 {
            return Err(DemoError::Validation(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
