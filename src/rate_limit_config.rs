use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;

pub const DEMO_URL_SERVICE: &str = "demo_url_service";
pub const IDENTITY_SERVICE: &str = "identity_service";
pub const PARSER_JOBS: &str = "parser_jobs";

/// Admission policy for one named external resource.
///
/// A policy with a window allows `max` operations per window. A policy
/// without one is a counting semaphore over in-flight jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub service: String,
    pub max: u64,
    #[serde(default, with = "humantime_serde")]
    pub window: Option<Duration>,
}

impl RateLimitPolicy {
    pub fn windowed(service: impl Into<String>, max: u64, window: Duration) -> Self {
        Self {
            service: service.into(),
            max,
            window: Some(window),
        }
    }

    pub fn semaphore(service: impl Into<String>, max: u64) -> Self {
        Self {
            service: service.into(),
            max,
            window: None,
        }
    }

    /// External match-URL resolution service: 20 requests per minute.
    pub fn demo_url_service() -> Self {
        Self::windowed(DEMO_URL_SERVICE, 20, Duration::from_secs(60))
    }

    /// External identity service: 100 requests per five minutes.
    pub fn identity_service() -> Self {
        Self::windowed(IDENTITY_SERVICE, 100, Duration::from_secs(300))
    }

    pub fn parser_slots(max_concurrent: u64) -> Self {
        Self::semaphore(PARSER_JOBS, max_concurrent)
    }

    pub fn is_windowed(&self) -> bool {
        self.window.is_some()
    }

    /// Validate policy parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.service.trim().is_empty() {
            return Err("Service name cannot be empty".to_string());
        }
        if self.max == 0 {
            return Err("Maximum must be greater than 0".to_string());
        }
        if let Some(window) = self.window {
            if window.is_zero() {
                return Err("Window size must be greater than 0".to_string());
            }
        }
        Ok(())
    }
}

/// The three policies callers are wired with.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitPolicies {
    pub demo_url: RateLimitPolicy,
    pub identity: RateLimitPolicy,
    pub parser: RateLimitPolicy,
}

impl RateLimitPolicies {
    pub fn from_config(config: &Config) -> Self {
        Self {
            demo_url: RateLimitPolicy::demo_url_service(),
            identity: RateLimitPolicy::identity_service(),
            parser: RateLimitPolicy::parser_slots(config.max_concurrent_parser_jobs),
        }
    }

    /// Look a policy up by its service name
    pub fn by_service(&self, service: &str) -> Option<&RateLimitPolicy> {
        self.all().into_iter().find(|policy| policy.service == service)
    }

    pub fn all(&self) -> [&RateLimitPolicy; 3] {
        [&self.demo_url, &self.identity, &self.parser]
    }
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        Self {
            demo_url: RateLimitPolicy::demo_url_service(),
            identity: RateLimitPolicy::identity_service(),
            parser: RateLimitPolicy::parser_slots(3),
        }
    }
}
