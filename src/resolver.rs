//! Demo URL resolution through the external demo URL service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{DemoError, ResolveError, Result};
use crate::rate_limit_config::RateLimitPolicy;
use crate::rate_limiter::{until_cancelled, RateLimiter};
use crate::shard::{ShardResolver, DEFAULT_SHARDS};
use crate::sharecode;

/// Anything that can turn a sharecode into a ready-to-download URL.
///
/// `None` covers both "not ready yet" and "failed"; callers retry later.
#[async_trait]
pub trait DemoUrlSource: Send + Sync {
    async fn resolve(&self, sharecode: &str, cancel: Option<&CancellationToken>) -> Option<String>;
}

/// Retries apply to transport failures only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Serialize)]
struct DemoRequest<'a> {
    sharecode: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DemoResponse {
    #[serde(default)]
    demo_url: Option<String>,
    #[serde(default)]
    service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemoUrl {
    pub url: String,
    pub service: Option<String>,
}

pub struct UrlResolver {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    limiter: RateLimiter,
    policy: RateLimitPolicy,
    retry: RetryPolicy,
    shards: ShardResolver,
}

impl UrlResolver {
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
        limiter: RateLimiter,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DemoError::Config(format!("Failed to build resolver client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            limiter,
            policy: RateLimitPolicy::demo_url_service(),
            retry: RetryPolicy::default(),
            shards: ShardResolver::new()?,
        })
    }

    pub fn from_config(config: &Config, limiter: RateLimiter) -> Result<Self> {
        Self::new(
            config.demo_url_service_base.clone(),
            config.demo_url_service_api_key.clone(),
            limiter,
            config.resolve_timeout(),
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_shard_resolver(mut self, shards: ShardResolver) -> Self {
        self.shards = shards;
        self
    }

    /// Resolve with the failure reason kept.
    ///
    /// Consumes one unit of the demo URL service budget, waiting for
    /// capacity when the window is exhausted. Transport retries reuse that
    /// unit. `cancel` covers the wait, every attempt and the body read.
    pub async fn try_resolve(
        &self,
        sharecode: &str,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<DemoUrl, ResolveError> {
        let (base_url, api_key) = match (self.base_url.as_deref(), self.api_key.as_deref()) {
            (Some(base), Some(key)) if !base.is_empty() && !key.is_empty() => (base, key),
            _ => return Err(ResolveError::MissingConfig),
        };

        self.limiter
            .acquire(&self.policy, cancel)
            .await
            .map_err(|err| match err {
                DemoError::Cancelled => ResolveError::Cancelled,
                other => ResolveError::Limiter(other.to_string()),
            })?;

        let endpoint = format!("{}/demo", base_url.trim_end_matches('/'));
        let mut attempts = 0;
        let response = loop {
            attempts += 1;
            let request = self
                .client
                .post(&endpoint)
                .header("X-API-Key", api_key)
                .json(&DemoRequest { sharecode })
                .send();

            match until_cancelled(cancel, request)
                .await
                .ok_or(ResolveError::Cancelled)?
            {
                Ok(response) => break response,
                Err(err) if attempts <= self.retry.retries => {
                    warn!(sharecode, attempt = attempts, error = %err, "Demo URL request failed, retrying");
                    until_cancelled(cancel, tokio::time::sleep(self.retry.delay))
                        .await
                        .ok_or(ResolveError::Cancelled)?;
                }
                Err(err) => {
                    return Err(ResolveError::Transport {
                        attempts,
                        message: err.to_string(),
                    })
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status.as_u16()));
        }

        let body: DemoResponse = until_cancelled(cancel, response.json::<DemoResponse>())
            .await
            .ok_or(ResolveError::Cancelled)?
            .map_err(|e| ResolveError::Decode(e.to_string()))?;

        match body.demo_url {
            Some(url) if !url.trim().is_empty() => Ok(DemoUrl {
                url,
                service: body.service,
            }),
            _ => Err(ResolveError::NotReady),
        }
    }

    /// Brute-force path for callers that hold only a raw sharecode:
    /// decode it and probe the CDN shards.
    pub async fn resolve_by_probe(&self, sharecode: &str) -> Option<String> {
        let decoded = match sharecode::decode(sharecode) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(sharecode, error = %err, "Cannot probe shards for malformed sharecode");
                return None;
            }
        };

        match self.shards.find_shard(&decoded, DEFAULT_SHARDS).await {
            Ok(shard) => Some(self.shards.url_for(&decoded, shard)),
            Err(err) => {
                warn!(sharecode, error = %err, "Shard probe found no demo");
                None
            }
        }
    }
}

#[async_trait]
impl DemoUrlSource for UrlResolver {
    async fn resolve(&self, sharecode: &str, cancel: Option<&CancellationToken>) -> Option<String> {
        match self.try_resolve(sharecode, cancel).await {
            Ok(demo) => {
                info!(sharecode, service = ?demo.service, "Resolved demo URL");
                Some(demo.url)
            }
            Err(err @ ResolveError::NotReady) => {
                info!(sharecode, reason = err.kind(), "Demo URL not available yet");
                None
            }
            Err(err @ ResolveError::MissingConfig) => {
                error!(sharecode, reason = err.kind(), "Demo URL service is not configured");
                None
            }
            Err(err) => {
                warn!(sharecode, reason = err.kind(), error = %err, "Demo URL resolution failed");
                None
            }
        }
    }
}
