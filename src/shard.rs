//! CDN shard discovery.
//!
//! The shard holding a demo is not derivable from the sharecode, so the
//! candidates are probed in order with a HEAD request until one answers 200.

use reqwest::StatusCode;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DemoError, Result, ShardNotFound};
use crate::sharecode::{build_url_with_template, DecodedShareCode, DEFAULT_CDN_TEMPLATE};

pub const DEFAULT_SHARDS: RangeInclusive<u32> = 1..=20;
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ShardResolver {
    client: reqwest::Client,
    template: String,
}

impl ShardResolver {
    /// Resolver against the public replay CDN.
    pub fn new() -> Result<Self> {
        Self::with_template(DEFAULT_CDN_TEMPLATE, PROBE_TIMEOUT)
    }

    /// Resolver against any host template containing `{shard}`.
    pub fn with_template(template: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DemoError::Config(format!("Failed to build probe client: {}", e)))?;

        Ok(Self {
            client,
            template: template.into(),
        })
    }

    pub fn url_for(&self, decoded: &DecodedShareCode, shard: u32) -> String {
        build_url_with_template(decoded, &self.template, shard)
    }

    /// First candidate whose HEAD answers exactly 200.
    ///
    /// Transport errors on one shard count as a miss and the scan goes on.
    pub async fn find_shard<I>(
        &self,
        decoded: &DecodedShareCode,
        candidates: I,
    ) -> std::result::Result<u32, ShardNotFound>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut tried = 0;
        for shard in candidates {
            tried += 1;
            let url = self.url_for(decoded, shard);
            match self.client.head(&url).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    info!(shard, match_id = decoded.match_id, "Found demo shard");
                    return Ok(shard);
                }
                Ok(response) => {
                    debug!(shard, status = %response.status(), "Shard probe missed");
                }
                Err(err) => {
                    debug!(shard, error = %err, "Shard probe failed");
                }
            }
        }

        Err(ShardNotFound { tried })
    }
}
