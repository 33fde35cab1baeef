use serde::Serialize;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::fetcher::DemoArtifact;
use crate::sharecode::{build_url, DecodedShareCode, ShareCode};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub store_connected: bool,
}

impl HealthResponse {
    pub fn healthy(store_connected: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: unix_now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_connected,
        }
    }

    pub fn degraded(store_connected: bool) -> Self {
        Self {
            status: "degraded".to_string(),
            timestamp: unix_now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_connected,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DecodeResponse {
    pub sharecode: ShareCode,
    #[serde(flatten)]
    pub decoded: DecodedShareCode,
    pub url: String,
}

impl DecodeResponse {
    pub fn new(sharecode: ShareCode) -> Self {
        let decoded = sharecode.decode();
        Self {
            url: build_url(&decoded, 1),
            sharecode,
            decoded,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DemoResponse {
    pub sharecode: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: u64,
}

impl DemoResponse {
    pub fn from_artifact(sharecode: String, artifact: DemoArtifact) -> Self {
        Self {
            sharecode,
            created_at: artifact
                .created_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            path: artifact.path,
            size_bytes: artifact.size_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AcquireResponse {
    pub service: String,
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after: Option<u64>,
}

impl AcquireResponse {
    pub fn allowed(service: &str, remaining: u64) -> Self {
        Self {
            service: service.to_string(),
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    pub fn denied(service: &str, retry_after: u64) -> Self {
        Self {
            service: service.to_string(),
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub service: String,
    pub in_flight: u64,
    pub max: u64,
}
