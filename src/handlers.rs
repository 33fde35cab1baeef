use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::error::DemoError;
use crate::fetcher::DemoFetcher;
use crate::rate_limit_config::{RateLimitPolicies, RateLimitPolicy};
use crate::rate_limiter::RateLimiter;
use crate::response::{AcquireResponse, DecodeResponse, DemoResponse, HealthResponse, SlotResponse};
use crate::sharecode::ShareCode;

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub limiter: RateLimiter,
    pub policies: RateLimitPolicies,
    pub fetcher: DemoFetcher,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FetchRequest {
    /// `CSGO-` plus five dash-separated groups of five
    #[validate(length(equal = 34))]
    pub sharecode: String,
}

/// Decode a sharecode and show its canonical shard-1 URL
pub async fn decode_sharecode(Path(code): Path<String>) -> Result<impl IntoResponse, DemoError> {
    let sharecode = ShareCode::parse(&code)?;
    Ok(Json(DecodeResponse::new(sharecode)))
}

/// Resolve and download a demo
///
/// Refuses with 429 while the demo URL budget is spent instead of queueing
/// the request, and gives up with 503 once `request_timeout` elapses.
pub async fn fetch_demo(
    State(state): State<SharedState>,
    Json(payload): Json<FetchRequest>,
) -> Result<Response, DemoError> {
    payload
        .validate()
        .map_err(|e| DemoError::Validation(e.to_string()))?;
    let sharecode = ShareCode::parse(&payload.sharecode)?;

    let policy = &state.policies.demo_url;
    if !state.limiter.check_limit(policy).await? {
        return Ok(rate_limited(policy));
    }

    let deadline = CancellationToken::new();
    let timer = {
        let deadline = deadline.clone();
        let budget = state.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            deadline.cancel();
        })
    };
    let fetched = state
        .fetcher
        .try_fetch(sharecode.as_str(), Some(&deadline))
        .await;
    timer.abort();

    let artifact = fetched?;
    Ok(Json(DemoResponse::from_artifact(payload.sharecode, artifact)).into_response())
}

/// Status of every configured policy
pub async fn get_limits(State(state): State<SharedState>) -> Result<impl IntoResponse, DemoError> {
    let mut statuses = Vec::new();
    for policy in state.policies.all() {
        statuses.push(state.limiter.status(policy).await?);
    }
    Ok(Json(statuses))
}

/// Consume one unit of a windowed policy on behalf of an external caller
pub async fn acquire_limit(
    State(state): State<SharedState>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, DemoError> {
    let policy = state
        .policies
        .by_service(&service)
        .filter(|policy| policy.is_windowed())
        .ok_or_else(|| DemoError::UnknownService(service.clone()))?;

    if state.limiter.try_acquire(policy).await? {
        let status = state.limiter.status(policy).await?;
        let mut resp = Json(AcquireResponse::allowed(&service, status.remaining)).into_response();
        resp.headers_mut()
            .insert("X-RateLimit-Limit", HeaderValue::from(policy.max));
        resp.headers_mut()
            .insert("X-RateLimit-Remaining", HeaderValue::from(status.remaining));
        return Ok(resp);
    }

    Ok(rate_limited(policy))
}

fn rate_limited(policy: &RateLimitPolicy) -> Response {
    let retry_after = policy.window.map(|window| window.as_secs()).unwrap_or(1);
    let mut resp = Json(AcquireResponse::denied(&policy.service, retry_after)).into_response();
    *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    resp.headers_mut()
        .insert("X-RateLimit-Limit", HeaderValue::from(policy.max));
    resp.headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    resp
}

/// Take a parser slot if one is free
pub async fn acquire_parser_slot(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, DemoError> {
    let policy = &state.policies.parser;
    if !state.limiter.has_free_slot(policy).await? {
        return Err(DemoError::RateLimitExceeded(policy.service.clone()));
    }

    let in_flight = state.limiter.increment_slot(&policy.service).await?;
    Ok(Json(SlotResponse {
        service: policy.service.clone(),
        in_flight,
        max: policy.max,
    }))
}

pub async fn release_parser_slot(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, DemoError> {
    let policy = &state.policies.parser;
    let in_flight = state.limiter.decrement_slot(&policy.service).await?;
    Ok(Json(SlotResponse {
        service: policy.service.clone(),
        in_flight,
        max: policy.max,
    }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    if state.limiter.is_store_available().await {
        (StatusCode::OK, Json(HealthResponse::healthy(true)))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse::degraded(false)))
    }
}
