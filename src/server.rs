use crate::config::Config;
use crate::config_validator::ConfigValidator;
use crate::error::{DemoError, Result};
use crate::fetcher::DemoFetcher;
use crate::handlers::{
    acquire_limit, acquire_parser_slot, decode_sharecode, fetch_demo, get_limits, health_check,
    release_parser_slot, AppState, SharedState,
};
use crate::middleware::logging_middleware;
use crate::rate_limit_config::RateLimitPolicies;
use crate::rate_limiter::RateLimiter;
use crate::resolver::UrlResolver;
use crate::sweeper::{spawn_retention_sweeper, RetentionConfig};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router over an already-wired state
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/sharecodes/:code", get(decode_sharecode))
        .route("/demos", post(fetch_demo))
        .route("/limits", get(get_limits))
        .route("/limits/:service/acquire", post(acquire_limit))
        .route("/slots/parser/acquire", post(acquire_parser_slot))
        .route("/slots/parser/release", post(release_parser_slot))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

/// Wire limiter, resolver and fetcher from configuration
pub async fn build_state(config: &Config) -> Result<SharedState> {
    let limiter = RateLimiter::from_config(config).await?;
    let resolver = UrlResolver::from_config(config, limiter.clone())?;
    let fetcher = DemoFetcher::from_config(config, Arc::new(resolver))?;

    Ok(Arc::new(AppState {
        limiter,
        policies: RateLimitPolicies::from_config(config),
        fetcher,
        request_timeout: config.request_timeout(),
    }))
}

pub struct Server {
    app: Router,
    addr: SocketAddr,
    retention: RetentionConfig,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        ConfigValidator::validate(&config)?;
        let state = build_state(&config).await?;

        Ok(Self {
            app: create_app(state),
            addr: config.bind_addr,
            retention: RetentionConfig::from_config(&config),
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let sweeper = spawn_retention_sweeper(self.retention);

        tracing::info!("Demo fetch service listening on {}", self.addr);
        tracing::info!("Health check available at /health");

        let served = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        sweeper.cancel();
        served.map_err(|e| DemoError::Internal(format!("Server error: {}", e)))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
