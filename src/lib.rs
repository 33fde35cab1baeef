pub mod config;
pub mod config_validator;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod redis_store;
pub mod resolver;
pub mod response;
pub mod server;
pub mod shard;
pub mod sharecode;
pub mod store;
pub mod sweeper;

pub use config::Config;
pub use error::{DemoError, FetchError, ResolveError, Result, ShareCodeError};
pub use fetcher::{cleanup_artifact, DemoArtifact, DemoFetcher};
pub use rate_limit_config::{RateLimitPolicies, RateLimitPolicy};
pub use rate_limiter::RateLimiter;
pub use resolver::{DemoUrlSource, UrlResolver};
pub use server::create_app;
pub use shard::ShardResolver;
pub use sharecode::{DecodedShareCode, ShareCode};
pub use sweeper::{sweep_older_than, SweepReport};
