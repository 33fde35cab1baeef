use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use demofetch::config::Config;
use demofetch::config_validator::ConfigValidator;
use demofetch::rate_limiter::RateLimiter;
use demofetch::resolver::UrlResolver;
use demofetch::server::Server;
use demofetch::shard::{ShardResolver, DEFAULT_SHARDS};
use demofetch::sharecode;
use demofetch::sweeper::sweep_older_than;
use demofetch::DemoFetcher;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "demofetch", version, about = "Resolve, download and sweep match demos")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service and the retention sweeper
    Serve,
    /// Print the fields carried by a sharecode
    Decode { sharecode: String },
    /// Probe the replay CDN shards for a sharecode's demo
    Probe { sharecode: String },
    /// Resolve and download one demo
    Fetch { sharecode: String },
    /// Delete artifacts older than the retention age once
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("demofetch={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    ConfigValidator::validate(&config).context("Invalid configuration")?;

    match Cli::parse().command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(
                bind_addr = %config.bind_addr,
                redis = config.uses_redis(),
                temp_dir = %config.temp_dir.display(),
                "Starting demo fetch service"
            );
            Server::new(config)
                .await
                .context("Failed to create server")?
                .run()
                .await
                .context("Server error")?;
        }
        Command::Decode { sharecode } => {
            let decoded = sharecode::decode(&sharecode)?;
            println!("{}", serde_json::to_string_pretty(&decoded)?);
            println!("{}", sharecode::build_url(&decoded, 1));
        }
        Command::Probe { sharecode } => {
            let decoded = sharecode::decode(&sharecode)?;
            let shards = ShardResolver::new()?;
            let shard = shards.find_shard(&decoded, DEFAULT_SHARDS).await?;
            println!("{}", shards.url_for(&decoded, shard));
        }
        Command::Fetch { sharecode } => {
            let limiter = RateLimiter::from_config(&config).await?;
            let resolver = UrlResolver::from_config(&config, limiter)?;
            let fetcher = DemoFetcher::from_config(&config, Arc::new(resolver))?;
            let artifact = fetcher.try_fetch(&sharecode, None).await?;
            println!("{} ({} bytes)", artifact.path.display(), artifact.size_bytes);
        }
        Command::Sweep => {
            let report = sweep_older_than(&config.temp_dir, config.retention_max_age()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
