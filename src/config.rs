use envconfig::Envconfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; empty keeps the counters in-process
    #[envconfig(from = "REDIS_URL", default = "")]
    pub redis_url: String,

    /// Base URL of the demo URL resolution service
    #[envconfig(from = "DEMO_URL_SERVICE_BASE")]
    pub demo_url_service_base: Option<String>,

    /// API key sent as `X-API-Key` to the demo URL service
    #[envconfig(from = "DEMO_URL_SERVICE_API_KEY")]
    pub demo_url_service_api_key: Option<String>,

    /// Maximum number of parser jobs running at once across all instances
    #[envconfig(from = "MAX_CONCURRENT_PARSER_JOBS", default = "3")]
    pub max_concurrent_parser_jobs: u64,

    /// Directory downloaded demos are written to
    #[envconfig(from = "DEMO_TEMP_DIR", default = "/tmp/demos")]
    pub temp_dir: PathBuf,

    /// Hard ceiling on a downloaded demo, in bytes
    #[envconfig(from = "MAX_DEMO_FILE_SIZE", default = "1073741824")]
    pub max_file_size: u64,

    #[envconfig(from = "DOWNLOAD_TIMEOUT_SECS", default = "300")]
    pub download_timeout_secs: u64,

    #[envconfig(from = "RESOLVE_TIMEOUT_SECS", default = "60")]
    pub resolve_timeout_secs: u64,

    /// Deadline for one `POST /demos`, covering the budget wait and the download
    #[envconfig(from = "REQUEST_TIMEOUT_SECS", default = "360")]
    pub request_timeout_secs: u64,

    /// Artifacts older than this are removed by the retention sweep
    #[envconfig(from = "RETENTION_MAX_AGE_SECS", default = "3600")]
    pub retention_max_age_secs: u64,

    #[envconfig(from = "SWEEP_INTERVAL_SECS", default = "600")]
    pub sweep_interval_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retention_max_age(&self) -> Duration {
        Duration::from_secs(self.retention_max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn uses_redis(&self) -> bool {
        !self.redis_url.trim().is_empty()
    }
}
