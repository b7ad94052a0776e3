use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the movie rater API
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP listener configuration
    #[serde(default)]
    pub http: HttpConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// S3 configuration for poster uploads
    pub s3: S3Config,
    /// Upload authorization policy
    #[serde(default)]
    pub uploads: UploadConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// API listen address
    #[serde(default = "default_http_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = allow any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// S3 configuration for presigned poster uploads
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for poster images
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Network timeout for credential issuance in seconds
    #[serde(default = "default_presign_timeout_secs")]
    pub presign_timeout_secs: u64,
}

/// Upload authorization policy
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Feature flag: disable to reject all upload authorization requests
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Key prefix for uploaded objects
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Maximum upload size in megabytes
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
    /// Maximum upload authorizations per user per window
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// Rate limit window in seconds
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "movie-rater-api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_bucket() -> String {
    "movie-rater".to_string()
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

fn default_presign_timeout_secs() -> u64 {
    10
}

fn default_key_prefix() -> String {
    "media/movies".to_string()
}

fn default_max_size_mb() -> u64 {
    5
}

fn default_presign_expiry_secs() -> u64 {
    3600
}

fn default_rate_limit() -> u32 {
    10
}

fn default_rate_window_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "movie-rater-api")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/api").required(false))
            .add_source(config::File::with_name("/etc/movierater/api").required(false))
            // Override with environment variables
            // MOVIERATER__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("MOVIERATER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get database connection timeout as Duration
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.database.idle_timeout_secs)
    }
}

impl S3Config {
    /// Get credential issuance timeout as Duration
    pub fn presign_timeout(&self) -> Duration {
        Duration::from_secs(self.presign_timeout_secs)
    }
}

impl UploadConfig {
    /// Get presigned URL expiry as Duration
    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }

    /// Get rate limit window as Duration
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    /// Get maximum upload size in bytes
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: default_key_prefix(),
            max_size_mb: default_max_size_mb(),
            presign_expiry_secs: default_presign_expiry_secs(),
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window_secs(),
        }
    }
}
