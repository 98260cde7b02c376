use anyhow::{Result, anyhow};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::key_rotation::KeyPool;
use crate::llm_providers::{DEFAULT_GEMINI_BASE_URL, mask_secret};
use crate::retry::RetryPolicy;

// Import logging macros
use crate::{log_system_event, log_validation};

pub const DEFAULT_PRIMARY_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-pro";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub generation: GenerationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Generation service configuration; `Debug` only shows masked keys
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub key_pool: KeyPool,
    pub base_url: String,
    pub primary_model: String,
    pub fallback_model: String,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub rotation_pause_ms: u64,
    pub request_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub max_upload_bytes: usize,
}

/// Logging system configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            generation: GenerationConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_secret(&self.database.url),
            key_pool_size = self.generation.key_pool.len(),
            primary_model = %self.generation.primary_model,
            fallback_model = %self.generation.fallback_model,
            max_attempts = self.generation.max_attempts,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.generation.max_attempts == 0 {
            return Err(anyhow!("GENERATION_MAX_ATTEMPTS must be at least 1"));
        }

        if self.generation.request_timeout_secs == 0 || self.generation.http_timeout_secs == 0 {
            return Err(anyhow!("Generation timeouts must be greater than 0"));
        }

        if self.generation.primary_model.trim().is_empty()
            || self.generation.fallback_model.trim().is_empty()
        {
            return Err(anyhow!("Primary and fallback model names must not be empty"));
        }

        if self.generation.key_pool.is_empty() {
            warn!("No GEMINI_API_KEYS configured - generation requests will fail with ModelUnavailable");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().starts_with(level))
        {
            warn!("Unrecognised log level '{}', falling back to defaults", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:study_assistant.db?mode=rwc".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl GenerationConfig {
    fn from_env() -> Result<Self> {
        let keys = env::var("GEMINI_API_KEYS")
            .or_else(|_| env::var("GEMINI_API_KEY"))
            .unwrap_or_default();

        Ok(GenerationConfig {
            key_pool: KeyPool::from_list(&keys),
            base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string()),
            primary_model: env::var("GEMINI_PRIMARY_MODEL")
                .unwrap_or_else(|_| DEFAULT_PRIMARY_MODEL.to_string()),
            fallback_model: env::var("GEMINI_FALLBACK_MODEL")
                .unwrap_or_else(|_| DEFAULT_FALLBACK_MODEL.to_string()),
            max_attempts: parse_env("GENERATION_MAX_ATTEMPTS", 5)?,
            backoff_base_ms: parse_env("GENERATION_BACKOFF_BASE_MS", 1_000)?,
            rotation_pause_ms: parse_env("GENERATION_ROTATION_PAUSE_MS", 1_000)?,
            request_timeout_secs: parse_env("GENERATION_TIMEOUT_SECS", 180)?,
            http_timeout_secs: parse_env("GENERATION_HTTP_TIMEOUT_SECS", 60)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            rotation_pause: Duration::from_millis(self.rotation_pause_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Bound on a single HTTP call to the model service
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port = parse_env("PORT", 3000u16)
            .map_err(|_| anyhow!("Invalid PORT value. Must be a number between 1-65535"))?;

        let host = env::var("HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        let max_upload_bytes = parse_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        Ok(ServerConfig { port, host, max_upload_bytes })
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info,study_assistant=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY")
            .unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

/// Read a numeric variable, using `default` when unset
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}
