//! Configuration management for YaMDb services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Credential and confirmation-code configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Role-to-privilege mapping
    #[serde(default)]
    pub access: AccessConfig,

    /// Outbound mail configuration
    #[serde(default)]
    pub mail: MailConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables and indexes at startup
    #[serde(default)]
    pub bootstrap_schema: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Secret used to sign credentials and derive confirmation codes
    pub secret_key: Option<String>,

    /// Credential lifetime in seconds
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Treat the superuser flag as equivalent to the admin role
    #[serde(default = "default_superuser_is_admin")]
    pub superuser_is_admin: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    /// Mail backend: console, memory, http
    #[serde(default = "default_mail_backend")]
    pub backend: String,

    /// Sender address
    #[serde(default = "default_mail_from")]
    pub from_address: String,

    /// HTTP relay endpoint (http backend)
    pub api_url: Option<String>,

    /// HTTP relay API key (http backend)
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_mail_timeout")]
    pub timeout_secs: u64,

    /// Give up retrying a message after this many seconds
    #[serde(default = "default_mail_retry_window")]
    pub max_retry_secs: u64,

    /// Pending notification capacity
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second on the auth endpoints
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_token_lifetime() -> u64 { 86_400 }
fn default_superuser_is_admin() -> bool { true }
fn default_mail_backend() -> String { "console".to_string() }
fn default_mail_from() -> String { "noreply@yamdb.local".to_string() }
fn default_mail_timeout() -> u64 { 10 }
fn default_mail_retry_window() -> u64 { 60 }
fn default_outbox_capacity() -> usize { 1024 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "yamdb".to_string() }
fn default_rate_limit() -> u32 { 5 }
fn default_burst() -> u32 { 20 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            token_lifetime_secs: default_token_lifetime(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self { superuser_is_admin: default_superuser_is_admin() }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            backend: default_mail_backend(),
            from_address: default_mail_from(),
            api_url: None,
            api_key: None,
            timeout_secs: default_mail_timeout(),
            max_retry_secs: default_mail_retry_window(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AuthConfig {
    /// Configured secret, or a random per-process one when unset
    pub fn secret_or_ephemeral(&self) -> String {
        match &self.secret_key {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => {
                tracing::warn!(
                    "auth.secret_key is not set; using an ephemeral secret, \
                     issued credentials and confirmation codes will not survive a restart"
                );
                let random_bytes: [u8; 32] = rand::random();
                hex::encode(random_bytes)
            }
        }
    }

    /// Get credential lifetime as Duration
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/yamdb".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                bootstrap_schema: false,
            },
            auth: AuthConfig::default(),
            access: AccessConfig::default(),
            mail: MailConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.token_lifetime(), Duration::from_secs(86_400));
        assert!(config.access.superuser_is_admin);
        assert_eq!(config.mail.backend, "console");
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/yamdb");
    }

    #[test]
    fn test_sections_default_when_absent() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(
                "[database]\nurl = \"postgres://db/yamdb\"\n\n[access]\nsuperuser_is_admin = false\n",
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.database.url, "postgres://db/yamdb");
        assert!(!config.database.bootstrap_schema);
        assert!(!config.access.superuser_is_admin);
        assert_eq!(config.rate_limit.burst, 20);
        assert_eq!(config.auth.token_lifetime_secs, 86_400);
    }

    #[test]
    fn test_ephemeral_secret_when_unset() {
        let auth = AuthConfig { secret_key: None, token_lifetime_secs: 60 };
        let a = auth.secret_or_ephemeral();
        let b = auth.secret_or_ephemeral();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);

        let auth = AuthConfig { secret_key: Some("s3cret".into()), token_lifetime_secs: 60 };
        assert_eq!(auth.secret_or_ephemeral(), "s3cret");
    }
}
