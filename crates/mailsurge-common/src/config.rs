//! Configuration for Mailsurge

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Outbound transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Dispatch engine configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Tracking / public URL configuration
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Outbound SMTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// SMTP relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// SMTP relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Use STARTTLS on the relay connection
    #[serde(default = "default_true")]
    pub use_starttls: bool,

    /// Send timeout in seconds
    #[serde(default = "default_send_timeout")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            use_starttls: true,
            timeout_secs: default_send_timeout(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

fn default_send_timeout() -> u64 {
    30
}

/// Dispatch engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Recipients per dispatch unit
    #[serde(default = "default_batch_size")]
    pub batch_size: i32,

    /// Provider-imposed send cap, messages per second
    #[serde(default = "default_send_rate")]
    pub send_rate_per_sec: u32,

    /// Maximum concurrent dispatch units
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per dispatch unit before the campaign is failed
    #[serde(default = "default_max_unit_attempts")]
    pub max_unit_attempts: u32,

    /// Scheduler sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_rate_per_sec: default_send_rate(),
            concurrency: default_concurrency(),
            max_unit_attempts: default_max_unit_attempts(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_batch_size() -> i32 {
    50
}

fn default_send_rate() -> u32 {
    14
}

fn default_concurrency() -> usize {
    4
}

fn default_max_unit_attempts() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    30
}

/// Tracking / public URL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Public base URL for pixel, click and unsubscribe links
    #[serde(default = "default_tracking_base_url")]
    pub base_url: String,

    /// Name shown in the unsubscribe footer
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracking_base_url(),
            sender_name: default_sender_name(),
        }
    }
}

fn default_tracking_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_sender_name() -> String {
    "Mailsurge".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration, preferring MAILSURGE_CONFIG over the
    /// default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("MAILSURGE_CONFIG") {
            return Self::from_file(std::path::Path::new(&path));
        }

        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/mailsurge/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.bind_address, "0.0.0.0");
        assert_eq!(server.port, 8080);

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.batch_size, 50);
        assert_eq!(dispatch.send_rate_per_sec, 14);
        assert_eq!(dispatch.max_unit_attempts, 3);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9090

[database]
url = "postgres://localhost/mailsurge"

[dispatch]
batch_size = 100

[tracking]
base_url = "https://track.example.com"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.url, "postgres://localhost/mailsurge");
        assert_eq!(config.dispatch.batch_size, 100);
        assert_eq!(config.dispatch.send_rate_per_sec, 14);
        assert_eq!(config.tracking.base_url, "https://track.example.com");
    }
}
