//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `APP_ENV`: `production` (or `prod`) tightens CSP, enables COEP and
//!   `upgrade-insecure-requests`, and hides error detail from clients
//! - `CORS_ORIGIN`: Comma-separated origin whitelist (default: `http://localhost:3000`)
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` headers are honored
//! - `BODY_LIMIT`: Maximum request body size, e.g. `10kb`, `1mb`, `4096` (default: `10kb`)
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_MS`: Window length (default: 900000, 15 minutes)
//! - `RATE_LIMIT_MAX`: Requests per client per window (default: 100, 0 disables)
//!
//! # Shutdown
//!
//! - `SHUTDOWN_TIMEOUT_MS`: Deadline for the whole drain sequence (default: 30000)
//! - `CONNECTION_DRAIN_MS`: Per-connection grace before a forced close (default: 5000)

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;

use crate::error::{AppError, AppResult};
use crate::validation::IdFormat;

/// Deployment mode controlling header strictness and error verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" | "test" | "" => Ok(Environment::Development),
            other => Err(format!(
                "unknown environment '{other}' (expected production or development)"
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Deployment mode (default: development)
    pub environment: Environment,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Length of one rate-limit window (default: 15 minutes)
    pub rate_limit_window: Duration,

    /// Requests allowed per client per window (default: 100)
    /// Set to 0 to disable rate limiting
    pub rate_limit_max: u32,

    /// Paths exempt from rate limiting (exact match). Default: ["/health"]
    pub rate_limit_skip_paths: Vec<String>,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    /// Forwarded-for headers are only trusted if the connection
    /// originates from one of these networks.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (headers ignored, the socket peer address is the client)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Origin whitelist. Wildcards are rejected at validation time.
    pub cors_origins: Vec<String>,

    /// Emit `Access-Control-Allow-Credentials: true` (default: true)
    pub cors_credentials: bool,

    /// Preflight cache lifetime (default: 86400 seconds)
    pub cors_max_age: Duration,

    // =========================================================================
    // Request Limits Configuration
    // =========================================================================
    /// Maximum request body size in bytes (default: 10KB)
    pub body_limit: usize,

    /// Fields allowed to repeat in query strings and form bodies
    pub parameter_whitelist: Vec<String>,

    /// Identifier format for user resources (default: uuid)
    pub user_id_format: IdFormat,

    // =========================================================================
    // Security Headers Configuration
    // =========================================================================
    /// HSTS max-age in seconds (default: one year)
    pub hsts_max_age: u64,

    // =========================================================================
    // Shutdown Configuration
    // =========================================================================
    /// Deadline for the complete drain sequence (default: 30 seconds)
    pub shutdown_timeout: Duration,

    /// Grace given to each open connection before it is dropped (default: 5 seconds)
    pub connection_drain: Duration,

    // =========================================================================
    // TLS Configuration
    // =========================================================================
    /// PEM certificate chain, used in production only
    pub tls_cert_path: Option<PathBuf>,

    /// PEM private key, used in production only
    pub tls_key_path: Option<PathBuf>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,
}

/// Default body limit: 10 KB.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024;

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any configuration value is invalid
    /// (e.g., non-numeric PORT value, wildcard CORS origin).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment: Self::parse_env("APP_ENV", Environment::Development)?,

            // Rate limiting
            rate_limit_window: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_WINDOW_MS",
                15 * 60 * 1000,
            )?),
            rate_limit_max: Self::parse_env("RATE_LIMIT_MAX", 100)?,
            rate_limit_skip_paths: Self::parse_paths("RATE_LIMIT_SKIP_PATHS", "/health"),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // CORS
            cors_origins: Self::parse_list("CORS_ORIGIN", "http://localhost:3000"),
            cors_credentials: Self::parse_env("CORS_CREDENTIALS", true)?,
            cors_max_age: Duration::from_secs(Self::parse_env("CORS_MAX_AGE", 86_400)?),

            // Request limits
            body_limit: match env::var("BODY_LIMIT") {
                Ok(raw) => parse_byte_size(&raw)
                    .map_err(|e| AppError::Config(format!("Invalid BODY_LIMIT: {e}")))?,
                Err(_) => DEFAULT_BODY_LIMIT,
            },
            parameter_whitelist: Self::parse_list("PARAMETER_WHITELIST", ""),
            user_id_format: Self::parse_env("USER_ID_FORMAT", IdFormat::UuidV4)?,

            // Security headers
            hsts_max_age: Self::parse_env("HSTS_MAX_AGE", 31_536_000)?,

            // Shutdown
            shutdown_timeout: Duration::from_millis(Self::parse_env(
                "SHUTDOWN_TIMEOUT_MS",
                30_000,
            )?),
            connection_drain: Duration::from_millis(Self::parse_env(
                "CONNECTION_DRAIN_MS",
                5_000,
            )?),

            // TLS
            tls_cert_path: env::var("TLS_CERT_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            tls_key_path: env::var("TLS_KEY_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit_window.is_zero() {
            return Err(AppError::Config(
                "RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        if self.body_limit == 0 {
            return Err(AppError::Config(
                "BODY_LIMIT must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(AppError::Config(
                "SHUTDOWN_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.connection_drain > self.shutdown_timeout {
            return Err(AppError::Config(format!(
                "CONNECTION_DRAIN_MS ({:?}) must be <= SHUTDOWN_TIMEOUT_MS ({:?})",
                self.connection_drain, self.shutdown_timeout
            )));
        }

        for origin in &self.cors_origins {
            if origin == "*" {
                return Err(AppError::Config(
                    "CORS_ORIGIN must list explicit origins, '*' is not allowed".to_string(),
                ));
            }
            if HeaderValue::from_str(origin).is_err() {
                return Err(AppError::Config(format!(
                    "CORS_ORIGIN contains an invalid origin: {origin}"
                )));
            }
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max > 0
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }

    /// TLS paths, when both are configured and the server runs in production.
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        if !self.is_production() {
            return None;
        }
        self.tls_cert_path.as_ref().zip(self.tls_key_path.as_ref())
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Parse a comma-separated list of absolute paths.
    fn parse_paths(name: &str, default: &str) -> Vec<String> {
        Self::parse_list(name, default)
            .into_iter()
            .filter(|s| s.starts_with('/'))
            .collect()
    }
}

/// Parse a byte size such as `4096`, `10kb`, `1.5mb` or `2MB`.
pub fn parse_byte_size(raw: &str) -> Result<usize, String> {
    let value = raw.trim().to_ascii_lowercase();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let multiplier: f64 = match unit.trim() {
        "" | "b" => 1.0,
        "kb" | "k" => 1024.0,
        "mb" | "m" => 1024.0 * 1024.0,
        "gb" | "g" => 1024.0 * 1024.0 * 1024.0,
        other => return Err(format!("unknown size unit '{other}'")),
    };

    let number: f64 = number
        .parse()
        .map_err(|_| format!("'{raw}' is not a byte size"))?;

    let bytes = (number * multiplier).floor();
    if !bytes.is_finite() || bytes < 0.0 || bytes > usize::MAX as f64 {
        return Err(format!("'{raw}' is out of range"));
    }
    Ok(bytes as usize)
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Development,
            // Rate limiting
            rate_limit_window: Duration::from_secs(15 * 60),
            rate_limit_max: 100,
            rate_limit_skip_paths: vec!["/health".to_string()],
            trusted_proxies: vec![],
            // CORS
            cors_origins: vec!["http://localhost:3000".to_string()],
            cors_credentials: true,
            cors_max_age: Duration::from_secs(86_400),
            // Request limits
            body_limit: DEFAULT_BODY_LIMIT,
            parameter_whitelist: vec![],
            user_id_format: IdFormat::UuidV4,
            // Security headers
            hsts_max_age: 31_536_000,
            // Shutdown
            shutdown_timeout: Duration::from_secs(30),
            connection_drain: Duration::from_secs(5),
            // TLS
            tls_cert_path: None,
            tls_key_path: None,
            // Observability
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.rate_limit_max, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(900));
        assert_eq!(config.body_limit, 10 * 1024);
        assert_eq!(config.cors_origins, vec!["http://localhost:3000"]);
        assert!(!config.is_production());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "192.168.1.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "192.168.1.1:8080");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        let config = Config::default();
        assert!(config.rate_limiting_enabled());

        let config = Config {
            rate_limit_max: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(
            "development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert!("staging-ish".parse::<Environment>().is_err());
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("4096").unwrap(), 4096);
        assert_eq!(parse_byte_size("10kb").unwrap(), 10 * 1024);
        assert_eq!(parse_byte_size("10KB").unwrap(), 10 * 1024);
        assert_eq!(parse_byte_size("1mb").unwrap(), 1024 * 1024);
        assert_eq!(parse_byte_size("1.5kb").unwrap(), 1536);
        assert_eq!(parse_byte_size(" 2 mb ").unwrap(), 2 * 1024 * 1024);
        assert!(parse_byte_size("ten").is_err());
        assert!(parse_byte_size("10tb").is_err());
        assert!(parse_byte_size("").is_err());
    }

    #[test]
    fn test_validate_rejects_wildcard_origin() {
        let config = Config {
            cors_origins: vec!["*".to_string()],
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("CORS_ORIGIN"));
    }

    #[test]
    fn test_validate_rejects_invalid_origin() {
        let config = Config {
            cors_origins: vec!["http://bad\nhost".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_drain_ordering() {
        let config = Config {
            connection_drain: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("CONNECTION_DRAIN_MS")
        );
    }

    #[test]
    fn test_validate_zero_values() {
        let config = Config {
            body_limit: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("BODY_LIMIT"));

        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_WINDOW_MS")
        );

        let config = Config {
            shutdown_timeout: Duration::ZERO,
            connection_drain: Duration::ZERO,
            ..Config::default()
        };
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("SHUTDOWN_TIMEOUT_MS")
        );
    }

    #[test]
    fn test_tls_paths_only_in_production() {
        let config = Config {
            tls_cert_path: Some(PathBuf::from("cert.pem")),
            tls_key_path: Some(PathBuf::from("key.pem")),
            ..Config::default()
        };
        assert!(config.tls_paths().is_none());

        let config = Config {
            environment: Environment::Production,
            ..config
        };
        assert!(config.tls_paths().is_some());

        let config = Config {
            tls_key_path: None,
            ..config
        };
        assert!(config.tls_paths().is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }
}
