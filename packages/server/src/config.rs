//! Application configuration.
//!
//! Every setting is available both as a CLI flag and an environment
//! variable, with sensible development defaults. Validation happens once at
//! startup; a misconfigured process refuses to start instead of limping.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::network::{NetworkConfig, TlsConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line (production default).
    Json,
    /// Human-readable output for development.
    Pretty,
}

/// Server configuration, parsed from CLI flags with environment fallbacks.
#[derive(Debug, Clone, Parser)]
#[command(name = "taskops-server", about = "Task API with request observability")]
pub struct AppConfig {
    /// Bind address.
    #[arg(long, env = "TASKOPS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on. 0 means OS-assigned.
    #[arg(long, env = "TASKOPS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Deployment environment (development, staging, production).
    #[arg(long, env = "TASKOPS_ENVIRONMENT", default_value = "production")]
    pub environment: String,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, env = "TASKOPS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "TASKOPS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// HMAC secret for signing access tokens.
    #[arg(long, env = "TASKOPS_JWT_SECRET", default_value = "dev-secret-change-me", hide_env_values = true)]
    pub jwt_secret: String,

    /// Access token lifetime in minutes.
    #[arg(long, env = "TASKOPS_TOKEN_TTL_MINUTES", default_value_t = 30)]
    pub token_ttl_minutes: u64,

    /// Per-dependency health probe timeout in milliseconds.
    #[arg(long, env = "TASKOPS_PROBE_TIMEOUT_MS", default_value_t = 500)]
    pub probe_timeout_ms: u64,

    /// Maximum time a request may take before the transport times it out.
    #[arg(long, env = "TASKOPS_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Allowed CORS origins; "*" allows any.
    #[arg(long, env = "TASKOPS_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    /// Path to a TLS certificate file. TLS is enabled when both this and
    /// `--tls-key-path` are set.
    #[arg(long, env = "TASKOPS_TLS_CERT_PATH")]
    pub tls_cert_path: Option<std::path::PathBuf>,

    /// Path to the TLS private key file.
    #[arg(long, env = "TASKOPS_TLS_KEY_PATH")]
    pub tls_key_path: Option<std::path::PathBuf>,
}

impl AppConfig {
    /// True when running in a development environment.
    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self.environment.as_str(), "dev" | "development")
    }

    /// True when running in production.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Access token lifetime.
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_minutes * 60)
    }

    /// Per-dependency health probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Startup validation. Fatal on failure: the process must not serve
    /// with a known-bad configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an unusable token secret or TTL, or a TLS
    /// configuration missing one of its two paths.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            anyhow::bail!("jwt secret must not be empty");
        }
        if self.is_production() && self.jwt_secret == "dev-secret-change-me" {
            anyhow::bail!("refusing to start in production with the default jwt secret");
        }
        if self.token_ttl_minutes == 0 {
            anyhow::bail!("token ttl must be at least one minute");
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            anyhow::bail!("tls requires both --tls-cert-path and --tls-key-path");
        }
        Ok(())
    }

    /// Maps the flat settings into the network module's configuration.
    #[must_use]
    pub fn network(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.clone(),
                key_path: key.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        AppConfig::try_parse_from(std::iter::once("server").chain(args.iter().copied()))
            .expect("config parses")
    }

    #[test]
    fn defaults_are_valid_outside_production() {
        let config = parse(&["--environment", "development"]);
        config.validate().unwrap();
        assert!(config.is_development());
        assert_eq!(config.port, 8080);
        assert_eq!(config.token_ttl(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn production_rejects_default_secret() {
        let config = parse(&[]);
        assert!(config.is_production());
        assert!(config.validate().is_err());
    }

    #[test]
    fn production_accepts_custom_secret() {
        let config = parse(&["--jwt-secret", "a-real-secret"]);
        config.validate().unwrap();
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let config = parse(&["--environment", "dev", "--token-ttl-minutes", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn tls_requires_both_paths() {
        let config = parse(&["--environment", "dev", "--tls-cert-path", "/tmp/cert.pem"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn network_mapping_carries_tls_and_timeout() {
        let config = parse(&[
            "--environment",
            "dev",
            "--tls-cert-path",
            "/tmp/cert.pem",
            "--tls-key-path",
            "/tmp/key.pem",
            "--request-timeout-secs",
            "5",
            "--cors-origins",
            "http://localhost:3000,https://example.com",
        ]);
        let network = config.network();
        assert!(network.tls.is_some());
        assert_eq!(network.request_timeout, Duration::from_secs(5));
        assert_eq!(network.cors_origins.len(), 2);
    }
}
