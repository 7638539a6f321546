//! Server configuration.
//!
//! Values are layered: compiled defaults, then an optional TOML file, then
//! `CLIPSHARE_*` environment variables. The binary applies CLI flags last.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides, e.g. `CLIPSHARE_PORT=8080`.
pub const ENV_PREFIX: &str = "CLIPSHARE_";

/// Configuration for the clipshare server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `3001`, `0` for auto-assign).
    pub port: u16,
    /// Idle window after which an untouched session is deleted.
    pub idle_timeout_secs: u64,
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: u64,
    /// Outbound frames buffered per connection before it counts as slow.
    pub send_queue_capacity: usize,
    /// Heartbeat ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this long without a pong.
    pub client_timeout_secs: u64,
    /// Emit JSON logs.
    pub json_logs: bool,
    /// Default log level (`error`..`trace`).
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            idle_timeout_secs: 600,
            max_upload_bytes: 100 * 1024 * 1024, // 100 MB
            send_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            json_logs: false,
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Load(_) => "config_load",
            Self::Invalid { .. } => "config_invalid",
        }
    }
}

impl ServerConfig {
    /// Base figment: defaults, then `path` if given, then the environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load and validate configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.idle_timeout_secs == 0 {
            return invalid("idle_timeout_secs", "must be positive");
        }
        if self.max_upload_bytes == 0 {
            return invalid("max_upload_bytes", "must be positive");
        }
        if self.send_queue_capacity == 0 {
            return invalid("send_queue_capacity", "must be positive");
        }
        if self.heartbeat_interval_secs == 0 {
            return invalid("heartbeat_interval_secs", "must be positive");
        }
        if self.client_timeout_secs < self.heartbeat_interval_secs {
            return invalid("client_timeout_secs", "must be at least the heartbeat interval");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parsed bind address, when `host` is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.bind_addr().parse().ok()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(600));
        assert_eq!(cfg.max_upload_bytes, 104_857_600);
        assert_eq!(cfg.send_queue_capacity, 256);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.client_timeout(), Duration::from_secs(90));
        assert!(!cfg.json_logs);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bind_addr_formats_host_and_port() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn rejects_zero_idle_timeout() {
        let cfg = ServerConfig {
            idle_timeout_secs: 0,
            ..ServerConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.error_kind(), "config_invalid");
        assert!(err.to_string().contains("idle_timeout_secs"));
    }

    #[test]
    fn rejects_timeout_shorter_than_heartbeat() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 30,
            client_timeout_secs: 10,
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn layers_toml_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "clipshare.toml",
                r#"
                    port = 4000
                    idle_timeout_secs = 120
                "#,
            )?;
            jail.set_env("CLIPSHARE_PORT", "5000");

            let cfg = ServerConfig::load(Some(Path::new("clipshare.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(cfg.port, 5000);
            assert_eq!(cfg.idle_timeout_secs, 120);
            assert_eq!(cfg.host, "0.0.0.0");
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let cfg = ServerConfig::load(Some(Path::new("absent.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(cfg, ServerConfig::default());
            Ok(())
        });
    }

    #[test]
    fn invalid_env_value_is_a_load_error() {
        Jail::expect_with(|jail| {
            jail.set_env("CLIPSHARE_PORT", "not-a-port");
            let err = ServerConfig::load(None).unwrap_err();
            assert_eq!(err.error_kind(), "config_load");
            Ok(())
        });
    }
}
