//! Configuration data structures for relaygate.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. Every
//! field has a default so the gateway also starts without any file at all, which
//! mirrors the zero-configuration behaviour of a bare `cert.pem` / `key.pem` setup.
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

/// TLS termination settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve HTTPS/WSS. Disable only for local development.
    pub enabled: bool,
    /// PEM encoded certificate chain
    pub cert_path: String,
    /// PEM encoded private key (PKCS#8, PKCS#1 or SEC1)
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cert_path: "cert.pem".to_string(),
            key_path: "key.pem".to_string(),
        }
    }
}

/// Upstream reconnection policy for relay sessions.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Consecutive reconnect attempts before a session is torn down
    pub max_retries: u32,
    /// Fixed delay before each reconnect attempt (milliseconds)
    pub retry_delay_ms: u64,
    /// Upper bound for a single upstream WebSocket handshake (milliseconds, 0 = none)
    pub connect_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay_ms: 5_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl RelayConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

/// One-shot forwarding (`/proxy`) settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ForwardConfig {
    /// User-Agent presented to every upstream host
    pub user_agent: String,
    /// Whole-request timeout including body download
    pub timeout_secs: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            user_agent: "BotNodeSDK/0.0.1".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ForwardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Log output settings. `RUST_LOG` takes precedence over `level` when set.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Replace the port of `listen_addr`, keeping the host part.
    pub fn override_port(&mut self, port: u16) {
        let host = self
            .listen_addr
            .rsplit_once(':')
            .map_or("0.0.0.0", |(host, _)| host);
        self.listen_addr = format!("{host}:{port}");
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tls: TlsConfig::default(),
            relay: RelayConfig::default(),
            forward: ForwardConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn tls(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.config.tls = TlsConfig {
            enabled: true,
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        };
        self
    }

    pub fn without_tls(mut self) -> Self {
        self.config.tls.enabled = false;
        self
    }

    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.config.relay = relay;
        self
    }

    pub fn forward(mut self, forward: ForwardConfig) -> Self {
        self.config.forward = forward;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
