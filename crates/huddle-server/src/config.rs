//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`$HUDDLE_CONFIG`, `huddle.toml`, ...)
//! - Environment variables (`HUDDLE_*`, `__` between sections, e.g.
//!   `HUDDLE_AUTH__JWT_SECRET`)

use anyhow::{Context, Result};
use huddle_core::{HubConfig, PumpConfig, RoomDirectory};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Secret used when none is configured. Fine for local development only.
pub const DEV_JWT_SECRET: &str = "huddle-dev-secret";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Room access rules.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Frames buffered per client before broadcasts evict it.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Events buffered in front of the hub.
    #[serde(default = "default_hub_inbox_capacity")]
    pub hub_inbox_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keepalive ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Read idle timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Per-write deadline in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Token verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Expected `iss` claim.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Lifetime of tokens minted by this server, in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

/// Room access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Whether rooms not listed below can be joined by anyone.
    #[serde(default = "default_true")]
    pub open_rooms: bool,

    /// Rooms known at startup.
    #[serde(default)]
    pub rooms: Vec<RoomSeed>,
}

/// A room known at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSeed {
    pub id: u64,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub members: Vec<u64>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_hub_inbox_capacity() -> usize {
    1024
}

fn default_heartbeat_interval() -> u64 {
    54_000 // 54 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_jwt_secret() -> String {
    DEV_JWT_SECRET.to_string()
}

fn default_issuer() -> String {
    "huddle".to_string()
}

fn default_token_ttl() -> u64 {
    24 * 60 * 60
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            auth: AuthConfig::default(),
            directory: DirectoryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            hub_inbox_capacity: default_hub_inbox_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            issuer: default_issuer(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            open_rooms: true,
            rooms: Vec::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl DirectoryConfig {
    /// Build the room directory described by this section.
    #[must_use]
    pub fn build(&self) -> RoomDirectory {
        let directory = RoomDirectory::new(self.open_rooms);
        for room in &self.rooms {
            if room.private {
                directory.add_private(room.id, room.members.iter().copied());
            } else {
                directory.add_public(room.id);
            }
        }
        directory
    }
}

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// `HUDDLE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        Self::build(Self::find_file(), environment())
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("HUDDLE_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        let config_paths = [
            "huddle.toml",
            "/etc/huddle/huddle.toml",
            "~/.config/huddle/huddle.toml",
        ];

        config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn build(file: Option<PathBuf>, env: ::config::Environment) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(::config::File::from(path.as_path()));
        }

        builder
            .add_source(env)
            .build()
            .and_then(|settings| settings.try_deserialize())
            .with_context(|| match &file {
                Some(path) => format!("Failed to load config file: {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            inbox_capacity: self.limits.hub_inbox_capacity,
            ..HubConfig::default()
        }
    }

    /// Per-connection timing. Zero durations are raised to one millisecond.
    #[must_use]
    pub fn pump_config(&self) -> PumpConfig {
        let millis = |ms: u64| Duration::from_millis(ms.max(1));
        PumpConfig {
            ping_interval: millis(self.heartbeat.interval_ms),
            idle_timeout: millis(self.heartbeat.timeout_ms),
            write_timeout: millis(self.heartbeat.write_timeout_ms),
        }
    }
}

fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix("HUDDLE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> ::config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.outbound_queue_capacity, 256);
        assert_eq!(config.heartbeat.interval_ms, 54_000);
        assert!(config.heartbeat.interval_ms < config.heartbeat.timeout_ms);
        assert_eq!(config.auth.issuer, "huddle");
        assert!(config.directory.open_rooms);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            outbound_queue_capacity = 32

            [auth]
            jwt_secret = "s3cret"

            [[directory.rooms]]
            id = 4
            private = true
            members = [1, 2]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.outbound_queue_capacity, 32);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.directory.rooms.len(), 1);
        assert_eq!(config.directory.rooms[0].members, vec![1, 2]);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::build(
            None,
            env(&[
                ("HUDDLE_PORT", "7000"),
                ("HUDDLE_AUTH__JWT_SECRET", "from-env"),
                ("HUDDLE_METRICS__ENABLED", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.auth.jwt_secret, "from-env");
        assert!(!config.metrics.enabled);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_file_then_env_layering() {
        let path = std::env::temp_dir().join(format!("huddle-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 9100\n[auth]\nissuer = \"from-file\"\n").unwrap();

        let from_file = Config::from_file(&path).unwrap();
        assert_eq!(from_file.port, 9100);

        let layered =
            Config::build(Some(path.clone()), env(&[("HUDDLE_PORT", "9200")])).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(layered.port, 9200);
        assert_eq!(layered.auth.issuer, "from-file");
    }

    #[test]
    fn test_pump_config_from_heartbeat() {
        let config = Config::default();
        let pump = config.pump_config();
        assert_eq!(pump.ping_interval, Duration::from_secs(54));
        assert_eq!(pump.idle_timeout, Duration::from_secs(60));
        assert_eq!(pump.write_timeout, Duration::from_secs(10));
        assert_eq!(config.hub_config().inbox_capacity, 1024);
    }

    #[test]
    fn test_zero_heartbeat_is_clamped() {
        let config = Config::build(
            None,
            env(&[
                ("HUDDLE_HEARTBEAT__INTERVAL_MS", "0"),
                ("HUDDLE_HEARTBEAT__WRITE_TIMEOUT_MS", "0"),
            ]),
        )
        .unwrap();
        assert_eq!(config.heartbeat.interval_ms, 0);

        let pump = config.pump_config();
        assert_eq!(pump.ping_interval, Duration::from_millis(1));
        assert_eq!(pump.write_timeout, Duration::from_millis(1));
        assert_eq!(pump.idle_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_directory_from_config() {
        use huddle_core::RoomAuthority;

        let config = DirectoryConfig {
            open_rooms: false,
            rooms: vec![
                RoomSeed {
                    id: 1,
                    private: false,
                    members: vec![],
                },
                RoomSeed {
                    id: 2,
                    private: true,
                    members: vec![10],
                },
            ],
        };
        let directory = config.build();

        assert!(directory.can_join(99, 1).await.unwrap());
        assert!(directory.can_join(10, 2).await.unwrap());
        assert!(!directory.can_join(99, 2).await.unwrap());
        assert!(directory.can_join(99, 3).await.is_err());
    }
}
