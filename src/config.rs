//! Relay configuration: transport limits, timeouts and listener settings.
//!
//! Settings come from command-line arguments layered over an optional TOML
//! file. CLI arguments take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Configuration limits for WebSocket connections.
///
/// These limits prevent resource exhaustion and ensure bounded memory usage
/// per connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum size of a single frame in bytes.
    ///
    /// Default: 1 MB
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes, after reassembling all
    /// fragments.
    ///
    /// Default: 4 MB
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,

    /// Maximum size of an HTTP request or response head in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,       // 1 MB
            max_message_size: 4 * 1024 * 1024, // 4 MB
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`] if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to receive a complete request head and finish the
    /// upgrade. Default: 10 seconds
    pub handshake: Duration,

    /// How long teardown waits for connection tasks to finish.
    /// Default: 5 seconds
    pub shutdown_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Command-line arguments for the relay server.
#[derive(Parser, Debug, Default)]
#[command(name = "relay")]
#[command(version)]
#[command(about = "WebSocket broadcast relay", long_about = None)]
pub struct RelayArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path that accepts WebSocket upgrades
    #[arg(long)]
    pub ws_path: Option<String>,

    /// Directory served for plain GET requests
    #[arg(long)]
    pub static_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub static_files: StaticSection,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
        }
    }
}

/// Static content settings
#[derive(Debug, Deserialize)]
pub struct StaticSection {
    #[serde(default = "default_static_root")]
    pub root: PathBuf,
    #[serde(default = "default_index")]
    pub index: String,
}

impl Default for StaticSection {
    fn default() -> Self {
        Self {
            root: default_static_root(),
            index: default_index(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TimeoutSection {
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            handshake_secs: default_handshake_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_static_root() -> PathBuf {
    PathBuf::from("static")
}

fn default_index() -> String {
    "index.html".to_string()
}

fn default_handshake_secs() -> u64 {
    10
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on. `0` picks an ephemeral port.
    pub port: u16,
    /// The single path that accepts WebSocket upgrades.
    pub ws_path: String,
    /// Content root for plain GET requests.
    pub static_root: PathBuf,
    /// Document served for `/`.
    pub index_file: String,
    /// Transport limits.
    pub limits: Limits,
    /// Handshake and teardown timeouts.
    pub timeouts: Timeouts,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_parts(RelayArgs::default(), TomlConfig::default())
    }
}

impl RelayConfig {
    /// Load configuration from the process arguments and optional TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the config file cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::from_args(RelayArgs::parse())
    }

    /// Resolve configuration from already-parsed arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the config file cannot be read or parsed.
    pub fn from_args(args: RelayArgs) -> Result<Self> {
        let toml_config = match args.config {
            Some(ref path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!(
                        "failed to read config file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::parse_toml(&contents).map_err(|e| match e {
                    Error::Config(reason) => {
                        Error::Config(format!("'{}': {}", path.display(), reason))
                    }
                    other => other,
                })?
            }
            None => TomlConfig::default(),
        };

        Ok(Self::from_parts(args, toml_config))
    }

    /// Parse the TOML file format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on invalid TOML or mistyped values.
    pub fn parse_toml(contents: &str) -> Result<TomlConfig> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    fn from_parts(args: RelayArgs, file: TomlConfig) -> Self {
        Self {
            host: args.host.unwrap_or(file.server.host),
            port: args.port.unwrap_or(file.server.port),
            ws_path: args.ws_path.unwrap_or(file.server.ws_path),
            static_root: args.static_root.unwrap_or(file.static_files.root),
            index_file: file.static_files.index,
            limits: file.limits,
            timeouts: Timeouts {
                handshake: Duration::from_secs(file.timeouts.handshake_secs),
                shutdown_grace: Duration::from_secs(file.timeouts.shutdown_grace_secs),
            },
            log_level: args.log_level.unwrap_or(file.logging.level),
        }
    }

    /// Listen address in `host:port` form.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Set the listening port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the content root for static files.
    #[must_use]
    pub fn with_static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = root.into();
        self
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 1024 * 1024);
        assert_eq!(limits.max_message_size, 4 * 1024 * 1024);
        assert_eq!(limits.max_fragment_count, 128);
        assert_eq!(limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_limits_checks() {
        let limits = Limits::new(64 * 1024, 256 * 1024, 16, 4096);
        assert!(limits.check_frame_size(1024).is_ok());
        assert!(limits.check_frame_size(65 * 1024).is_err());
        assert!(limits.check_message_size(256 * 1024).is_ok());
        assert!(limits.check_message_size(256 * 1024 + 1).is_err());
        assert!(limits.check_fragment_count(16).is_ok());
        assert!(limits.check_fragment_count(17).is_err());
        assert!(limits.check_handshake_size(4097).is_err());
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.static_root, PathBuf::from("static"));
        assert_eq!(config.index_file, "index.html");
        assert_eq!(config.listen_addr(), "127.0.0.1:8080");
        assert_eq!(config.timeouts, Timeouts::default());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            ws_path = "/chat"

            [static_files]
            root = "public"

            [limits]
            max_frame_size = 4096

            [timeouts]
            handshake_secs = 3

            [logging]
            level = "debug"
        "#;

        let file = RelayConfig::parse_toml(toml_str).unwrap();
        let config = RelayConfig::from_parts(RelayArgs::default(), file);
        assert_eq!(config.listen_addr(), "0.0.0.0:9000");
        assert_eq!(config.ws_path, "/chat");
        assert_eq!(config.static_root, PathBuf::from("public"));
        assert_eq!(config.index_file, "index.html");
        assert_eq!(config.limits.max_frame_size, 4096);
        assert_eq!(config.limits.max_fragment_count, 128);
        assert_eq!(config.timeouts.handshake, Duration::from_secs(3));
        assert_eq!(config.timeouts.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = RelayConfig::parse_toml("[server]\nport = 9000\n").unwrap();
        let args = RelayArgs {
            port: Some(7000),
            log_level: Some("trace".into()),
            ..Default::default()
        };
        let config = RelayConfig::from_parts(args, file);
        assert_eq!(config.port, 7000);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = RelayConfig::parse_toml("[server]\nport = \"eighty\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let args = RelayArgs {
            config: Some(PathBuf::from("/nonexistent/relay.toml")),
            ..Default::default()
        };
        let err = RelayConfig::from_args(args).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("relay.toml")));
    }

    #[test]
    fn test_builder() {
        let config = RelayConfig::default()
            .with_port(0)
            .with_static_root("/tmp/www")
            .with_limits(Limits::new(64 * 1024, 256 * 1024, 16, 4096));
        assert_eq!(config.port, 0);
        assert_eq!(config.static_root, PathBuf::from("/tmp/www"));
        assert_eq!(config.limits.max_fragment_count, 16);
    }
}
