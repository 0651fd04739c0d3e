//! Configuration for the interlocking server and the serial bridge.
//!
//! Loaded from JSON; every field has a default, so a partial file (or none
//! at all) works.
//!
//! # Example
//!
//! ```rust
//! use rs_signalbox::config::{Config, ServerConfig, WebConfig};
//!
//! // Use defaults
//! let config = Config::default();
//!
//! // Or customize
//! let config = Config::default()
//!     .with_server(ServerConfig::default().with_switching_max_attempts(5))
//!     .with_web(WebConfig::default().with_port(3000));
//!
//! // Or parse
//! let config = Config::from_json(r#"{"web": {"port": 9000}}"#).unwrap();
//! assert_eq!(config.web.port, 9000);
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

// ============================================================================
// Main Config
// ============================================================================

/// Complete server configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hardware link and interlocking settings.
    pub server: ServerConfig,
    /// Operator channel and administrative HTTP.
    pub web: WebConfig,
    /// Record storage.
    pub store: StoreConfig,
}

impl Config {
    /// Set server configuration.
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    /// Set web configuration.
    pub fn with_web(mut self, web: WebConfig) -> Self {
        self.web = web;
        self
    }

    /// Set store configuration.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        load_json(path.as_ref())
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

// ============================================================================
// Server Config
// ============================================================================

/// Hardware link and interlocking settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port trains (or bridges) connect to.
    pub controllers_port: u16,
    /// Actuation attempts before points are declared failed.
    pub switching_max_attempts: u8,
    /// Notifications buffered per operator client.
    pub notification_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            controllers_port: 8001,
            switching_max_attempts: 3,
            notification_capacity: crate::notify::DEFAULT_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Set the hardware link port.
    pub fn with_controllers_port(mut self, port: u16) -> Self {
        self.controllers_port = port;
        self
    }

    /// Set the actuation retry bound (at least one attempt).
    pub fn with_switching_max_attempts(mut self, attempts: u8) -> Self {
        self.switching_max_attempts = attempts.max(1);
        self
    }

    /// Set the per-client notification buffer.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }
}

// ============================================================================
// Web Config
// ============================================================================

/// Operator channel and administrative HTTP settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Port to listen on.
    pub port: u16,
    /// Whether to enable CORS for all origins.
    pub cors_permissive: bool,
    /// Largest accepted HTTP request body.
    pub max_request_body_bytes: usize,
    /// Largest accepted operator message; a longer one closes the client.
    pub max_message_bytes: usize,
    /// Seconds allowed to answer an HTTP request.
    pub request_timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_permissive: true,
            max_request_body_bytes: 64 * 1024,
            max_message_bytes: 64 * 1024,
            request_timeout_secs: 10,
        }
    }
}

impl WebConfig {
    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set CORS mode.
    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Set the HTTP body limit.
    pub fn with_max_request_body_bytes(mut self, bytes: usize) -> Self {
        self.max_request_body_bytes = bytes;
        self
    }

    /// Set the operator frame limit.
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }
}

// ============================================================================
// Store Config
// ============================================================================

/// Record storage settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON document holding records and the event log.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "signalbox.json".into(),
        }
    }
}

impl StoreConfig {
    /// Set the document path.
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.into();
        self
    }
}

// ============================================================================
// Bridge Config
// ============================================================================

/// Serial bridge settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interlocking server host.
    pub host: String,
    /// Interlocking server hardware link port.
    pub port: u16,
    /// Delay before reconnecting a dropped relay.
    pub reconnect_delay_ms: u64,
    /// Serial devices to relay.
    pub serial: Vec<SerialConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: ServerConfig::default().controllers_port,
            reconnect_delay_ms: 5000,
            serial: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Set the server address.
    pub fn with_server(mut self, host: &str, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Add a serial device.
    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial.push(serial);
        self
    }

    /// `host:port` of the server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        load_json(path.as_ref())
    }
}

/// One serial device (a train's radio link).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Whether to relay this device.
    pub enabled: bool,
    /// Character device path, e.g. `/dev/rfcomm0`.
    pub device: String,
    /// Line speed.
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: String::new(),
            baud: 9600,
        }
    }
}

impl SerialConfig {
    /// Enabled device at `path`.
    pub fn new(device: &str) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Set the line speed.
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }
}
