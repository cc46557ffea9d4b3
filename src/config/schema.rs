//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default ingestion listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "tcp://127.0.0.1:9344";

/// Default administrative API listen address.
pub const DEFAULT_API_LISTEN_ADDRESS: &str = "tcp://127.0.0.1:9345";

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Installation root; resources are located relative to it. Required.
    pub root_path: Option<PathBuf>,

    /// Server instance directory, reported through the admin API.
    pub instance_dir: Option<PathBuf>,

    /// Listening sockets.
    pub listener: ListenerConfig,

    /// Shared secret and admin API authorizations.
    pub auth: AuthConfig,

    /// Identity to switch to after binding.
    pub privilege: PrivilegeConfig,

    /// Upstream gateway settings.
    pub gateway: GatewayConfig,

    /// Supervisor (watchdog) integration.
    pub supervisor: SupervisorConfig,

    /// Ingestion service tuning.
    pub ingestion: IngestionConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Ingestion address (`tcp://host:port` or `unix:/path`).
    pub address: String,

    /// Administrative API addresses.
    pub api_addresses: Vec<String>,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_LISTEN_ADDRESS.to_string(),
            api_addresses: vec![DEFAULT_API_LISTEN_ADDRESS.to_string()],
            max_connections: 10_000,
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Inline shared secret for ingestion clients.
    pub password: Option<String>,

    /// File holding the shared secret; used when `password` is empty.
    pub password_file: Option<PathBuf>,

    /// Admin API authorization descriptors: `[level:]username:password_file`.
    pub authorizations: Vec<String>,
}

/// Privilege drop target.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PrivilegeConfig {
    pub user: Option<String>,

    /// Defaults to the user's primary group. Requires `user`.
    pub group: Option<String>,
}

/// Upstream gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// CA certificate for the gateway. Empty selects the bundled certificate,
    /// `-` disables certificate pinning.
    pub cert: Option<String>,
}

/// Supervisor integration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Inherited descriptor that closes when the supervisor dies.
    pub feedback_fd: Option<i32>,

    /// Password the supervisor presents to the admin API for full access.
    pub fd_passing_password: Option<String>,
}

/// Ingestion service tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Events held for upstream delivery before the oldest are dropped.
    pub max_buffered_events: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_buffered_events: 10_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}
