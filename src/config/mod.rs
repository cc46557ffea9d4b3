//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → command-line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → moved into the agent runtime
//! ```
//!
//! # Design Decisions
//! - Config is immutable once validated; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, GatewayConfig, IngestionConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    PrivilegeConfig, RouterConfig, SupervisorConfig,
};
pub use validation::{validate_config, ValidationError};
