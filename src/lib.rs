//! UstRouter agent.
//!
//! Collects telemetry from application processes over the ingestion socket,
//! buffers it for upstream delivery, and exposes an administrative HTTP API.
//!
//! # Architecture Overview
//!
//! ```text
//!   privileged                      unprivileged
//!  ┌──────────────────────────┐    ┌───────────────────────────────────────────┐
//!  │ bootstrap (secrets,      │    │  background runtime                        │
//!  │   accounts, resources)   │    │   ├─ ingestion service ◀── clients         │
//!  │ net::bind_listeners      │──▶ │   ├─ admin service     ◀── HTTP API        │
//!  │ bootstrap::drop_privilege│    │   └─ signal listener ──┐                   │
//!  └──────────────────────────┘    │                        ▼ events            │
//!                                  │  main thread: lifecycle::Coordinator       │
//!                                  │   escalation, feedback fd, teardown        │
//!                                  └───────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod accounts;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod net;
pub mod protocol;

// Services
pub mod admin;
pub mod ingestion;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::RouterConfig;
pub use error::AgentError;
pub use lifecycle::{start, AgentRuntime, ShutdownOutcome};
