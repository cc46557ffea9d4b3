//! Agent-level error taxonomy.
//!
//! Every fatal startup or coordination failure is an [`AgentError`]. The
//! entry point logs it and converts it into exit status 1; there is no
//! degraded "partially initialized" mode.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::loader::ConfigError;

/// Broad class of a fatal error, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid settings, unknown accounts, unreadable secrets.
    Configuration,
    /// A step of the privilege drop failed.
    Privilege,
    /// Socket, runtime or wait primitive failure.
    Resource,
}

/// Fatal errors raised while bootstrapping or coordinating the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid authorization descriptor '{descriptor}': {reason}")]
    Authorization { descriptor: String, reason: String },

    #[error("cannot read {what} from {path}: {source}")]
    SecretFile {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("root path {path} is not a usable directory: {reason}")]
    ResourceLocator { path: PathBuf, reason: String },

    #[error("cannot lookup user information for user {0}")]
    UnknownUser(String),

    #[error("cannot lookup group information for group {0}")]
    UnknownGroup(String),

    #[error("unable to lower UstRouter's privilege to that of user '{user}' and group '{group}': {step}")]
    Privilege {
        user: String,
        group: String,
        step: String,
        #[source]
        source: nix::Error,
    },

    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("notification '{0}' was abandoned before it fired")]
    NotificationAbandoned(&'static str),
}

impl AgentError {
    /// Wrap an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Config(_)
            | AgentError::Authorization { .. }
            | AgentError::SecretFile { .. }
            | AgentError::ResourceLocator { .. }
            | AgentError::UnknownUser(_)
            | AgentError::UnknownGroup(_) => ErrorKind::Configuration,
            AgentError::Privilege { .. } => ErrorKind::Privilege,
            AgentError::Bind { .. } | AgentError::Io { .. } | AgentError::NotificationAbandoned(_) => {
                ErrorKind::Resource
            }
        }
    }
}
