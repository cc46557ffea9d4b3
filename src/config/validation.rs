//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Required settings are present (root path, shared secret)
//! - Privilege targets exist on this system
//! - Listener addresses are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before any socket is bound

use nix::unistd::{Group, User};
use thiserror::Error;

use crate::config::schema::RouterConfig;
use crate::net::address::ServerAddress;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("please set the root path (--root)")]
    MissingRootPath,

    #[error("please set the password file (--password-file)")]
    MissingPassword,

    #[error("the username specified by --user, '{0}', does not exist")]
    UnknownUser(String),

    #[error("the group name specified by --group, '{0}', does not exist")]
    UnknownGroup(String),

    #[error("setting --group also requires you to set --user")]
    GroupWithoutUser,

    #[error("invalid listen address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("max_connections must be greater than zero")]
    ZeroConnections,
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.root_path.is_none() {
        errors.push(ValidationError::MissingRootPath);
    }

    if config.auth.password.is_none() && config.auth.password_file.is_none() {
        errors.push(ValidationError::MissingPassword);
    }

    let user = non_empty(config.privilege.user.as_deref());
    let group = non_empty(config.privilege.group.as_deref());
    match (user, group) {
        (Some(user), group) => {
            if !user_exists(user) {
                errors.push(ValidationError::UnknownUser(user.to_string()));
            }
            if let Some(group) = group {
                if !group_exists(group) {
                    errors.push(ValidationError::UnknownGroup(group.to_string()));
                }
            }
        }
        // An explicitly configured group needs a user, even an empty one.
        (None, _) if config.privilege.group.is_some() => {
            errors.push(ValidationError::GroupWithoutUser);
        }
        (None, _) => {}
    }

    let addresses = std::iter::once(&config.listener.address).chain(&config.listener.api_addresses);
    for address in addresses {
        if let Err(e) = address.parse::<ServerAddress>() {
            errors.push(ValidationError::InvalidAddress {
                address: address.clone(),
                reason: e.to_string(),
            });
        }
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn user_exists(name: &str) -> bool {
    matches!(User::from_name(name), Ok(Some(_)))
}

fn group_exists(name: &str) -> bool {
    matches!(Group::from_name(name), Ok(Some(_)))
}
