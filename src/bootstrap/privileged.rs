//! Work that must happen before privilege is dropped.

use crate::accounts::{read_secret_file, ApiAccountDatabase, Secret};
use crate::bootstrap::resources::ResourceLocator;
use crate::config::{AuthConfig, ConfigError, RouterConfig, ValidationError};
use crate::error::AgentError;

/// Everything gathered while still running with the original identity.
#[derive(Debug)]
pub struct PrivilegedState {
    /// Shared secret for the ingestion account.
    pub password: Secret,
    pub api_accounts: ApiAccountDatabase,
    pub resources: ResourceLocator,
}

/// Read secrets, build the admin API accounts and resolve the installation
/// root. Any failure aborts startup.
pub fn bootstrap_privileged(config: &RouterConfig) -> Result<PrivilegedState, AgentError> {
    let password = resolve_password(&config.auth)?;

    let mut api_accounts = ApiAccountDatabase::new();
    for descriptor in &config.auth.authorizations {
        api_accounts.add_descriptor(descriptor)?;
    }

    let root = config
        .root_path
        .as_deref()
        .ok_or_else(|| ConfigError::Validation(vec![ValidationError::MissingRootPath]))?;
    let resources = ResourceLocator::new(root)?;

    tracing::debug!(
        api_accounts = api_accounts.len(),
        root = %resources.root().display(),
        "Privileged bootstrap complete"
    );

    Ok(PrivilegedState {
        password,
        api_accounts,
        resources,
    })
}

/// The inline password wins when non-empty; otherwise the password file is read.
pub fn resolve_password(auth: &AuthConfig) -> Result<Secret, AgentError> {
    if let Some(password) = auth.password.as_deref().filter(|p| !p.is_empty()) {
        return Ok(Secret::new(password));
    }

    let path = auth
        .password_file
        .as_deref()
        .ok_or_else(|| ConfigError::Validation(vec![ValidationError::MissingPassword]))?;
    read_secret_file("password", path)
}
