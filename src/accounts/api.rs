//! Admin API accounts built from authorization descriptors.
//!
//! A descriptor is `[level:]username:password_file` where `level` is
//! `readonly` or `full` (the default). The password is the trimmed content
//! of the file, read while the process still has its original privileges.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::accounts::account::{Account, Permissions, Secret};
use crate::error::AgentError;

#[derive(Debug, Default)]
pub struct ApiAccountDatabase {
    accounts: HashMap<String, Account>,
}

impl ApiAccountDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a descriptor, read its password file and add the account.
    pub fn add_descriptor(&mut self, descriptor: &str) -> Result<(), AgentError> {
        let invalid = |reason: &str| AgentError::Authorization {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = descriptor.split(':').collect();
        let (permissions, username, password_file) = match parts.as_slice() {
            [username, file] => (Permissions::FULL, *username, *file),
            [level, username, file] => {
                let permissions = match *level {
                    "readonly" => Permissions {
                        inspect: true,
                        control: false,
                    },
                    "full" => Permissions::FULL,
                    other => return Err(invalid(&format!("invalid authorization level '{}'", other))),
                };
                (permissions, *username, *file)
            }
            _ => return Err(invalid("too many or too few colons")),
        };

        if username.is_empty() {
            return Err(invalid("empty username"));
        }
        if password_file.is_empty() {
            return Err(invalid("empty password file path"));
        }

        let password = read_secret_file("API account password", Path::new(password_file))?;
        self.add(Account::new(username, password, permissions));
        Ok(())
    }

    pub fn add(&mut self, account: Account) {
        self.accounts.insert(account.name().to_string(), account);
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Option<&Account> {
        self.accounts.get(username).filter(|account| account.check_password(password))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Read a secret from a file and strip surrounding whitespace.
pub fn read_secret_file(what: &'static str, path: &Path) -> Result<Secret, AgentError> {
    let content = fs::read_to_string(path).map_err(|source| AgentError::SecretFile {
        what,
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Secret::new(content.trim()))
}
