//! Ingestion client accounts.

use std::collections::HashMap;
use std::fmt;

/// Name of the account ingestion clients authenticate as.
pub const INGESTION_ACCOUNT: &str = "logging";

/// A secret that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare without short-circuiting on the first differing byte.
    pub fn matches(&self, candidate: &str) -> bool {
        let a = self.0.as_bytes();
        let b = candidate.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// What an account is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    /// May inspect service state.
    pub inspect: bool,
    /// May change service state (shutdown, reconfigure).
    pub control: bool,
}

impl Permissions {
    pub const NONE: Permissions = Permissions {
        inspect: false,
        control: false,
    };
    pub const FULL: Permissions = Permissions {
        inspect: true,
        control: true,
    };
}

#[derive(Debug, Clone)]
pub struct Account {
    name: String,
    secret: Secret,
    permissions: Permissions,
}

impl Account {
    pub fn new(name: impl Into<String>, secret: Secret, permissions: Permissions) -> Self {
        Self {
            name: name.into(),
            secret,
            permissions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn check_password(&self, candidate: &str) -> bool {
        self.secret.matches(candidate)
    }
}

/// Accounts allowed to speak the ingestion protocol.
///
/// Built once during unprivileged initialization and shared read-only.
#[derive(Debug, Default)]
pub struct AccountsDatabase {
    accounts: HashMap<String, Account>,
}

impl AccountsDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database holding the ingestion account for the given shared secret.
    pub fn for_ingestion(password: Secret) -> Self {
        let mut db = Self::new();
        db.add(Account::new(INGESTION_ACCOUNT, password, Permissions::NONE));
        db
    }

    /// Insert or replace an account.
    pub fn add(&mut self, account: Account) {
        self.accounts.insert(account.name.clone(), account);
    }

    /// Look up an account and verify its password.
    pub fn authenticate(&self, name: &str, password: &str) -> Option<&Account> {
        self.accounts.get(name).filter(|account| account.check_password(password))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
