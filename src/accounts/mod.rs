//! Credential storage for the ingestion protocol and the admin API.
//!
//! Both databases are filled during startup and then shared read-only via
//! `Arc`; nothing mutates them once the services are running.

pub mod account;
pub mod api;

pub use account::{Account, AccountsDatabase, Permissions, Secret, INGESTION_ACCOUNT};
pub use api::{read_secret_file, ApiAccountDatabase};
