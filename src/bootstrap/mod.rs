//! Privilege-separated bootstrap.
//!
//! # Data Flow
//! ```text
//! privileged.rs (secrets, API accounts, resource root)
//!     → net::bind_listeners (sockets)
//!     → identity.rs (initgroups → setgid → setuid)
//!     → unprivileged service construction
//! ```
//!
//! # Design Decisions
//! - Everything that needs the original identity happens first
//! - A failed privilege step is fatal; partial drops are never left in place

pub mod identity;
pub mod privileged;
pub mod resources;

pub use identity::{drop_privilege, DroppedIdentity, IdentitySwitch, SystemIdentity};
pub use privileged::{bootstrap_privileged, resolve_password, PrivilegedState};
pub use resources::ResourceLocator;
