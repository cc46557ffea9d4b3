//! Permanent privilege drop.
//!
//! The switch is behind the [`IdentitySwitch`] trait so startup ordering can
//! be observed in tests; production uses [`SystemIdentity`].

use std::ffi::CString;

use nix::unistd::{self, Gid, Group, Uid, User};

use crate::config::PrivilegeConfig;
use crate::error::AgentError;

/// The identity the process switched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedIdentity {
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
}

/// Performs the actual identity change.
pub trait IdentitySwitch {
    /// Whether the process currently runs with root privileges.
    fn is_privileged(&self) -> bool;

    /// Switch to `user`, and to `group` or the user's primary group.
    fn switch_to(&self, user: &str, group: Option<&str>) -> Result<DroppedIdentity, AgentError>;
}

/// Drop privilege if running as root and a target user is configured.
///
/// Returns `None` when nothing had to be done.
pub fn drop_privilege(
    switch: &dyn IdentitySwitch,
    config: &PrivilegeConfig,
) -> Result<Option<DroppedIdentity>, AgentError> {
    let Some(user) = config.user.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    if !switch.is_privileged() {
        tracing::debug!(user, "Not running as root; keeping current identity");
        return Ok(None);
    }

    let group = config.group.as_deref().filter(|g| !g.is_empty());
    let identity = switch.switch_to(user, group)?;

    tracing::info!(
        user = %identity.user,
        group = %identity.group,
        uid = identity.uid,
        gid = identity.gid,
        "Privilege lowered"
    );
    Ok(Some(identity))
}

/// Switches identity with `initgroups`, `setgid` and `setuid`, in that order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentitySwitch for SystemIdentity {
    fn is_privileged(&self) -> bool {
        Uid::effective().is_root()
    }

    fn switch_to(&self, user: &str, group: Option<&str>) -> Result<DroppedIdentity, AgentError> {
        let pw = User::from_name(user)
            .ok()
            .flatten()
            .ok_or_else(|| AgentError::UnknownUser(user.to_string()))?;

        let (gid, group_name) = match group {
            None => {
                let name = Group::from_gid(pw.gid)
                    .ok()
                    .flatten()
                    .map(|g| g.name)
                    .unwrap_or_else(|| pw.gid.to_string());
                (pw.gid, name)
            }
            Some(name) => {
                let gr = Group::from_name(name)
                    .ok()
                    .flatten()
                    .ok_or_else(|| AgentError::UnknownGroup(name.to_string()))?;
                (gr.gid, gr.name)
            }
        };

        let fail = |step: String, source: nix::Error| AgentError::Privilege {
            user: user.to_string(),
            group: group_name.clone(),
            step,
            source,
        };

        let c_user = CString::new(user).map_err(|_| AgentError::UnknownUser(user.to_string()))?;
        unistd::initgroups(&c_user, gid).map_err(|e| fail("cannot set supplementary groups".into(), e))?;
        unistd::setgid(gid).map_err(|e| fail(format!("cannot set group ID to {}", gid), e))?;
        unistd::setuid(pw.uid).map_err(|e| fail(format!("cannot set user ID to {}", pw.uid), e))?;

        // Still single-threaded here: the runtime is built after this returns.
        std::env::set_var("USER", &pw.name);
        std::env::set_var("HOME", &pw.dir);

        Ok(DroppedIdentity {
            user: pw.name,
            group: group_name,
            uid: pw.uid.as_raw(),
            gid: Gid::as_raw(gid),
        })
    }
}
