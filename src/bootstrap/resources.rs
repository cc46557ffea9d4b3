//! Installation resource lookup.

use std::path::{Path, PathBuf};

use crate::error::AgentError;

/// File name of the bundled gateway CA certificate.
const GATEWAY_CERT_FILE: &str = "union_station_gateway.crt";

/// Locates files shipped with the installation.
///
/// Resolved while still privileged because the unprivileged account may not
/// be able to traverse the parents of the root directory.
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    root: PathBuf,
    resources_dir: PathBuf,
}

impl ResourceLocator {
    pub fn new(root: &Path) -> Result<Self, AgentError> {
        let root = root.canonicalize().map_err(|e| AgentError::ResourceLocator {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !root.is_dir() {
            return Err(AgentError::ResourceLocator {
                path: root,
                reason: "not a directory".to_string(),
            });
        }

        let resources_dir = root.join("resources");
        Ok(Self { root, resources_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resources_dir(&self) -> &Path {
        &self.resources_dir
    }

    /// Resolve the gateway certificate setting.
    ///
    /// Unset or empty selects the bundled certificate, `-` disables it, and
    /// anything else is used as given.
    pub fn gateway_cert(&self, configured: Option<&str>) -> Option<PathBuf> {
        match configured {
            None | Some("") => Some(self.resources_dir.join(GATEWAY_CERT_FILE)),
            Some("-") => None,
            Some(path) => Some(PathBuf::from(path)),
        }
    }
}
