//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::RouterConfig;
use crate::config::validation::ValidationError;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file, or defaults when no file is given.
///
/// Validation is a separate step so command-line overrides can be applied
/// in between.
pub fn load_config(path: Option<&Path>) -> Result<RouterConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(RouterConfig::default());
    };

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: RouterConfig = toml::from_str(&content)?;

    tracing::debug!(path = %path.display(), "Configuration file loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn no_path_yields_defaults() {
        let config = load_config(None).unwrap();
        assert!(config.root_path.is_none());
    }

    #[test]
    fn loads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "root_path = \"/opt/ust\"\n[privilege]\nuser = \"nobody\"").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.privilege.user.as_deref(), Some("nobody"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Some(Path::new("/nonexistent/ust-router.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "root_path = [").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
