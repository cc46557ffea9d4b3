//! Listen address parsing.
//!
//! Addresses are written `tcp://host:port` or `unix:/absolute/path`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// A parsed listen address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddress {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("unsupported address type; use tcp://host:port or unix:/path")]
    UnsupportedScheme,
    #[error("unix socket path must be absolute")]
    RelativeUnixPath,
    #[error("missing host")]
    MissingHost,
    #[error("missing port")]
    MissingPort,
    #[error("{0}")]
    Url(#[from] url::ParseError),
}

impl ServerAddress {
    pub fn is_unix(&self) -> bool {
        matches!(self, ServerAddress::Unix(_))
    }

    /// Socket file path for unix addresses.
    pub fn unix_path(&self) -> Option<&PathBuf> {
        match self {
            ServerAddress::Unix(path) => Some(path),
            ServerAddress::Tcp { .. } => None,
        }
    }
}

impl FromStr for ServerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            let path = PathBuf::from(path);
            if !path.is_absolute() {
                return Err(AddressError::RelativeUnixPath);
            }
            return Ok(ServerAddress::Unix(path));
        }

        if !s.starts_with("tcp://") {
            return Err(AddressError::UnsupportedScheme);
        }

        let url = Url::parse(s)?;
        let host = url.host_str().ok_or(AddressError::MissingHost)?;
        let port = url.port().ok_or(AddressError::MissingPort)?;

        // IPv6 literals come back bracketed; the socket API wants them bare.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(ServerAddress::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddress::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{}]:{}", host, port),
            ServerAddress::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ServerAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp() {
        let addr: ServerAddress = "tcp://127.0.0.1:9344".parse().unwrap();
        assert_eq!(
            addr,
            ServerAddress::Tcp {
                host: "127.0.0.1".into(),
                port: 9344
            }
        );
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:9344");
        assert!(!addr.is_unix());
    }

    #[test]
    fn parses_ipv6() {
        let addr: ServerAddress = "tcp://[::1]:9344".parse().unwrap();
        assert_eq!(
            addr,
            ServerAddress::Tcp {
                host: "::1".into(),
                port: 9344
            }
        );
        assert_eq!(addr.to_string(), "tcp://[::1]:9344");
    }

    #[test]
    fn parses_unix() {
        let addr: ServerAddress = "unix:/tmp/ust.sock".parse().unwrap();
        assert_eq!(addr.unix_path(), Some(&PathBuf::from("/tmp/ust.sock")));
        assert_eq!(addr.to_string(), "unix:/tmp/ust.sock");
    }

    #[test]
    fn rejects_bad_addresses() {
        assert_eq!("udp://1.2.3.4:5".parse::<ServerAddress>(), Err(AddressError::UnsupportedScheme));
        assert_eq!("unix:ust.sock".parse::<ServerAddress>(), Err(AddressError::RelativeUnixPath));
        assert_eq!("tcp://127.0.0.1".parse::<ServerAddress>(), Err(AddressError::MissingPort));
    }
}
