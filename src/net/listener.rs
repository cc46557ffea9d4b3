//! Listener pre-binding and accept loops with backpressure.
//!
//! # Responsibilities
//! - Bind every configured address while still privileged
//! - Relax unix socket permissions for the unprivileged runtime
//! - Convert pre-bound sockets into tokio listeners after privilege drop
//! - Enforce max_connections limit via semaphore
//!
//! # Design Decisions
//! - Binding uses blocking std sockets so it can run before any runtime exists
//! - A partial listener set is never returned; the first failure aborts

use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::error::AgentError;
use crate::net::address::ServerAddress;

/// World read/write, so unprivileged clients can connect.
const UNIX_SOCKET_MODE: u32 = 0o666;

/// A socket bound before privilege drop but not yet attached to a runtime.
#[derive(Debug)]
pub struct BoundSocket {
    address: ServerAddress,
    socket: PreboundSocket,
}

#[derive(Debug)]
enum PreboundSocket {
    Tcp(StdTcpListener),
    Unix(StdUnixListener),
}

impl BoundSocket {
    /// Bind a single address.
    pub fn bind(address: &ServerAddress) -> Result<Self, AgentError> {
        let bind_error = |source| AgentError::Bind {
            address: address.to_string(),
            source,
        };

        let socket = match address {
            ServerAddress::Tcp { host, port } => {
                let listener = StdTcpListener::bind((host.as_str(), *port)).map_err(bind_error)?;
                listener.set_nonblocking(true).map_err(bind_error)?;
                PreboundSocket::Tcp(listener)
            }
            ServerAddress::Unix(path) => {
                remove_stale_socket(path).map_err(bind_error)?;
                let listener = StdUnixListener::bind(path).map_err(bind_error)?;
                listener.set_nonblocking(true).map_err(bind_error)?;
                fs::set_permissions(path, fs::Permissions::from_mode(UNIX_SOCKET_MODE)).map_err(bind_error)?;
                PreboundSocket::Unix(listener)
            }
        };

        tracing::info!(address = %address, "Listener bound");
        Ok(Self {
            address: address.clone(),
            socket,
        })
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Actual local TCP address (useful when binding port 0).
    pub fn local_tcp_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            PreboundSocket::Tcp(listener) => listener.local_addr().ok(),
            PreboundSocket::Unix(_) => None,
        }
    }

    /// Attach to the current tokio runtime.
    ///
    /// Must be called from within a runtime context.
    pub fn into_listener(self, max_connections: usize) -> io::Result<Listener> {
        let inner = match self.socket {
            PreboundSocket::Tcp(listener) => Inner::Tcp(TcpListener::from_std(listener)?),
            PreboundSocket::Unix(listener) => Inner::Unix(UnixListener::from_std(listener)?),
        };

        Ok(Listener {
            address: self.address,
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// The full set of pre-bound sockets.
#[derive(Debug)]
pub struct ListeningSocketSet {
    /// The ingestion socket (exactly one).
    pub ingestion: BoundSocket,
    /// Administrative API sockets.
    pub admin: Vec<BoundSocket>,
}

impl ListeningSocketSet {
    /// Socket files created by this set, for cleanup at exit.
    pub fn unix_paths(&self) -> Vec<PathBuf> {
        std::iter::once(&self.ingestion)
            .chain(&self.admin)
            .filter_map(|s| s.address.unix_path().cloned())
            .collect()
    }
}

/// Bind the ingestion address and then every admin address, in order.
pub fn bind_listeners(config: &ListenerConfig) -> Result<ListeningSocketSet, AgentError> {
    let ingestion = BoundSocket::bind(&parse(&config.address)?)?;

    let admin = config
        .api_addresses
        .iter()
        .map(|address| BoundSocket::bind(&parse(address)?))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ListeningSocketSet { ingestion, admin })
}

fn parse(address: &str) -> Result<ServerAddress, AgentError> {
    address.parse().map_err(|e: crate::net::address::AddressError| AgentError::Bind {
        address: address.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })
}

#[derive(Debug)]
enum Inner {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// An accepted client stream.
#[derive(Debug)]
pub enum Accepted {
    Tcp(TcpStream, SocketAddr),
    Unix(UnixStream),
}

impl Accepted {
    /// Human-readable peer description for logs.
    pub fn peer(&self) -> String {
        match self {
            Accepted::Tcp(_, addr) => addr.to_string(),
            Accepted::Unix(_) => "unix".to_string(),
        }
    }
}

/// A bounded listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    address: ServerAddress,
    inner: Inner,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> io::Result<(Accepted, ConnectionPermit)> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "listener closed"))?;

        let accepted = match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Accepted::Tcp(stream, addr)
            }
            Inner::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Accepted::Unix(stream)
            }
        };

        tracing::debug!(
            address = %self.address,
            peer = %accepted.peer(),
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((accepted, ConnectionPermit { _permit: permit }))
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;

    #[test]
    fn binds_unix_socket_world_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.sock");
        let socket = BoundSocket::bind(&ServerAddress::Unix(path.clone())).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_socket());
        assert_eq!(meta.permissions().mode() & 0o777, UNIX_SOCKET_MODE);
        assert!(socket.address().is_unix());
    }

    #[test]
    fn replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(StdUnixListener::bind(&path).unwrap());

        assert!(BoundSocket::bind(&ServerAddress::Unix(path)).is_ok());
    }

    #[test]
    fn binds_in_order_and_fails_whole_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = ListenerConfig {
            address: "tcp://127.0.0.1:0".into(),
            api_addresses: vec![format!("unix:{}", dir.path().join("api.sock").display())],
            max_connections: 8,
        };
        let set = bind_listeners(&config).unwrap();
        assert!(set.ingestion.local_tcp_addr().is_some());
        assert_eq!(set.admin.len(), 1);
        assert_eq!(set.unix_paths(), vec![dir.path().join("api.sock")]);

        let broken = ListenerConfig {
            address: "tcp://127.0.0.1:0".into(),
            api_addresses: vec![format!("unix:{}", dir.path().join("missing/api.sock").display())],
            max_connections: 8,
        };
        let err = bind_listeners(&broken).unwrap_err();
        assert!(matches!(err, AgentError::Bind { .. }));
    }

    #[tokio::test]
    async fn accept_holds_permit() {
        let socket = BoundSocket::bind(&"tcp://127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_tcp_addr().unwrap();
        let listener = socket.into_listener(2).unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (accepted, permit) = listener.accept().await.unwrap();
        assert!(matches!(accepted, Accepted::Tcp(..)));
        assert_eq!(listener.available_permits(), 1);

        drop(permit);
        assert_eq!(listener.available_permits(), listener.max_connections());
    }
}
