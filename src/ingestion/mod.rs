//! Ingestion service: accepts telemetry clients on the pre-bound socket.
//!
//! # Data Flow
//! ```text
//! Listener::accept (connection limit)
//!     → session.rs (handshake, authenticate, commands)
//!     → state.rs (counters, bounded upstream buffer)
//! ```

pub mod session;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accounts::AccountsDatabase;
use crate::error::AgentError;
use crate::net::{Accepted, BoundSocket, Listener};

pub use session::{run_session, SessionEnd};
pub use state::{BufferedEvent, IngestionSnapshot, IngestionState};

/// Settings the ingestion service is built with.
#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub max_connections: usize,
    pub max_buffered_events: usize,
    pub gateway_cert: Option<PathBuf>,
}

pub struct IngestionService {
    state: Arc<IngestionState>,
    task: JoinHandle<()>,
}

impl IngestionService {
    /// Start accepting on `socket`. Must be called from outside the runtime.
    pub fn start(
        runtime: &Handle,
        socket: BoundSocket,
        accounts: Arc<AccountsDatabase>,
        options: IngestionOptions,
    ) -> Result<Self, AgentError> {
        let address = socket.address().to_string();
        let listener = {
            let _guard = runtime.enter();
            socket
                .into_listener(options.max_connections)
                .map_err(|e| AgentError::io(format!("cannot register ingestion socket {address}"), e))?
        };
        let state = Arc::new(IngestionState::new(
            address.clone(),
            options.gateway_cert,
            options.max_buffered_events,
        ));

        let task = runtime.spawn(accept_loop(listener, accounts, Arc::clone(&state)));
        info!(address = %address, "Ingestion service listening");
        Ok(Self { state, task })
    }

    pub fn state(&self) -> Arc<IngestionState> {
        Arc::clone(&self.state)
    }

    pub fn snapshot(&self) -> IngestionSnapshot {
        self.state.snapshot()
    }
}

impl Drop for IngestionService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: Listener, accounts: Arc<AccountsDatabase>, state: Arc<IngestionState>) {
    loop {
        let (accepted, permit) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(address = %listener.address(), error = %e, "Ingestion accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let peer = accepted.peer();
        let accounts = Arc::clone(&accounts);
        let state = Arc::clone(&state);
        let guard = state.tracker().track();

        tokio::spawn(async move {
            let _permit = permit;
            let result = match accepted {
                Accepted::Tcp(mut stream, _) => run_session(&mut stream, &accounts, &state).await,
                Accepted::Unix(mut stream) => run_session(&mut stream, &accounts, &state).await,
            };
            match result {
                Ok(end) => debug!(connection_id = %guard.id(), peer = %peer, ?end, "Ingestion session ended"),
                Err(e) => debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Ingestion session failed"),
            }
        });
    }
}
