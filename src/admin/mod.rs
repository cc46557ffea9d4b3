//! Administrative HTTP service.
//!
//! # Data Flow
//! ```text
//! admin listeners (TCP / unix)
//!     → accept loop (connection limit, tracker)
//!     → hyper auto connection (HTTP/1.1 and HTTP/2)
//!     → request id → trace → auth.rs → handlers.rs
//! ```
//!
//! The service runs as an actor task. The only command it takes is
//! [`AdminCommand::Shutdown`]: stop accepting, wait for every connected
//! client to leave, then fire the completion notifier it was given.

pub mod auth;
pub mod handlers;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderValue, Request},
    middleware,
    routing::{get, post},
    Router,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::accounts::{ApiAccountDatabase, Secret};
use crate::error::AgentError;
use crate::ingestion::IngestionState;
use crate::lifecycle::{ExitRequester, Notifier, ShutdownTarget};
use crate::net::connection::ConnectionTracker;
use crate::net::{Accepted, BoundSocket, Listener};

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State injected into handlers.
#[derive(Clone)]
pub struct AdminState {
    pub api_accounts: Arc<ApiAccountDatabase>,
    pub ingestion: Arc<IngestionState>,
    pub instance_dir: Option<PathBuf>,
    pub fd_passing_password: Option<Secret>,
    pub exit: ExitRequester,
}

/// Sequential `x-request-id` values.
#[derive(Clone, Default)]
struct SequentialRequestId(Arc<AtomicU64>);

impl MakeRequestId for SequentialRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = self.0.fetch_add(1, Ordering::Relaxed) + 1;
        HeaderValue::from_str(&format!("admin-{id}")).ok().map(RequestId::new)
    }
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/ping.json", get(ping))
        .route("/version.json", get(version))
        .route("/server.json", get(server_info))
        .route("/status.txt", get(status_text))
        .route("/shutdown.json", post(shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(SequentialRequestId::default()))
        .with_state(state)
}

#[derive(Debug)]
pub enum AdminCommand {
    Shutdown,
}

pub struct AdminService;

impl AdminService {
    /// Start serving on the pre-bound `sockets`. Must be called from outside
    /// the runtime.
    pub fn start(
        runtime: &Handle,
        sockets: Vec<BoundSocket>,
        max_connections: usize,
        state: AdminState,
        completion: Notifier,
    ) -> Result<AdminHandle, AgentError> {
        let listeners = {
            let _guard = runtime.enter();
            sockets
                .into_iter()
                .map(|socket| {
                    let address = socket.address().to_string();
                    socket
                        .into_listener(max_connections)
                        .map_err(|e| AgentError::io(format!("cannot register admin socket {address}"), e))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        for listener in &listeners {
            info!(address = %listener.address(), "Admin service listening");
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let tracker = ConnectionTracker::new();
        let task = runtime.spawn(run_actor(
            listeners,
            admin_router(state),
            tracker.clone(),
            rx,
            completion,
        ));
        Ok(AdminHandle { commands, tracker, task })
    }
}

/// Handle to the admin actor. Dropping it destroys the service.
pub struct AdminHandle {
    commands: mpsc::UnboundedSender<AdminCommand>,
    tracker: ConnectionTracker,
    task: JoinHandle<()>,
}

impl AdminHandle {
    pub fn active_clients(&self) -> u64 {
        self.tracker.active_count()
    }
}

impl ShutdownTarget for AdminHandle {
    fn schedule_shutdown(&self) {
        if self.commands.send(AdminCommand::Shutdown).is_err() {
            debug!("Admin service already stopped");
        }
    }
}

impl Drop for AdminHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_actor(
    listeners: Vec<Listener>,
    router: Router,
    tracker: ConnectionTracker,
    mut commands: mpsc::UnboundedReceiver<AdminCommand>,
    completion: Notifier,
) {
    let mut accepting = JoinSet::new();
    for listener in listeners {
        accepting.spawn(accept_loop(listener, router.clone(), tracker.clone()));
    }

    while let Some(command) = commands.recv().await {
        match command {
            AdminCommand::Shutdown => {
                accepting.shutdown().await;
                info!(
                    active_clients = tracker.active_count(),
                    "Admin service stopped accepting connections"
                );
                tracker.wait_idle().await;
                completion.notify();
                return;
            }
        }
    }
}

async fn accept_loop(listener: Listener, router: Router, tracker: ConnectionTracker) {
    loop {
        let (accepted, permit) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(address = %listener.address(), error = %e, "Admin accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let guard = tracker.track();
        let router = router.clone();

        tokio::spawn(async move {
            let _permit = permit;
            match accepted {
                Accepted::Tcp(stream, _) => serve_connection(stream, router).await,
                Accepted::Unix(stream) => serve_connection(stream, router).await,
            }
            drop(guard);
        });
    }
}

async fn serve_connection<I>(io: I, router: Router)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let builder = auto::Builder::new(TokioExecutor::new());
    let service = TowerToHyperService::new(router);
    if let Err(e) = builder.serve_connection(TokioIo::new(io), service).await {
        debug!(error = %e, "Admin connection ended with error");
    }
}
