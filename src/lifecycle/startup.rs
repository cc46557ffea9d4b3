//! Startup sequence and the assembled agent.
//!
//! ```text
//! bootstrap_privileged → bind_listeners → drop_privilege
//!     → background runtime → signal handlers
//!     → ingestion service → admin service
//!     → coordinator → report initialized
//! ```
//!
//! Teardown stops the background runtime from a blocking task while a
//! short-lived runtime keeps delivering signals to the coordinator, so
//! repeated signals still force the exit.
//!
//! Initialization is all-or-nothing: the first error is returned and
//! everything built so far is dropped.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accounts::{AccountsDatabase, Secret};
use crate::admin::{AdminHandle, AdminService, AdminState};
use crate::bootstrap::{bootstrap_privileged, drop_privilege, IdentitySwitch, PrivilegedState, SystemIdentity};
use crate::config::RouterConfig;
use crate::error::AgentError;
use crate::ingestion::{IngestionOptions, IngestionService, IngestionSnapshot};
use crate::lifecycle::feedback::FeedbackChannel;
use crate::lifecycle::notification::notification;
use crate::lifecycle::shutdown::{
    Coordinator, DiagnosticDump, ProcessTerminator, ShutdownOutcome, Terminator,
};
use crate::lifecycle::signals::{event_channel, install_signal_handlers, EventSender, ExitRequester, SignalCounters};
use crate::net::{bind_listeners, ListeningSocketSet};

/// How long teardown waits for background tasks to finish.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Start with the real identity switch and process terminator.
pub fn start(config: &RouterConfig) -> Result<AgentRuntime<ProcessTerminator>, AgentError> {
    start_with(config, &SystemIdentity, ProcessTerminator)
}

/// Run the privileged phase, drop privilege, then assemble the services.
pub fn start_with<T: Terminator>(
    config: &RouterConfig,
    identity: &dyn IdentitySwitch,
    terminator: T,
) -> Result<AgentRuntime<T>, AgentError> {
    info!("Starting UstRouter...");

    let privileged = bootstrap_privileged(config)?;
    let sockets = bind_listeners(&config.listener)?;
    drop_privilege(identity, &config.privilege)?;

    AgentRuntime::assemble(config, privileged, sockets, terminator)
}

/// The running agent. Constructed once by [`start`].
pub struct AgentRuntime<T> {
    runtime: Runtime,
    ingestion: IngestionService,
    admin: AdminHandle,
    coordinator: Coordinator<T>,
    exit: ExitRequester,
    events: EventSender,
    signals: Arc<SignalCounters>,
    signal_task: JoinHandle<()>,
    socket_paths: Vec<PathBuf>,
}

impl<T: Terminator> AgentRuntime<T> {
    fn assemble(
        config: &RouterConfig,
        privileged: PrivilegedState,
        sockets: ListeningSocketSet,
        terminator: T,
    ) -> Result<Self, AgentError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ust-router-bg")
            .enable_all()
            .build()
            .map_err(|e| AgentError::io("cannot create background runtime", e))?;
        let handle = runtime.handle().clone();

        let (events_tx, events_rx) = event_channel();
        let exit = ExitRequester::new(events_tx.clone());
        let signals = SignalCounters::register().map_err(|e| AgentError::io("cannot install signal handlers", e))?;
        let signal_task = install_signal_handlers(&handle, Arc::clone(&signals), events_tx.clone())
            .map_err(|e| AgentError::io("cannot install signal handlers", e))?;

        let socket_paths = sockets.unix_paths();
        let ListeningSocketSet {
            ingestion: ingestion_socket,
            admin: admin_sockets,
        } = sockets;
        let PrivilegedState {
            password,
            api_accounts,
            resources,
        } = privileged;

        let ingestion = IngestionService::start(
            &handle,
            ingestion_socket,
            Arc::new(AccountsDatabase::for_ingestion(password)),
            IngestionOptions {
                max_connections: config.listener.max_connections,
                max_buffered_events: config.ingestion.max_buffered_events,
                gateway_cert: resources.gateway_cert(config.gateway.cert.as_deref()),
            },
        )?;

        let (completion, clients_disconnected) = notification("all clients disconnected");
        let admin = AdminService::start(
            &handle,
            admin_sockets,
            config.listener.max_connections,
            AdminState {
                api_accounts: Arc::new(api_accounts),
                ingestion: ingestion.state(),
                instance_dir: config.instance_dir.clone(),
                fd_passing_password: config
                    .supervisor
                    .fd_passing_password
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(Secret::new),
                exit: exit.clone(),
            },
            completion,
        )?;

        let feedback = match config.supervisor.feedback_fd {
            Some(fd) => {
                let _guard = handle.enter();
                Some(
                    FeedbackChannel::from_inherited(fd)
                        .map_err(|e| AgentError::io(format!("cannot use feedback descriptor {fd}"), e))?,
                )
            }
            None => None,
        };

        let status: Arc<dyn DiagnosticDump + Send + Sync> = ingestion.state();
        let coordinator = Coordinator::new(events_rx, clients_disconnected, status, terminator).with_feedback(feedback);

        Ok(Self {
            runtime,
            ingestion,
            admin,
            coordinator,
            exit,
            events: events_tx,
            signals,
            signal_task,
            socket_paths,
        })
    }

    /// Handle for requesting a graceful exit, as the admin API does.
    pub fn exit_requester(&self) -> ExitRequester {
        self.exit.clone()
    }

    pub fn ingestion_snapshot(&self) -> IngestionSnapshot {
        self.ingestion.snapshot()
    }

    /// Report initialization, wait for exit and tear down.
    ///
    /// Blocks the calling thread. Returns after graceful teardown; a forced
    /// exit through [`ProcessTerminator`] never returns.
    pub fn run(mut self) -> Result<ShutdownOutcome, AgentError> {
        self.report_initialized();

        let outcome = {
            let Self {
                runtime,
                admin,
                coordinator,
                ..
            } = &mut self;
            runtime.block_on(coordinator.wait_for_exit(&*admin))?
        };

        if outcome != ShutdownOutcome::Graceful {
            return Ok(outcome);
        }
        self.teardown()
    }

    fn report_initialized(&self) {
        info!("UstRouter online, PID {}", std::process::id());
        if let Some(feedback) = self.coordinator.feedback() {
            if let Err(e) = feedback.report_initialized() {
                warn!(error = %e, "Cannot report initialization to supervisor");
            }
        }
    }

    fn teardown(self) -> Result<ShutdownOutcome, AgentError> {
        debug!("Shutting down UstRouter...");
        let Self {
            runtime,
            ingestion,
            admin,
            mut coordinator,
            events,
            signals,
            signal_task,
            socket_paths,
            ..
        } = self;

        drop(ingestion);
        let finisher = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AgentError::io("cannot create teardown runtime", e))?;
        let listener = install_signal_handlers(finisher.handle(), signals, events)
            .map_err(|e| AgentError::io("cannot install signal handlers", e))?;
        signal_task.abort();

        let outcome = finisher.block_on(async {
            let stopped = tokio::task::spawn_blocking(move || {
                runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
            });
            coordinator
                .wait_for_teardown(async {
                    if let Err(e) = stopped.await {
                        warn!(error = %e, "Background runtime shutdown failed");
                    }
                })
                .await
        });
        listener.abort();
        drop(admin);
        if outcome != ShutdownOutcome::Graceful {
            return Ok(outcome);
        }

        for path in socket_paths {
            if let Err(e) = fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "Cannot remove socket file");
            }
        }
        info!("UstRouter shutdown finished");
        Ok(outcome)
    }
}
