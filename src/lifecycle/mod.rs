//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Privileged bootstrap → Bind listeners → Drop privilege → Services
//!
//! Signals (signals.rs):
//!     handler counts deliveries → listener drains counts
//!     SIGINT/SIGTERM → one Terminate event per delivery
//!     SIGQUIT → StatusDump event
//!
//! Coordination (shutdown.rs):
//!     events → escalation.rs → "exit requested" (notification.rs)
//!     → admin shutdown → "all clients disconnected" → teardown
//!
//! Supervisor (feedback.rs):
//!     feedback descriptor readable → kill process group, exit 2
//! ```
//!
//! # Design Decisions
//! - Ordered startup: nothing binds after the privilege drop
//! - Graceful shutdown has no timeout; repeated signals force it instead
//! - Signal handlers only post events; the coordinator owns all state

pub mod escalation;
pub mod feedback;
pub mod notification;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use escalation::{Escalation, ShutdownEscalator, ShutdownState, FORCE_THRESHOLD};
pub use feedback::FeedbackChannel;
pub use notification::{notification, Notifier, Waiter};
pub use shutdown::{
    write_status_report, Coordinator, DiagnosticDump, ForcedExit, ProcessTerminator, ShutdownOutcome,
    ShutdownTarget, Terminator, EXIT_FAILURE, EXIT_FORCED, EXIT_SUCCESS,
};
pub use signals::{event_channel, install_signal_handlers, ExitRequester, LifecycleEvent, SignalCounters};
pub use startup::{start, start_with, AgentRuntime};
