//! Shutdown coordination.
//!
//! The [`Coordinator`] is the main wait loop. It runs on the main thread and
//! consumes lifecycle events; it is the only place that moves the escalation
//! counter.
//!
//! ```text
//! phase 1: feedback | events | "exit requested"
//!     → schedule admin shutdown
//! phase 2: feedback | events | "all clients disconnected"
//!     → Graceful
//! teardown: events | background runtime stopped
//!     → Graceful
//! ```

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::getpgrp;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::lifecycle::escalation::{Escalation, ShutdownEscalator};
use crate::lifecycle::feedback::FeedbackChannel;
use crate::lifecycle::notification::{notification, Waiter};
use crate::lifecycle::signals::{EventReceiver, LifecycleEvent};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_FORCED: i32 = 2;

pub const STATUS_BEGIN_MARKER: &str = "---------- Begin UstRouter status ----------";
pub const STATUS_END_MARKER: &str = "---------- End UstRouter status   ----------";

/// Why the process is being terminated without teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedExit {
    /// The supervisor feedback channel fired.
    SupervisorLost,
    /// Too many termination signals.
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    Forced(ForcedExit),
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Graceful => EXIT_SUCCESS,
            ShutdownOutcome::Forced(_) => EXIT_FORCED,
        }
    }
}

/// Immediate process termination.
pub trait Terminator: Send + Sync {
    /// The production implementation does not return.
    fn terminate(&self, reason: ForcedExit);
}

/// Exits the process with [`EXIT_FORCED`]. On supervisor loss the whole
/// process group is killed first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, reason: ForcedExit) {
        if reason == ForcedExit::SupervisorLost {
            if let Err(e) = killpg(getpgrp(), Signal::SIGKILL) {
                warn!(error = %e, "Failed to kill process group");
            }
        }
        std::process::exit(EXIT_FORCED);
    }
}

/// Something that can describe its state for the status dump.
pub trait DiagnosticDump {
    fn dump(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// Write `status` between the status markers.
pub fn write_status_report(out: &mut dyn Write, status: &dyn DiagnosticDump) -> io::Result<()> {
    writeln!(out, "{STATUS_BEGIN_MARKER}")?;
    status.dump(out)?;
    out.flush()?;
    writeln!(out, "{STATUS_END_MARKER}")?;
    out.flush()
}

/// The service whose clients must leave before teardown.
pub trait ShutdownTarget {
    /// Stop accepting and start waiting for clients. Must not block.
    fn schedule_shutdown(&self);
}

enum Wake {
    SupervisorLost,
    Event(LifecycleEvent),
    Notified,
}

pub struct Coordinator<T> {
    events: EventReceiver,
    events_open: bool,
    escalator: ShutdownEscalator,
    exit_requested: Waiter,
    clients_disconnected: Waiter,
    feedback: Option<FeedbackChannel>,
    status: Arc<dyn DiagnosticDump + Send + Sync>,
    terminator: T,
}

impl<T: Terminator> Coordinator<T> {
    /// `clients_disconnected` is the waiting half of the notification the
    /// admin service completes.
    pub fn new(
        events: EventReceiver,
        clients_disconnected: Waiter,
        status: Arc<dyn DiagnosticDump + Send + Sync>,
        terminator: T,
    ) -> Self {
        let (notifier, exit_requested) = notification("exit requested");
        Self {
            events,
            events_open: true,
            escalator: ShutdownEscalator::new(notifier),
            exit_requested,
            clients_disconnected,
            feedback: None,
            status,
            terminator,
        }
    }

    pub fn with_feedback(mut self, feedback: Option<FeedbackChannel>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn feedback(&self) -> Option<&FeedbackChannel> {
        self.feedback.as_ref()
    }

    pub fn escalator(&self) -> &ShutdownEscalator {
        &self.escalator
    }

    /// Block until graceful shutdown may proceed or a forced exit happened.
    pub async fn wait_for_exit(&mut self, target: &dyn ShutdownTarget) -> Result<ShutdownOutcome, AgentError> {
        loop {
            match self.next_wake(Phase::AwaitingExit).await? {
                Wake::SupervisorLost => return Ok(self.force(ForcedExit::SupervisorLost)),
                Wake::Event(event) => {
                    if let Some(outcome) = self.handle_event(event) {
                        return Ok(outcome);
                    }
                }
                Wake::Notified => break,
            }
        }

        info!("Received command to shutdown gracefully. Waiting until all clients have disconnected...");
        target.schedule_shutdown();

        loop {
            match self.next_wake(Phase::AwaitingClients).await? {
                Wake::SupervisorLost => return Ok(self.force(ForcedExit::SupervisorLost)),
                Wake::Event(event) => {
                    if let Some(outcome) = self.handle_event(event) {
                        return Ok(outcome);
                    }
                }
                Wake::Notified => break,
            }
        }

        info!("All clients have now disconnected. Proceeding with graceful shutdown");
        Ok(ShutdownOutcome::Graceful)
    }

    /// Keep handling events until `teardown` completes.
    ///
    /// The feedback channel is not watched here; its registration belongs to
    /// the runtime being torn down.
    pub async fn wait_for_teardown(&mut self, teardown: impl Future<Output = ()>) -> ShutdownOutcome {
        tokio::pin!(teardown);
        loop {
            let Self { events, events_open, .. } = &mut *self;
            let event = tokio::select! {
                biased;
                event = events.recv(), if *events_open => event,
                () = &mut teardown => return ShutdownOutcome::Graceful,
            };
            match event {
                Some(event) => {
                    if let Some(outcome) = self.handle_event(event) {
                        return outcome;
                    }
                }
                None => self.events_open = false,
            }
        }
    }

    async fn next_wake(&mut self, phase: Phase) -> Result<Wake, AgentError> {
        loop {
            let Self {
                events,
                events_open,
                exit_requested,
                clients_disconnected,
                feedback,
                ..
            } = &mut *self;
            let waiter = match phase {
                Phase::AwaitingExit => exit_requested,
                Phase::AwaitingClients => clients_disconnected,
            };
            let supervisor = async {
                match feedback {
                    Some(channel) => channel.closed().await,
                    None => std::future::pending().await,
                }
            };

            let wake = tokio::select! {
                biased;
                res = supervisor => res
                    .map(|()| Some(Wake::SupervisorLost))
                    .map_err(|e| AgentError::io("waiting on the feedback channel", e)),
                event = events.recv(), if *events_open => match event {
                    Some(event) => Ok(Some(Wake::Event(event))),
                    None => {
                        debug!("Lifecycle event channel closed");
                        *events_open = false;
                        Ok(None)
                    }
                },
                res = waiter.wait() => res.map(|()| Some(Wake::Notified)),
            };
            if let Some(wake) = wake? {
                return Ok(wake);
            }
        }
    }

    fn handle_event(&mut self, event: LifecycleEvent) -> Option<ShutdownOutcome> {
        match event {
            LifecycleEvent::Terminate { signal } => {
                debug!(signal, "Termination signal");
                match self.escalator.on_termination_signal() {
                    Escalation::Graceful { .. } => None,
                    Escalation::Forced => Some(self.force(ForcedExit::Escalated)),
                }
            }
            LifecycleEvent::StatusDump => {
                let mut stderr = io::stderr().lock();
                if let Err(e) = write_status_report(&mut stderr, self.status.as_ref()) {
                    warn!(error = %e, "Failed to write status report");
                }
                None
            }
            LifecycleEvent::ShutdownRequested { origin } => {
                self.escalator.request_exit(&origin);
                None
            }
        }
    }

    fn force(&self, reason: ForcedExit) -> ShutdownOutcome {
        if reason == ForcedExit::SupervisorLost {
            warn!("Supervisor has gone away; terminating process group");
        }
        self.terminator.terminate(reason);
        ShutdownOutcome::Forced(reason)
    }
}

#[derive(Clone, Copy)]
enum Phase {
    AwaitingExit,
    AwaitingClients,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::lifecycle::notification::Notifier;
    use crate::lifecycle::signals::{event_channel, EventSender};

    #[derive(Default, Clone)]
    struct RecordingTerminator(Arc<Mutex<Vec<ForcedExit>>>);

    impl Terminator for RecordingTerminator {
        fn terminate(&self, reason: ForcedExit) {
            self.0.lock().unwrap().push(reason);
        }
    }

    struct StaticDump;

    impl DiagnosticDump for StaticDump {
        fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
            writeln!(out, "events: 0")
        }
    }

    /// Completes its notifier as soon as shutdown is scheduled.
    struct FakeAdmin {
        scheduled: AtomicUsize,
        completion: Option<Notifier>,
    }

    impl ShutdownTarget for FakeAdmin {
        fn schedule_shutdown(&self) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
            if let Some(completion) = &self.completion {
                completion.notify();
            }
        }
    }

    struct Harness {
        events: EventSender,
        coordinator: Coordinator<RecordingTerminator>,
        terminator: RecordingTerminator,
        admin: FakeAdmin,
    }

    fn harness() -> Harness {
        let (events, rx) = event_channel();
        let (completion, disconnected) = notification("all clients disconnected");
        let terminator = RecordingTerminator::default();
        Harness {
            events,
            coordinator: Coordinator::new(rx, disconnected, Arc::new(StaticDump), terminator.clone()),
            terminator,
            admin: FakeAdmin {
                scheduled: AtomicUsize::new(0),
                completion: Some(completion),
            },
        }
    }

    fn terminate() -> LifecycleEvent {
        LifecycleEvent::Terminate { signal: "SIGINT" }
    }

    #[tokio::test]
    async fn one_signal_shuts_down_gracefully() {
        let mut h = harness();
        h.events.send(terminate()).unwrap();

        let outcome = h.coordinator.wait_for_exit(&h.admin).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert_eq!(outcome.exit_code(), EXIT_SUCCESS);
        assert_eq!(h.admin.scheduled.load(Ordering::SeqCst), 1);
        assert!(h.terminator.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn third_signal_forces_exit() {
        let mut h = harness();
        // Clients never leave.
        h.admin.completion = None;
        for _ in 0..3 {
            h.events.send(terminate()).unwrap();
        }

        let outcome = h.coordinator.wait_for_exit(&h.admin).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Forced(ForcedExit::Escalated));
        assert_eq!(outcome.exit_code(), EXIT_FORCED);
        assert_eq!(*h.terminator.0.lock().unwrap(), vec![ForcedExit::Escalated]);
    }

    #[tokio::test]
    async fn disconnect_without_exit_request_does_not_finish() {
        let (events, rx) = event_channel();
        let (completion, disconnected) = notification("all clients disconnected");
        let mut coordinator = Coordinator::new(rx, disconnected, Arc::new(StaticDump), RecordingTerminator::default());
        let admin = FakeAdmin {
            scheduled: AtomicUsize::new(0),
            completion: None,
        };

        completion.notify();
        let pending = tokio::time::timeout(Duration::from_millis(50), coordinator.wait_for_exit(&admin)).await;
        assert!(pending.is_err());
        assert_eq!(admin.scheduled.load(Ordering::SeqCst), 0);

        events
            .send(LifecycleEvent::ShutdownRequested {
                origin: "admin api".into(),
            })
            .unwrap();
        let outcome = coordinator.wait_for_exit(&admin).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Graceful);
    }

    #[tokio::test]
    async fn api_request_does_not_count_as_signal() {
        let mut h = harness();
        h.events
            .send(LifecycleEvent::ShutdownRequested {
                origin: "admin api".into(),
            })
            .unwrap();

        let outcome = h.coordinator.wait_for_exit(&h.admin).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert_eq!(h.coordinator.escalator().counter().get(), 0);
    }

    #[tokio::test]
    async fn supervisor_loss_forces_exit_while_running() {
        let mut h = harness();
        let (ours, supervisor) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let feedback = FeedbackChannel::new(OwnedFd::from(ours)).unwrap();
        h.coordinator = h.coordinator.with_feedback(Some(feedback));

        drop(supervisor);
        let outcome = tokio::time::timeout(Duration::from_secs(1), h.coordinator.wait_for_exit(&h.admin))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ShutdownOutcome::Forced(ForcedExit::SupervisorLost));
        assert_eq!(*h.terminator.0.lock().unwrap(), vec![ForcedExit::SupervisorLost]);
        assert_eq!(h.admin.scheduled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn supervisor_loss_wins_while_draining() {
        let mut h = harness();
        h.admin.completion = None;
        let (ours, supervisor) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        h.coordinator = h
            .coordinator
            .with_feedback(Some(FeedbackChannel::new(OwnedFd::from(ours)).unwrap()));

        h.events.send(terminate()).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(supervisor);
        });

        let outcome = h.coordinator.wait_for_exit(&h.admin).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Forced(ForcedExit::SupervisorLost));
        assert_eq!(h.admin.scheduled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_dump_keeps_running() {
        let mut h = harness();
        h.events.send(LifecycleEvent::StatusDump).unwrap();
        h.events.send(terminate()).unwrap();

        let outcome = h.coordinator.wait_for_exit(&h.admin).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Graceful);
    }

    #[tokio::test]
    async fn signals_during_teardown_keep_escalating() {
        let mut h = harness();
        h.events.send(terminate()).unwrap();
        assert_eq!(
            h.coordinator.wait_for_exit(&h.admin).await.unwrap(),
            ShutdownOutcome::Graceful
        );

        h.events.send(terminate()).unwrap();
        h.events.send(terminate()).unwrap();
        let outcome = h.coordinator.wait_for_teardown(std::future::pending()).await;
        assert_eq!(outcome, ShutdownOutcome::Forced(ForcedExit::Escalated));
        assert_eq!(*h.terminator.0.lock().unwrap(), vec![ForcedExit::Escalated]);
    }

    #[tokio::test]
    async fn teardown_finishes_when_quiet() {
        let mut h = harness();
        h.events.send(LifecycleEvent::StatusDump).unwrap();
        drop(h.events);

        let outcome = h
            .coordinator
            .wait_for_teardown(tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert!(h.terminator.0.lock().unwrap().is_empty());
    }

    #[test]
    fn status_report_is_framed() {
        let mut out = Vec::new();
        write_status_report(&mut out, &StaticDump).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "---------- Begin UstRouter status ----------\nevents: 0\n---------- End UstRouter status   ----------\n"
        );
    }
}
