//! OS signal handling.
//!
//! # Responsibilities
//! - Count SIGINT, SIGTERM and SIGQUIT deliveries in signal context
//! - Translate every delivery into a [`LifecycleEvent`] on a channel
//! - Carry admin API shutdown requests on the same channel
//!
//! # Design Decisions
//! - Tokio's signal streams coalesce deliveries that arrive before the
//!   listener is polled, so they are used only as wakeups; the counts come
//!   from [`SignalCounters`]
//! - All state changes happen on the consuming side (the coordination loop)

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::SigId;
use tokio::runtime::Handle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Something the coordination loop must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// SIGINT or SIGTERM.
    Terminate { signal: &'static str },
    /// SIGQUIT: print the ingestion status dump.
    StatusDump,
    /// Exit requested through the admin API.
    ShutdownRequested { origin: String },
}

pub type EventSender = mpsc::UnboundedSender<LifecycleEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<LifecycleEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Handle given to the admin service for requesting a graceful exit.
#[derive(Debug, Clone)]
pub struct ExitRequester {
    tx: EventSender,
}

impl ExitRequester {
    pub fn new(tx: EventSender) -> Self {
        Self { tx }
    }

    /// Returns false if the coordination loop is gone.
    pub fn request(&self, origin: impl Into<String>) -> bool {
        self.tx
            .send(LifecycleEvent::ShutdownRequested { origin: origin.into() })
            .is_ok()
    }
}

/// Deliveries of one signal not yet turned into events.
#[derive(Debug)]
struct Delivery {
    id: SigId,
    pending: Arc<AtomicUsize>,
}

impl Delivery {
    fn register(signal: i32) -> io::Result<Self> {
        let pending = Arc::new(AtomicUsize::new(0));
        let in_handler = Arc::clone(&pending);
        // SAFETY: the action is a single atomic increment, which is
        // async-signal-safe.
        let id = unsafe {
            signal_hook::low_level::register(signal, move || {
                in_handler.fetch_add(1, Ordering::SeqCst);
            })?
        };
        Ok(Self { id, pending })
    }

    fn take(&self) -> usize {
        self.pending.swap(0, Ordering::SeqCst)
    }
}

/// Per-signal delivery counts, incremented by the signal handler itself.
///
/// Must be registered before the Tokio listeners so the count is in place
/// by the time a listener wakes. Any number of listeners may share one set;
/// every delivery is taken exactly once.
#[derive(Debug)]
pub struct SignalCounters {
    interrupt: Delivery,
    terminate: Delivery,
    quit: Delivery,
}

impl SignalCounters {
    pub fn register() -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            interrupt: Delivery::register(SIGINT)?,
            terminate: Delivery::register(SIGTERM)?,
            quit: Delivery::register(SIGQUIT)?,
        }))
    }

    /// Take all pending deliveries as events.
    fn take_events(&self) -> Vec<LifecycleEvent> {
        events_for(self.interrupt.take(), self.terminate.take(), self.quit.take())
    }
}

fn events_for(interrupts: usize, terminates: usize, quits: usize) -> Vec<LifecycleEvent> {
    let mut events = Vec::with_capacity(interrupts + terminates + quits);
    events.extend((0..interrupts).map(|_| LifecycleEvent::Terminate { signal: "SIGINT" }));
    events.extend((0..terminates).map(|_| LifecycleEvent::Terminate { signal: "SIGTERM" }));
    events.extend((0..quits).map(|_| LifecycleEvent::StatusDump));
    events
}

impl Drop for SignalCounters {
    fn drop(&mut self) {
        for delivery in [&self.interrupt, &self.terminate, &self.quit] {
            signal_hook::low_level::unregister(delivery.id);
        }
    }
}

/// Spawn a listener on `runtime` that forwards counted signals to `tx`.
///
/// Registration completes before this returns, so signals delivered
/// afterwards are never lost to the default disposition.
pub fn install_signal_handlers(
    runtime: &Handle,
    counters: Arc<SignalCounters>,
    tx: EventSender,
) -> io::Result<JoinHandle<()>> {
    let _guard = runtime.enter();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    Ok(runtime.spawn(async move {
        loop {
            tokio::select! {
                Some(()) = sigint.recv() => {}
                Some(()) = sigterm.recv() => {}
                Some(()) = sigquit.recv() => {}
                else => break,
            }
            if counters.take_events().into_iter().any(|event| tx.send(event).is_err()) {
                break;
            }
        }
        tracing::debug!("Signal listener stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nix::sys::signal::{raise, Signal};

    #[tokio::test]
    async fn exit_requester_posts_event() {
        let (tx, mut rx) = event_channel();
        let requester = ExitRequester::new(tx);

        assert!(requester.request("admin api"));
        assert_eq!(
            rx.recv().await,
            Some(LifecycleEvent::ShutdownRequested {
                origin: "admin api".into()
            })
        );

        drop(rx);
        assert!(!requester.request("admin api"));
    }

    #[test]
    fn every_delivery_becomes_an_event() {
        assert_eq!(
            events_for(2, 1, 1),
            vec![
                LifecycleEvent::Terminate { signal: "SIGINT" },
                LifecycleEvent::Terminate { signal: "SIGINT" },
                LifecycleEvent::Terminate { signal: "SIGTERM" },
                LifecycleEvent::StatusDump,
            ]
        );
        assert!(events_for(0, 0, 0).is_empty());
    }

    #[tokio::test]
    async fn back_to_back_signals_are_not_coalesced() {
        let counters = SignalCounters::register().unwrap();
        let (tx, mut rx) = event_channel();
        let listener = install_signal_handlers(&Handle::current(), counters, tx).unwrap();

        // The listener cannot run between these on a current-thread runtime.
        for _ in 0..3 {
            raise(Signal::SIGTERM).unwrap();
        }

        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap();
            assert_eq!(event, Some(LifecycleEvent::Terminate { signal: "SIGTERM" }));
        }
        listener.abort();
    }
}
