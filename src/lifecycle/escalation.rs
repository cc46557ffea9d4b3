//! Shutdown escalation.
//!
//! ```text
//! RUNNING ──signal──▶ GRACE_1 ──signal──▶ GRACE_2 ──signal──▶ FORCED_EXIT
//!            notify "exit requested"
//! ```
//!
//! The escalator is driven from the coordination loop, never from signal
//! context, so the counter needs no synchronization.

use crate::lifecycle::notification::Notifier;

/// Signals needed to force shutdown.
pub const FORCE_THRESHOLD: u32 = 3;

/// Observable escalation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Grace1,
    Grace2,
    ForcedExit,
}

/// What the caller must do after a termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Keep shutting down gracefully.
    Graceful { remaining: u32 },
    /// Terminate immediately.
    Forced,
}

/// Count of termination signals received. Never decreases.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EscalationCounter(u32);

impl EscalationCounter {
    pub fn increment(&mut self) -> u32 {
        self.0 = self.0.saturating_add(1);
        self.0
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Turns repeated termination signals into graceful or forced shutdown.
///
/// Sole writer of the "exit requested" notification.
#[derive(Debug)]
pub struct ShutdownEscalator {
    counter: EscalationCounter,
    exit_requested: Notifier,
}

impl ShutdownEscalator {
    pub fn new(exit_requested: Notifier) -> Self {
        Self {
            counter: EscalationCounter::default(),
            exit_requested,
        }
    }

    pub fn state(&self) -> ShutdownState {
        match self.counter.get() {
            0 => ShutdownState::Running,
            1 => ShutdownState::Grace1,
            2 => ShutdownState::Grace2,
            _ => ShutdownState::ForcedExit,
        }
    }

    pub fn counter(&self) -> EscalationCounter {
        self.counter
    }

    /// Handle SIGINT/SIGTERM.
    pub fn on_termination_signal(&mut self) -> Escalation {
        let count = self.counter.increment();
        if count < FORCE_THRESHOLD {
            let remaining = FORCE_THRESHOLD - count;
            tracing::info!(
                "Signal received. Gracefully shutting down... (send signal {} more time(s) to force shutdown)",
                remaining
            );
            if count == 1 {
                self.exit_requested.notify();
            }
            Escalation::Graceful { remaining }
        } else {
            tracing::info!("Signal received. Forcing shutdown.");
            Escalation::Forced
        }
    }

    /// Shutdown requested through the admin API. Does not escalate.
    pub fn request_exit(&self, origin: &str) {
        if !self.exit_requested.is_notified() {
            tracing::info!(origin, "Shutdown requested");
        }
        self.exit_requested.notify();
    }
}
