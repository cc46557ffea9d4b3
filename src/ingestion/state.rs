//! Shared ingestion counters and the upstream event buffer.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime};

use dashmap::DashMap;
use serde::Serialize;

use crate::lifecycle::DiagnosticDump;
use crate::net::connection::ConnectionTracker;

/// An event waiting for upstream delivery.
///
/// Forwarding to the upstream gateway is not part of this agent; the
/// buffer only retains the most recent events for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedEvent {
    pub group: String,
    pub category: String,
    pub data: String,
    pub received_at: SystemTime,
}

#[derive(Debug)]
pub struct IngestionState {
    address: String,
    gateway_cert: Option<PathBuf>,
    started_at: Instant,
    tracker: ConnectionTracker,
    events_received: AtomicU64,
    bytes_received: AtomicU64,
    auth_failures: AtomicU64,
    dropped_events: AtomicU64,
    categories: DashMap<String, u64>,
    buffer: Mutex<VecDeque<BufferedEvent>>,
    capacity: usize,
}

impl IngestionState {
    pub fn new(address: impl Into<String>, gateway_cert: Option<PathBuf>, capacity: usize) -> Self {
        Self {
            address: address.into(),
            gateway_cert,
            started_at: Instant::now(),
            tracker: ConnectionTracker::new(),
            events_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            categories: DashMap::new(),
            buffer: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Buffer an event. Returns false if the oldest event had to be dropped.
    pub fn record_event(&self, group: &str, category: &str, data: &str) -> bool {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);
        *self.categories.entry(category.to_string()).or_insert(0) += 1;

        if self.capacity == 0 {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let event = BufferedEvent {
            group: group.to_string(),
            category: category.to_string(),
            data: data.to_string(),
            received_at: SystemTime::now(),
        };
        let mut buffer = self.lock_buffer();
        let mut kept_all = true;
        while buffer.len() >= self.capacity {
            buffer.pop_front();
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            kept_all = false;
        }
        buffer.push_back(event);
        kept_all
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take up to `max` buffered events, oldest first.
    #[cfg(test)]
    pub fn drain(&self, max: usize) -> Vec<BufferedEvent> {
        let mut buffer = self.lock_buffer();
        let n = max.min(buffer.len());
        buffer.drain(..n).collect()
    }

    pub fn snapshot(&self) -> IngestionSnapshot {
        IngestionSnapshot {
            address: self.address.clone(),
            gateway_cert: self.gateway_cert.as_ref().map(|p| p.display().to_string()),
            uptime_secs: self.started_at.elapsed().as_secs(),
            active_clients: self.tracker.active_count(),
            events_received: self.events_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            buffered_events: self.lock_buffer().len(),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            categories: self
                .categories
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<BufferedEvent>> {
        // Counters stay consistent even if a holder panicked.
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DiagnosticDump for IngestionState {
    fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
        self.snapshot().write_text(out)
    }
}

/// Point-in-time view of the ingestion service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestionSnapshot {
    pub address: String,
    pub gateway_cert: Option<String>,
    pub uptime_secs: u64,
    pub active_clients: u64,
    pub events_received: u64,
    pub bytes_received: u64,
    pub auth_failures: u64,
    pub buffered_events: usize,
    pub dropped_events: u64,
    pub categories: BTreeMap<String, u64>,
}

impl IngestionSnapshot {
    pub fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Address          : {}", self.address)?;
        writeln!(
            out,
            "Gateway cert     : {}",
            self.gateway_cert.as_deref().unwrap_or("(none)")
        )?;
        writeln!(out, "Uptime           : {}s", self.uptime_secs)?;
        writeln!(out, "Active clients   : {}", self.active_clients)?;
        writeln!(out, "Events received  : {}", self.events_received)?;
        writeln!(out, "Bytes received   : {}", self.bytes_received)?;
        writeln!(out, "Auth failures    : {}", self.auth_failures)?;
        writeln!(out, "Buffered events  : {}", self.buffered_events)?;
        writeln!(out, "Dropped events   : {}", self.dropped_events)?;
        if !self.categories.is_empty() {
            writeln!(out, "Categories:")?;
            for (category, count) in &self.categories {
                writeln!(out, "  {category}: {count}")?;
            }
        }
        Ok(())
    }
}
