//! Process-wide handler counters
//!
//! Handlers are shared by every connection, so their counters are too.
//! The numbers are for monitoring only and never drive behaviour.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters for one action or event handler.
#[derive(Debug)]
pub struct HandlerStats {
    name: &'static str,
    performed: AtomicU64,
    handled: AtomicU64,
    errors: AtomicU64,
}

impl HandlerStats {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            performed: AtomicU64::new(0),
            handled: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Counts an inbound action invocation.
    pub fn record_performed(&self) {
        self.performed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a session event handled for one connection.
    pub fn record_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn performed(&self) -> u64 {
        self.performed.load(Ordering::Relaxed)
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HandlerSnapshot {
        HandlerSnapshot {
            name: self.name,
            performed: self.performed(),
            handled: self.handled(),
            errors: self.errors(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerSnapshot {
    pub name: &'static str,
    pub performed: u64,
    pub handled: u64,
    pub errors: u64,
}

/// Late game data caused by one session member.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LagSpikes {
    pub small: u64,
    pub big: u64,
}

impl LagSpikes {
    /// Classifies the gap between two frames from the same member. Gaps under
    /// 1.65 frames are on time, under two frames a small spike, anything
    /// longer a big one.
    pub fn record(&mut self, delay: Duration, frame_duration: Duration) {
        if delay < frame_duration.mul_f64(1.65) {
            return;
        }
        if delay < frame_duration * 2 {
            self.small += 1;
        } else {
            self.big += 1;
        }
    }
}

impl fmt::Display for LagSpikes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (small), {} (big)", self.small, self.big)
    }
}

/// Registry owning the counters of every handler.
#[derive(Debug, Default)]
pub struct Stats {
    handlers: Mutex<BTreeMap<&'static str, Arc<HandlerStats>>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters registered under `name`, created on first use.
    pub fn handler(&self, name: &'static str) -> Arc<HandlerStats> {
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            handlers
                .entry(name)
                .or_insert_with(|| Arc::new(HandlerStats::new(name))),
        )
    }

    /// Current counters for all handlers, ordered by name.
    pub fn snapshot(&self) -> Vec<HandlerSnapshot> {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.values().map(|stats| stats.snapshot()).collect()
    }
}
