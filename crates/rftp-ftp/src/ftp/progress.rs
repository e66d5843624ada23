//! Progress observers.
//!
//! Sinks are registered by handle and called synchronously on the transfer
//! worker, once per received chunk. A sink that needs to run somewhere else
//! must hand the value over itself.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Receives the fraction of the file that is on disk, in `[0.0, 1.0]`.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, fraction: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn on_progress(&self, fraction: f64) {
        self(fraction)
    }
}

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Shared, identity-keyed set of sinks.
#[derive(Clone, Default)]
pub struct ProgressSinks {
    inner: Arc<Mutex<Vec<(SinkId, Arc<dyn ProgressSink>)>>>,
    next_id: Arc<AtomicU64>,
}

impl ProgressSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sink: Arc<dyn ProgressSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut sinks) = self.inner.lock() {
            sinks.push((id, sink));
        }
        id
    }

    /// Returns whether a sink was registered under `id`.
    pub fn remove(&self, id: SinkId) -> bool {
        match self.inner.lock() {
            Ok(mut sinks) => {
                let before = sinks.len();
                sinks.retain(|(sid, _)| *sid != id);
                sinks.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every sink with `fraction`. The lock is not held while sinks run,
    /// so a sink may add or remove sinks.
    pub fn notify(&self, fraction: f64) {
        let snapshot: Vec<Arc<dyn ProgressSink>> = match self.inner.lock() {
            Ok(sinks) => sinks.iter().map(|(_, s)| Arc::clone(s)).collect(),
            Err(_) => return,
        };
        for sink in snapshot {
            sink.on_progress(fraction);
        }
    }
}

/// `written / total`, clamped to `[0.0, 1.0]`; an empty file is complete.
pub fn fraction(written: u64, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (written as f64 / total as f64).clamp(0.0, 1.0)
}

/// Keeps the latest progress as a whole percentage, for polling UIs.
#[derive(Debug, Default)]
pub struct PercentTracker {
    percent: AtomicU32,
}

impl PercentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn percent(&self) -> u32 {
        self.percent.load(Ordering::Relaxed)
    }
}

impl ProgressSink for PercentTracker {
    fn on_progress(&self, fraction: f64) {
        self.percent
            .store((fraction * 100.0).floor() as u32, Ordering::Relaxed);
    }
}
