//! Per-model sample window and cached summary
//!
//! Each model owns one [`EntityRecord`]. The record is synchronized on its
//! own, so writers for different models never contend with each other.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::config::MetricsConfig;
use crate::{AggregatedMetrics, PerformanceSample};

/// Errors raised while recomputing a summary
#[derive(Debug)]
pub enum MetricsError {
    /// A writer panicked while holding the sample window
    WindowPoisoned(String),

    /// A writer panicked while holding the cached snapshot
    CachePoisoned(String),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::WindowPoisoned(msg) => write!(f, "sample window poisoned: {}", msg),
            MetricsError::CachePoisoned(msg) => write!(f, "metric snapshot poisoned: {}", msg),
        }
    }
}

impl std::error::Error for MetricsError {}

/// Bounded sample history plus the last computed summary for one model
pub struct EntityRecord {
    capacity: usize,

    /// Insertion-ordered, oldest first
    window: Mutex<VecDeque<PerformanceSample>>,

    /// Every sample ever recorded, independent of eviction
    total: AtomicU64,

    cached: RwLock<Option<AggregatedMetrics>>,

    /// Set when samples arrived after the cached snapshot was computed
    dirty: AtomicBool,

    /// Set while a background recomputation is pending
    scheduled: AtomicBool,
}

impl EntityRecord {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Mutex::new(VecDeque::with_capacity(capacity.clamp(1, 1024))),
            total: AtomicU64::new(0),
            cached: RwLock::new(None),
            dirty: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
        }
    }

    /// Append a sample, evicting the oldest one when full.
    ///
    /// Never fails: a poisoned window is recovered, since every mutation
    /// leaves the deque in a valid state.
    pub fn push(&self, sample: PerformanceSample) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        while window.len() >= self.capacity {
            window.pop_front();
        }
        window.push_back(sample);
        self.total.fetch_add(1, Ordering::SeqCst);
        drop(window);

        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Whether a read has to recompute before answering
    pub fn is_stale(&self) -> bool {
        if self.dirty.load(Ordering::SeqCst) {
            return true;
        }
        match self.cached.read() {
            Ok(cached) => cached.is_none(),
            Err(_) => false,
        }
    }

    pub fn cached(&self) -> Option<AggregatedMetrics> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Claim the pending-recomputation slot. Returns false if already claimed.
    pub fn try_schedule(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release_schedule(&self) {
        self.scheduled.store(false, Ordering::SeqCst);
    }

    /// Recompute the summary from a point-in-time read of the window.
    ///
    /// Returns `Ok(None)` without touching the cache when the window is
    /// empty. On error the previous snapshot stays in place. A snapshot
    /// built from fewer samples never replaces the cached one.
    pub fn recompute(
        &self,
        now: DateTime<Utc>,
        config: &MetricsConfig,
    ) -> Result<Option<AggregatedMetrics>, MetricsError> {
        self.dirty.store(false, Ordering::SeqCst);

        let (samples, total) = {
            let window = self
                .window
                .lock()
                .map_err(|e| MetricsError::WindowPoisoned(e.to_string()))?;
            (window.iter().cloned().collect::<Vec<_>>(), self.total())
        };

        let Some(metrics) = summarize(&samples, total, now, config) else {
            return Ok(None);
        };

        let mut cached = self
            .cached
            .write()
            .map_err(|e| MetricsError::CachePoisoned(e.to_string()))?;

        // A concurrent recomputation that saw more samples already won
        if let Some(current) = cached.as_ref() {
            if current.total_sample_count_ever > metrics.total_sample_count_ever {
                return Ok(Some(current.clone()));
            }
        }
        *cached = Some(metrics.clone());

        Ok(Some(metrics))
    }
}

/// Summarize a window, oldest sample first.
///
/// Only samples newer than `now - recent_window` count; if none qualify,
/// the most recent `fallback_samples` are used regardless of age. Throughput
/// is the mean of per-sample rates, not total units over total time.
pub fn summarize(
    samples: &[PerformanceSample],
    total: u64,
    now: DateTime<Utc>,
    config: &MetricsConfig,
) -> Option<AggregatedMetrics> {
    let last_seen_at = samples.iter().map(|s| s.timestamp).max()?;

    let cutoff = now - config.recent_window();
    let mut subset: Vec<&PerformanceSample> =
        samples.iter().filter(|s| s.timestamp > cutoff).collect();

    if subset.is_empty() {
        let skip = samples.len().saturating_sub(config.fallback_samples);
        subset = samples.iter().skip(skip).collect();
    }

    if subset.is_empty() {
        return None;
    }

    let count = subset.len() as f64;
    let average_latency_ms = subset.iter().map(|s| s.latency_ms()).sum::<f64>() / count;
    let average_units_per_second =
        subset.iter().map(|s| s.units_per_second()).sum::<f64>() / count;

    Some(AggregatedMetrics {
        average_latency_ms,
        average_units_per_second,
        total_sample_count_ever: total,
        last_seen_at,
    })
}
