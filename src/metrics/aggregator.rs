//! MetricAggregator - concurrent per-model performance summaries
//!
//! ## Message Flow
//!
//! ```text
//! record_sample → window push (FIFO) → dirty flag ─┬→ get_metrics recomputes on read
//!                                                  └→ debounced task recomputes → MetricsUpdate
//! ```
//!
//! Writers never block on recomputation. At most one background
//! recomputation is pending per model at any time, so a burst of samples
//! produces a single `MetricsUpdate` per debounce interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{error, instrument, trace};

use crate::config::MetricsConfig;
use crate::{AggregatedMetrics, PerformanceSample};

use super::MetricsUpdate;
use super::window::EntityRecord;

/// Shared metric store
///
/// Cheap to clone; all clones see the same state.
#[derive(Clone)]
pub struct MetricAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    entities: DashMap<String, Arc<EntityRecord>>,
    config: MetricsConfig,
    update_tx: broadcast::Sender<MetricsUpdate>,
}

impl MetricAggregator {
    pub fn new(config: MetricsConfig) -> Self {
        let (update_tx, _) = broadcast::channel(256);
        Self::with_sender(config, update_tx)
    }

    /// Create an aggregator publishing recomputed summaries on `update_tx`
    pub fn with_sender(config: MetricsConfig, update_tx: broadcast::Sender<MetricsUpdate>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entities: DashMap::new(),
                config,
                update_tx,
            }),
        }
    }

    /// Subscribe to background recomputation results
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsUpdate> {
        self.inner.update_tx.subscribe()
    }

    /// Record a completed request for `entity_id`, stamped now
    pub fn record_sample(&self, entity_id: &str, latency: Duration, unit_count: i64) {
        self.record_sample_at(entity_id, Utc::now(), latency, unit_count);
    }

    /// Record a completed request with an explicit completion time
    ///
    /// Inputs are stored as given; zero latencies and negative counts are
    /// not rejected.
    pub fn record_sample_at(
        &self,
        entity_id: &str,
        timestamp: DateTime<Utc>,
        latency: Duration,
        unit_count: i64,
    ) {
        let record = self.record_for(entity_id);
        record.push(PerformanceSample::new(
            entity_id, timestamp, latency, unit_count,
        ));

        trace!(entity = entity_id, "recorded sample");

        self.schedule_recompute(entity_id, record);
    }

    /// Current summary for `entity_id`, or `None` if it never recorded a sample
    ///
    /// Recomputes synchronously when no snapshot exists yet or new samples
    /// arrived since the last one.
    pub fn get_metrics(&self, entity_id: &str) -> Option<AggregatedMetrics> {
        let record = self.inner.entities.get(entity_id)?.value().clone();
        self.read_through(entity_id, &record)
    }

    /// Summaries for every model with a computable one
    pub fn get_all_metrics(&self) -> HashMap<String, AggregatedMetrics> {
        self.records()
            .into_iter()
            .filter_map(|(id, record)| {
                let metrics = self.read_through(&id, &record)?;
                Some((id, metrics))
            })
            .collect()
    }

    /// Identifiers of every model that recorded at least one sample
    pub fn entity_ids(&self) -> Vec<String> {
        self.inner
            .entities
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of samples currently held in the window for `entity_id`
    pub fn window_len(&self, entity_id: &str) -> usize {
        self.inner
            .entities
            .get(entity_id)
            .map(|record| record.len())
            .unwrap_or(0)
    }

    /// Number of samples ever recorded for `entity_id`
    pub fn total_samples(&self, entity_id: &str) -> u64 {
        self.inner
            .entities
            .get(entity_id)
            .map(|record| record.total())
            .unwrap_or(0)
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.inner.config
    }

    fn record_for(&self, entity_id: &str) -> Arc<EntityRecord> {
        if let Some(record) = self.inner.entities.get(entity_id) {
            return record.value().clone();
        }

        // The map guard is dropped before the caller touches the window
        self.inner
            .entities
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(EntityRecord::new(self.inner.config.window_capacity)))
            .value()
            .clone()
    }

    fn records(&self) -> Vec<(String, Arc<EntityRecord>)> {
        self.inner
            .entities
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn read_through(&self, entity_id: &str, record: &EntityRecord) -> Option<AggregatedMetrics> {
        if record.is_stale() {
            self.recompute(entity_id, record);
        }
        record.cached()
    }

    /// Recompute and cache; failures are logged and leave the old snapshot
    fn recompute(&self, entity_id: &str, record: &EntityRecord) -> Option<AggregatedMetrics> {
        match record.recompute(Utc::now(), &self.inner.config) {
            Ok(metrics) => metrics,
            Err(e) => {
                error!(entity = entity_id, "failed to recompute metrics: {e}");
                None
            }
        }
    }

    fn schedule_recompute(&self, entity_id: &str, record: Arc<EntityRecord>) {
        if !record.try_schedule() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime to run on; the next read recomputes instead
            record.release_schedule();
            return;
        };

        let this = self.clone();
        let entity_id = entity_id.to_string();
        runtime.spawn(async move {
            this.debounced_recompute(entity_id, record).await;
        });
    }

    #[instrument(skip(self, record))]
    async fn debounced_recompute(&self, entity_id: String, record: Arc<EntityRecord>) {
        tokio::time::sleep(self.inner.config.debounce()).await;
        record.release_schedule();

        let Some(metrics) = self.recompute(&entity_id, &record) else {
            return;
        };

        let update = MetricsUpdate {
            entity_id,
            metrics,
            timestamp: Utc::now(),
        };

        match self.inner.update_tx.send(update) {
            Ok(num_receivers) => {
                trace!("published metrics update to {num_receivers} receivers");
            }
            Err(_) => {
                trace!("no receivers for metrics update (this is OK)");
            }
        }
    }
}

impl Default for MetricAggregator {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}
