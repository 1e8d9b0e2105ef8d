//! Visibility batch handling.
//!
//! The host reports intersection changes in batches. Per batch:
//!
//! 1. one timestamp is taken for the whole batch
//! 2. only entries that became visible are kept
//! 3. their metadata is looked up in the cache (misses are logged and skipped)
//! 4. every hit gets its own task: secret lookup, then a view event dispatch
//! 5. the batch finishes once every task has settled
//!
//! Steps 1-3 run before the first await, so the timestamp and the element set
//! are fixed before any network work starts. Tasks do not wait on each other;
//! one failing lookup never affects the rest of the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::dispatcher::EventDispatcher;
use crate::envelope::EventEnvelope;
use crate::gate::Gate;
use crate::metrics::Metrics;
use crate::product::Product;
use crate::secret::SecretResolver;
use crate::tracking::{Element, TrackingRegistry};
use crate::AnalyticsError;

/// One record of a visibility batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionEntry {
    pub target: Element,
    pub is_intersecting: bool,
}

impl IntersectionEntry {
    pub fn new(target: Element, is_intersecting: bool) -> Self {
        Self {
            target,
            is_intersecting,
        }
    }
}

/// What happened to one batch. Instrumentation only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Entries that became visible
    pub visible: usize,
    /// View events handed to the dispatcher
    pub dispatched: usize,
    pub missing_metadata: usize,
    pub lookup_failed: usize,
    pub timed_out: usize,
}

enum ViewOutcome {
    Dispatched,
    LookupFailed,
    TimedOut,
}

/// Turns visibility batches into view events.
#[derive(Clone)]
pub struct VisibilityDetector {
    gate: Gate,
    registry: TrackingRegistry,
    resolver: Arc<dyn SecretResolver>,
    dispatcher: EventDispatcher,
    metrics: Metrics,
    lookup_timeout: Option<Duration>,
}

impl VisibilityDetector {
    pub fn new(
        gate: Gate,
        registry: TrackingRegistry,
        resolver: Arc<dyn SecretResolver>,
        dispatcher: EventDispatcher,
        metrics: Metrics,
    ) -> Self {
        Self {
            gate,
            registry,
            resolver,
            dispatcher,
            metrics,
            lookup_timeout: None,
        }
    }

    /// Give up on a secret lookup after `timeout`, dropping that one event
    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Process one batch of intersection changes.
    ///
    /// Returns once every view task spawned for the batch has settled.
    pub async fn handle_batch(&self, entries: Vec<IntersectionEntry>) -> BatchReport {
        if !self.gate.is_active() {
            return BatchReport::default();
        }

        let timestamp = Utc::now();

        let visible: Vec<Element> = entries
            .into_iter()
            .filter(|entry| entry.is_intersecting)
            .map(|entry| entry.target)
            .collect();
        let products = self
            .registry
            .lookup_many(visible.iter().map(|element| element.data_id.as_deref()));

        let mut report = BatchReport {
            visible: visible.len(),
            ..BatchReport::default()
        };
        let mut tasks = JoinSet::new();

        for (element, product) in visible.into_iter().zip(products) {
            let (Some(product_id), Some(product)) = (element.data_id.clone(), product) else {
                let err = AnalyticsError::MissingMetadata(element.data_id.clone());
                error!(element = ?element.id, error = %err, "Failed to resolve product metadata");
                self.metrics.missing_metadata_total.inc();
                report.missing_metadata += 1;
                continue;
            };

            tasks.spawn(view_task(
                Arc::clone(&self.resolver),
                self.dispatcher.clone(),
                self.metrics.clone(),
                self.lookup_timeout,
                product_id,
                product,
                timestamp,
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ViewOutcome::Dispatched) => report.dispatched += 1,
                Ok(ViewOutcome::LookupFailed) => report.lookup_failed += 1,
                Ok(ViewOutcome::TimedOut) => report.timed_out += 1,
                Err(e) => {
                    error!(error = %e, "View task aborted");
                    report.lookup_failed += 1;
                }
            }
        }

        debug!(
            visible = report.visible,
            dispatched = report.dispatched,
            missing = report.missing_metadata,
            failed = report.lookup_failed,
            timed_out = report.timed_out,
            "Visibility batch settled"
        );

        report
    }
}

async fn view_task(
    resolver: Arc<dyn SecretResolver>,
    dispatcher: EventDispatcher,
    metrics: Metrics,
    lookup_timeout: Option<Duration>,
    product_id: String,
    product: Product,
    timestamp: DateTime<Utc>,
) -> ViewOutcome {
    let timer = metrics.secret_lookup_duration_seconds.start_timer();
    let lookup = resolver.resolve(&product_id);
    let resolved = match lookup_timeout {
        Some(limit) => match tokio::time::timeout(limit, lookup).await {
            Ok(result) => result,
            Err(_) => Err(AnalyticsError::LookupTimeout(product_id.clone())),
        },
        None => lookup.await,
    };
    timer.observe_duration();

    match resolved {
        Ok(secret_key) => {
            metrics.secret_lookups_total.with_label_values(&["ok"]).inc();
            dispatcher.dispatch(EventEnvelope::view(product, secret_key, timestamp));
            ViewOutcome::Dispatched
        }
        Err(e @ AnalyticsError::LookupTimeout(_)) => {
            warn!(product_id = %product_id, error = %e, "Dropping view event");
            metrics.secret_lookups_total.with_label_values(&["timeout"]).inc();
            ViewOutcome::TimedOut
        }
        Err(e) => {
            warn!(product_id = %product_id, error = %e, "Dropping view event");
            metrics.secret_lookups_total.with_label_values(&["error"]).inc();
            ViewOutcome::LookupFailed
        }
    }
}
