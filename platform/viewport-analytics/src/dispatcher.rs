//! Fire-and-forget delivery of analytics envelopes.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::{EventEnvelope, EventType, OrderLine};
use crate::gate::Gate;
use crate::metrics::Metrics;
use crate::product::Product;
use crate::transport::EventTransport;

/// Result of one detached send, reported through the outcome hook
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub event_type: EventType,
    pub result: Result<(), String>,
}

impl DispatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Sends envelopes without making callers wait.
///
/// Each [`dispatch`](Self::dispatch) spawns a detached task that performs one
/// transport call. Failures are logged and counted; callers never see them
/// and nothing is retried.
#[derive(Clone)]
pub struct EventDispatcher {
    gate: Gate,
    transport: Arc<dyn EventTransport>,
    metrics: Metrics,
    outcomes: Option<mpsc::UnboundedSender<DispatchOutcome>>,
}

impl EventDispatcher {
    pub fn new(gate: Gate, transport: Arc<dyn EventTransport>, metrics: Metrics) -> Self {
        Self {
            gate,
            transport,
            metrics,
            outcomes: None,
        }
    }

    /// Report every send's outcome on `outcomes`. Test instrumentation only.
    pub fn with_outcome_hook(mut self, outcomes: mpsc::UnboundedSender<DispatchOutcome>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Send `envelope` in the background. No-op while the gate is inactive.
    pub fn dispatch(&self, envelope: EventEnvelope) {
        if !self.gate.is_active() {
            return;
        }

        let event_type = envelope.event_type();
        let body = match envelope.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "Dropping unserializable analytics event");
                return;
            }
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(event_type = %event_type, "No async runtime; dropping analytics event");
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let metrics = self.metrics.clone();
        let outcomes = self.outcomes.clone();

        handle.spawn(async move {
            let result = transport.send(body).await.map_err(|e| e.to_string());

            match &result {
                Ok(()) => {
                    debug!(event_type = %event_type, "Analytics event delivered");
                    metrics
                        .events_dispatched_total
                        .with_label_values(&[event_type.as_str(), "ok"])
                        .inc();
                }
                Err(e) => {
                    warn!(event_type = %event_type, error = %e, "Analytics event delivery failed");
                    metrics
                        .events_dispatched_total
                        .with_label_values(&[event_type.as_str(), "error"])
                        .inc();
                }
            }

            if let Some(outcomes) = outcomes {
                let _ = outcomes.send(DispatchOutcome { event_type, result });
            }
        });
    }

    /// Navigation event
    pub fn route(&self, url: &str) {
        if self.gate.is_active() {
            self.dispatch(EventEnvelope::route(url));
        }
    }

    /// Add-to-cart event carrying the product's attributes verbatim
    pub fn cart(&self, product: Product) {
        if self.gate.is_active() {
            self.dispatch(EventEnvelope::add_to_cart(product));
        }
    }

    /// Purchase event summarising `lines`
    pub fn order(&self, lines: &[OrderLine]) {
        if !self.gate.is_active() {
            return;
        }

        match EventEnvelope::purchase(lines) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => warn!(error = %e, "Dropping purchase event"),
        }
    }
}
