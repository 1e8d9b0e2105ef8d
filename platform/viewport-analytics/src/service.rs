//! Storefront-facing analytics facade

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{AnalyticsConfig, TransportKind};
use crate::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::envelope::OrderLine;
use crate::gate::Gate;
use crate::metrics::Metrics;
use crate::product::Product;
use crate::secret::{HttpSecretResolver, MemoizedSecretResolver, SecretResolver};
use crate::tracking::{Element, NoopObserver, TrackingRegistry, ViewportObserver};
use crate::transport::{EventTransport, HttpTransport, InMemoryTransport};
use crate::visibility::{BatchReport, IntersectionEntry, VisibilityDetector};
use crate::AnalyticsResult;

/// The analytics service the storefront boots once and shares.
///
/// Every operation is a silent no-op until [`activate`](Self::activate) has
/// been called. Nothing here returns an error: delivery problems are logged
/// and counted, and never reach the page.
#[derive(Clone)]
pub struct AnalyticsService {
    gate: Gate,
    metrics: Metrics,
    registry: TrackingRegistry,
    dispatcher: EventDispatcher,
    resolver: Arc<dyn SecretResolver>,
    lookup_timeout: Option<Duration>,
    detector: VisibilityDetector,
}

impl AnalyticsService {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        resolver: Arc<dyn SecretResolver>,
        observer: Arc<dyn ViewportObserver>,
    ) -> Self {
        let gate = Gate::new();
        let metrics = Metrics::new();
        let registry = TrackingRegistry::new(gate.clone(), observer);
        let dispatcher = EventDispatcher::new(gate.clone(), transport, metrics.clone());
        let detector = VisibilityDetector::new(
            gate.clone(),
            registry.clone(),
            Arc::clone(&resolver),
            dispatcher.clone(),
            metrics.clone(),
        );

        Self {
            gate,
            metrics,
            registry,
            dispatcher,
            resolver,
            lookup_timeout: None,
            detector,
        }
    }

    /// HTTP (or in-memory) transport and HTTP secret lookup per `config`,
    /// without a viewport watcher
    pub fn from_config(config: &AnalyticsConfig) -> AnalyticsResult<Self> {
        Self::from_config_with_observer(config, Arc::new(NoopObserver))
    }

    pub fn from_config_with_observer(
        config: &AnalyticsConfig,
        observer: Arc<dyn ViewportObserver>,
    ) -> AnalyticsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| crate::AnalyticsError::Config(e.to_string()))?;

        let transport: Arc<dyn EventTransport> = match config.transport {
            TransportKind::Http => Arc::new(HttpTransport::with_client(client.clone(), config.event_url())),
            TransportKind::InMemory => Arc::new(InMemoryTransport::new()),
        };

        let http_resolver = HttpSecretResolver::with_client(client, config.secret_url());
        let resolver: Arc<dyn SecretResolver> = if config.memoize_secrets {
            Arc::new(MemoizedSecretResolver::new(http_resolver))
        } else {
            Arc::new(http_resolver)
        };

        tracing::info!(
            event_url = %config.event_url(),
            secret_url = %config.secret_url(),
            transport = ?config.transport,
            memoize_secrets = config.memoize_secrets,
            "Analytics service configured"
        );

        Ok(Self::new(transport, resolver, observer).with_lookup_timeout(config.secret_lookup_timeout))
    }

    /// Report each send's outcome on `outcomes`. Test instrumentation only.
    pub fn with_outcome_hook(mut self, outcomes: mpsc::UnboundedSender<DispatchOutcome>) -> Self {
        self.dispatcher = self.dispatcher.with_outcome_hook(outcomes);
        self.rebuild_detector();
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self.rebuild_detector();
        self
    }

    fn rebuild_detector(&mut self) {
        self.detector = VisibilityDetector::new(
            self.gate.clone(),
            self.registry.clone(),
            Arc::clone(&self.resolver),
            self.dispatcher.clone(),
            self.metrics.clone(),
        )
        .with_lookup_timeout(self.lookup_timeout);
    }

    /// One-way switch; call once at startup
    pub fn activate(&self) {
        self.gate.activate();
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_active()
    }

    pub fn route(&self, url: &str) {
        self.dispatcher.route(url);
    }

    pub fn cart(&self, product: Value) {
        self.dispatcher.cart(Product::from_value(product));
    }

    pub fn order(&self, lines: &[OrderLine]) {
        self.dispatcher.order(lines);
    }

    /// Track `element` as the card of `product`. `None` elements are ignored.
    pub fn add_tracking(&self, element: Option<&Element>, product: Value) {
        self.registry.add_tracking(element, Product::from_value(product));
    }

    /// Forget every tracked product and element; call on navigation
    pub fn add_observer(&self) {
        self.registry.reset();
    }

    /// Intersection callback: feed one batch from the host's viewport watcher
    pub async fn handle_intersections(&self, entries: Vec<IntersectionEntry>) -> BatchReport {
        self.detector.handle_batch(entries).await
    }

    pub fn registry(&self) -> &TrackingRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
