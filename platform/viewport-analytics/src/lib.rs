//! # Viewport Analytics
//!
//! Storefront telemetry pipeline driven by product cards entering the viewport.
//!
//! ## Flow
//!
//! 1. A renderer registers each product card with [`AnalyticsService::add_tracking`],
//!    which caches the product's attributes and hands the element to the host's
//!    viewport observer.
//! 2. The host reports visibility changes in batches through
//!    [`AnalyticsService::handle_intersections`].
//! 3. Every card that became visible gets its secret key resolved concurrently,
//!    and a `viewCard` / `viewCardPromo` event is dispatched without waiting for
//!    delivery.
//!
//! Route, add-to-cart and purchase events skip the visibility path and go
//! straight to the [`EventDispatcher`].
//!
//! Nothing happens until the [`Gate`] is activated. Delivery is best-effort:
//! failures are logged and counted, never retried.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use viewport_analytics::{AnalyticsConfig, AnalyticsService, Element};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AnalyticsConfig::from_env()?;
//! let analytics = AnalyticsService::from_config(&config)?;
//! analytics.activate();
//!
//! analytics.route("/catalog");
//!
//! let card = Element::new(1, Some("42".to_string()));
//! analytics.add_tracking(Some(&card), json!({"id": 42, "name": "Kettle"}));
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatcher;
mod envelope;
mod gate;
mod metrics;
mod product;
mod secret;
mod service;
mod tracking;
mod transport;
mod visibility;

pub use config::{AnalyticsConfig, TransportKind};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use envelope::{EventEnvelope, EventType, OrderLine};
pub use gate::Gate;
pub use metrics::Metrics;
pub use product::Product;
pub use secret::{HttpSecretResolver, MemoizedSecretResolver, SecretResolver};
pub use service::AnalyticsService;
pub use tracking::{Element, ElementId, NoopObserver, TrackingRegistry, ViewportObserver};
pub use transport::{EventTransport, HttpTransport, InMemoryTransport};
pub use visibility::{BatchReport, IntersectionEntry, VisibilityDetector};

/// Errors raised inside the pipeline.
///
/// None of these reach callers of the public tracking/dispatch operations; they
/// are logged at the task that hit them and the affected event is dropped.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("no cached metadata for product {0:?}")]
    MissingMetadata(Option<String>),

    #[error("secret lookup failed for product {product_id}: {reason}")]
    SecretLookup { product_id: String, reason: String },

    #[error("secret lookup timed out for product {0}")]
    LookupTimeout(String),

    #[error("event delivery failed: {0}")]
    Delivery(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for pipeline operations
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
