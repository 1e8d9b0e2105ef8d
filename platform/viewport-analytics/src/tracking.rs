//! Tracking registry: product metadata cache plus the observation set.
//!
//! Both live in one [`TrackingState`] behind a single mutex so a reset clears
//! them together. The host observer is called with the lock held, so the
//! host's watch list never drifts from the registry's. The lock is only held
//! for synchronous bookkeeping; observers must not call back into the registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::gate::Gate;
use crate::product::Product;

/// Host-assigned handle of a rendered element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u64);

/// A rendered product card as seen by the pipeline: its handle and the value
/// of its `data-id` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    #[serde(default)]
    pub data_id: Option<String>,
}

impl Element {
    pub fn new(id: u64, data_id: Option<String>) -> Self {
        Self {
            id: ElementId(id),
            data_id,
        }
    }
}

/// The host's viewport-intersection primitive.
///
/// `observe` starts watching one element, `disconnect` stops watching all of
/// them. Visibility changes come back through
/// [`VisibilityDetector::handle_batch`](crate::VisibilityDetector::handle_batch).
pub trait ViewportObserver: Send + Sync {
    fn observe(&self, element: &Element);
    fn disconnect(&self);
}

/// Observer for hosts that feed intersection batches without a watcher
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ViewportObserver for NoopObserver {
    fn observe(&self, _element: &Element) {}
    fn disconnect(&self) {}
}

#[derive(Debug, Default)]
struct TrackingState {
    products: HashMap<String, Product>,
    // Duplicates are kept: registering twice means two notifications.
    observed: Vec<Element>,
}

/// Registers product cards for visibility tracking.
#[derive(Clone)]
pub struct TrackingRegistry {
    gate: Gate,
    state: Arc<Mutex<TrackingState>>,
    observer: Arc<dyn ViewportObserver>,
}

impl TrackingRegistry {
    pub fn new(gate: Gate, observer: Arc<dyn ViewportObserver>) -> Self {
        Self {
            gate,
            state: Arc::new(Mutex::new(TrackingState::default())),
            observer,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cache `product` under its id and start observing `element`.
    ///
    /// No-op while the gate is inactive or when `element` is `None`. A product
    /// without a usable id is a caller bug: it panics in debug builds and is
    /// dropped with a warning otherwise.
    pub fn add_tracking(&self, element: Option<&Element>, product: Product) {
        if !self.gate.is_active() {
            return;
        }
        let Some(element) = element else {
            return;
        };

        let Some(key) = product.key() else {
            debug_assert!(false, "add_tracking called with a product without an id");
            warn!(element = ?element.id, "Ignoring tracked product without an id");
            return;
        };

        {
            let mut state = self.state();
            state.products.insert(key.clone(), product);
            state.observed.push(element.clone());
            self.observer.observe(element);
        }

        debug!(product_id = %key, element = ?element.id, "Tracking product card");
    }

    /// Drop all cached metadata and stop observing every element.
    ///
    /// Called on navigation before the next page registers its cards.
    pub fn reset(&self) {
        if !self.gate.is_active() {
            return;
        }

        let (products, observed) = {
            let mut state = self.state();
            let counts = (state.products.len(), state.observed.len());
            state.products.clear();
            state.observed.clear();
            self.observer.disconnect();
            counts
        };

        debug!(products, observed, "Tracking state reset");
    }

    /// Cached metadata for each key, in order, under one lock acquisition
    pub fn lookup_many<'a, I>(&self, keys: I) -> Vec<Option<Product>>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let state = self.state();
        keys.into_iter()
            .map(|key| key.and_then(|k| state.products.get(k).cloned()))
            .collect()
    }

    pub fn lookup(&self, key: &str) -> Option<Product> {
        self.state().products.get(key).cloned()
    }

    pub fn cached_len(&self) -> usize {
        self.state().products.len()
    }

    /// Elements currently under observation, in registration order
    pub fn observed(&self) -> Vec<Element> {
        self.state().observed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver {
        observed: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl ViewportObserver for CountingObserver {
        fn observe(&self, _element: &Element) {
            self.observed.fetch_add(1, Ordering::SeqCst);
        }

        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn active_registry() -> (TrackingRegistry, Arc<CountingObserver>) {
        let gate = Gate::new();
        gate.activate();
        let observer = Arc::new(CountingObserver::default());
        (TrackingRegistry::new(gate, observer.clone()), observer)
    }

    #[test]
    fn test_inactive_gate_tracks_nothing() {
        let observer = Arc::new(CountingObserver::default());
        let registry = TrackingRegistry::new(Gate::new(), observer.clone());

        registry.add_tracking(Some(&Element::new(1, Some("1".into()))), Product::from_value(json!({"id": 1})));
        registry.reset();

        assert_eq!(registry.cached_len(), 0);
        assert_eq!(observer.observed.load(Ordering::SeqCst), 0);
        assert_eq!(observer.disconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_element_is_ignored() {
        let (registry, observer) = active_registry();

        registry.add_tracking(None, Product::from_value(json!({"id": 1})));

        assert_eq!(registry.cached_len(), 0);
        assert_eq!(observer.observed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_add_tracking_caches_and_observes() {
        let (registry, observer) = active_registry();
        let card = Element::new(1, Some("42".into()));

        registry.add_tracking(Some(&card), Product::from_value(json!({"id": 42, "name": "Kettle"})));

        assert_eq!(registry.lookup("42").unwrap().attributes()["name"], "Kettle");
        assert_eq!(registry.observed(), vec![card]);
        assert_eq!(observer.observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_readding_same_id_replaces_metadata() {
        let (registry, _) = active_registry();

        registry.add_tracking(Some(&Element::new(1, Some("7".into()))), Product::from_value(json!({"id": "7", "v": 1})));
        registry.add_tracking(Some(&Element::new(2, Some("7".into()))), Product::from_value(json!({"id": "7", "v": 2})));

        assert_eq!(registry.cached_len(), 1);
        assert_eq!(registry.lookup("7").unwrap().attributes()["v"], 2);
        assert_eq!(registry.observed().len(), 2);
    }

    #[test]
    fn test_duplicate_registration_is_not_deduplicated() {
        let (registry, observer) = active_registry();
        let card = Element::new(1, Some("7".into()));

        registry.add_tracking(Some(&card), Product::from_value(json!({"id": "7"})));
        registry.add_tracking(Some(&card), Product::from_value(json!({"id": "7"})));

        assert_eq!(registry.observed(), vec![card.clone(), card]);
        assert_eq!(observer.observed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_clears_cache_and_observations() {
        let (registry, observer) = active_registry();
        registry.add_tracking(Some(&Element::new(1, Some("1".into()))), Product::from_value(json!({"id": "1"})));

        registry.reset();

        assert!(registry.lookup("1").is_none());
        assert!(registry.observed().is_empty());
        assert_eq!(observer.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lookup_many_preserves_order() {
        let (registry, _) = active_registry();
        registry.add_tracking(Some(&Element::new(1, Some("1".into()))), Product::from_value(json!({"id": "1"})));

        let found = registry.lookup_many([Some("1"), None, Some("2")]);
        assert!(found[0].is_some());
        assert!(found[1].is_none());
        assert!(found[2].is_none());
    }

    /// Host stand-in that keeps its own watch list and can stall inside `observe`
    struct StallingObserver {
        watching: Mutex<Vec<ElementId>>,
        entered: Mutex<std::sync::mpsc::Sender<()>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl ViewportObserver for StallingObserver {
        fn observe(&self, element: &Element) {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            self.watching.lock().unwrap().push(element.id);
        }

        fn disconnect(&self) {
            self.watching.lock().unwrap().clear();
        }
    }

    #[test]
    fn test_reset_during_observe_keeps_host_in_sync() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let observer = Arc::new(StallingObserver {
            watching: Mutex::new(Vec::new()),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let gate = Gate::new();
        gate.activate();
        let registry = TrackingRegistry::new(gate, observer.clone());

        let tracker = {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.add_tracking(Some(&Element::new(1, Some("1".into()))), Product::from_value(json!({"id": "1"})));
            })
        };
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("observe never called");

        let resetter = {
            let registry = registry.clone();
            thread::spawn(move || registry.reset())
        };
        // Give the reset a chance to race the stalled registration
        thread::sleep(Duration::from_millis(100));
        release_tx.send(()).unwrap();

        tracker.join().unwrap();
        resetter.join().unwrap();

        let host: Vec<ElementId> = observer.watching.lock().unwrap().clone();
        let registered: Vec<ElementId> = registry.observed().iter().map(|e| e.id).collect();
        assert_eq!(host, registered, "host watch list diverged from registry");
        assert!(registered.is_empty());
        assert_eq!(registry.cached_len(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without an id")]
    fn test_product_without_id_panics_in_debug() {
        let (registry, _) = active_registry();
        registry.add_tracking(Some(&Element::new(1, None)), Product::from_value(json!({"name": "no id"})));
    }
}
