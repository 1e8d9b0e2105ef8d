//! One-way enable switch shared by every pipeline component.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide analytics switch.
///
/// Starts inactive. [`Gate::activate`] flips it on for good; there is no way
/// back. Clones share the same state, so the gate is built once at startup and
/// handed to the components that need it.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    active: Arc<AtomicBool>,
}

impl Gate {
    /// Create an inactive gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn analytics on. Repeated calls have no further effect.
    pub fn activate(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            tracing::info!("Analytics gate activated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
