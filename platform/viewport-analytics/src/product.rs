//! Product attribute bags as handed over by the catalog renderer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::EventType;

/// Attributes of one catalog product.
///
/// The bag is opaque apart from two keys: `id`, which keys the metadata cache,
/// and `log`, the optional promo log that turns a view into a promo view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Product {
    attributes: Map<String, Value>,
}

impl Product {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self { attributes }
    }

    /// Build from any JSON value. Non-object values become an empty bag, which
    /// then has no usable id.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(attributes) => Self { attributes },
            _ => Self::default(),
        }
    }

    /// Cache key for this product: a string `id` as-is, a numeric `id` in its
    /// decimal form. Any other shape has no key.
    pub fn key(&self) -> Option<String> {
        match self.attributes.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Whether the product carries a promo log worth reporting.
    ///
    /// A falsy log (null, false, 0, "") or an empty object counts as absent.
    pub fn has_promo_log(&self) -> bool {
        match self.attributes.get("log") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Object(log)) => !log.is_empty(),
            Some(_) => true,
        }
    }

    /// Event type a view of this product is reported as
    pub fn view_event_type(&self) -> EventType {
        if self.has_promo_log() {
            EventType::ViewCardPromo
        } else {
            EventType::ViewCard
        }
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Payload of a view event: every attribute plus the resolved `secretKey`.
    ///
    /// A `secretKey` the product already carries takes precedence.
    pub fn into_view_payload(self, secret_key: Value) -> Map<String, Value> {
        let mut payload = self.attributes;
        payload.entry("secretKey").or_insert(secret_key);
        payload
    }

    pub fn into_attributes(self) -> Map<String, Value> {
        self.attributes
    }
}

impl From<Map<String, Value>> for Product {
    fn from(attributes: Map<String, Value>) -> Self {
        Self::new(attributes)
    }
}
