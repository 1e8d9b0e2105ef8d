//! # Event Envelope
//!
//! Wire shape of every analytics event sent to the collection endpoint:
//!
//! ```json
//! {"type": "viewCard", "payload": {"id": "7", "secretKey": "..."}, "timestamp": "2024-01-01T00:00:00.000Z"}
//! ```
//!
//! - `type`: one of [`EventType`]
//! - `payload`: event-specific flat map
//! - `timestamp`: UTC, millisecond precision, `Z` suffix; set when the
//!   triggering fact is known, not when the event goes out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::product::Product;
use crate::{AnalyticsError, AnalyticsResult};

/// Kind of analytics event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Route,
    ViewCard,
    ViewCardPromo,
    AddToCart,
    Purchase,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Route => "route",
            EventType::ViewCard => "viewCard",
            EventType::ViewCardPromo => "viewCardPromo",
            EventType::AddToCart => "addToCart",
            EventType::Purchase => "purchase",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One product line of a checkout.
///
/// Storefront product records call the price `salePriceU`; both names are
/// accepted. Prices are integer minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Value,
    #[serde(alias = "salePriceU")]
    pub price: i64,
}

impl OrderLine {
    pub fn new(id: impl Into<Value>, price: i64) -> Self {
        Self {
            id: id.into(),
            price,
        }
    }
}

/// Immutable analytics event.
///
/// Fields are private; an envelope is built once through one of the
/// constructors and consumed by
/// [`EventDispatcher::dispatch`](crate::EventDispatcher::dispatch), which takes
/// it by value so it cannot be sent twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: EventType,

    payload: Map<String, Value>,

    #[serde(with = "iso_millis")]
    timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, payload: Map<String, Value>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            payload,
            timestamp,
        }
    }

    /// Envelope stamped with the current time
    pub fn now(event_type: EventType, payload: Map<String, Value>) -> Self {
        Self::new(event_type, payload, Utc::now())
    }

    /// Navigation to `url`
    pub fn route(url: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("url".to_string(), Value::String(url.to_string()));
        Self::now(EventType::Route, payload)
    }

    /// Product added to cart; the product's attributes are the payload
    pub fn add_to_cart(product: Product) -> Self {
        Self::now(EventType::AddToCart, product.into_attributes())
    }

    /// Checkout of `lines`.
    ///
    /// Payload: a fresh v4 `orderId`, the stringified price sum as
    /// `totalPrice`, and the JSON-encoded id list as `productIds`.
    pub fn purchase(lines: &[OrderLine]) -> AnalyticsResult<Self> {
        // i128 holds any sum of i64 prices
        let total_price: i128 = lines.iter().map(|line| i128::from(line.price)).sum();
        let product_ids: Vec<&Value> = lines.iter().map(|line| &line.id).collect();
        let product_ids = serde_json::to_string(&product_ids)
            .map_err(|e| AnalyticsError::Serialization(e.to_string()))?;

        let mut payload = Map::new();
        payload.insert("orderId".to_string(), Value::String(Uuid::new_v4().to_string()));
        payload.insert("totalPrice".to_string(), Value::String(total_price.to_string()));
        payload.insert("productIds".to_string(), Value::String(product_ids));

        Ok(Self::now(EventType::Purchase, payload))
    }

    /// Product card became visible at `timestamp` (the batch time)
    pub fn view(product: Product, secret_key: Value, timestamp: DateTime<Utc>) -> Self {
        let event_type = product.view_event_type();
        Self::new(event_type, product.into_view_payload(secret_key), timestamp)
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// JSON body for the collection endpoint
    pub fn to_bytes(&self) -> AnalyticsResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AnalyticsError::Serialization(e.to_string()))
    }
}

/// `2024-01-01T00:00:00.000Z` timestamps
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let envelope = EventEnvelope::new(
            EventType::ViewCardPromo,
            Product::from_value(json!({"id": "7"})).into_attributes(),
            ts,
        );

        let wire: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "viewCardPromo",
                "payload": {"id": "7"},
                "timestamp": "2024-01-01T00:00:00.000Z"
            })
        );

        let back: EventEnvelope = serde_json::from_value(wire).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_route_payload() {
        let envelope = EventEnvelope::route("/catalog?page=2");
        assert_eq!(envelope.event_type(), EventType::Route);
        assert_eq!(envelope.payload().get("url"), Some(&json!("/catalog?page=2")));
    }

    #[test]
    fn test_add_to_cart_keeps_product_verbatim() {
        let product = json!({"id": 3, "name": "Kettle", "salePriceU": 1999});
        let envelope = EventEnvelope::add_to_cart(Product::from_value(product.clone()));

        assert_eq!(envelope.event_type(), EventType::AddToCart);
        assert_eq!(Value::Object(envelope.payload().clone()), product);
    }

    #[test]
    fn test_purchase_aggregation() {
        let lines = vec![OrderLine::new(1, 500), OrderLine::new(2, 1500)];
        let first = EventEnvelope::purchase(&lines).unwrap();
        let second = EventEnvelope::purchase(&lines).unwrap();

        assert_eq!(first.event_type(), EventType::Purchase);
        assert_eq!(first.payload().get("totalPrice"), Some(&json!("2000")));
        assert_eq!(first.payload().get("productIds"), Some(&json!("[1,2]")));

        let order_id = first.payload().get("orderId").and_then(Value::as_str).unwrap();
        assert!(Uuid::parse_str(order_id).is_ok());
        assert_ne!(first.payload().get("orderId"), second.payload().get("orderId"));
    }

    #[test]
    fn test_purchase_total_beyond_i64_range() {
        let lines = vec![OrderLine::new(1, i64::MAX), OrderLine::new(2, i64::MAX)];
        let envelope = EventEnvelope::purchase(&lines).unwrap();

        let expected = (i128::from(i64::MAX) * 2).to_string();
        assert_eq!(envelope.payload().get("totalPrice"), Some(&Value::String(expected)));
    }

    #[test]
    fn test_purchase_of_empty_order() {
        let envelope = EventEnvelope::purchase(&[]).unwrap();
        assert_eq!(envelope.payload().get("totalPrice"), Some(&json!("0")));
        assert_eq!(envelope.payload().get("productIds"), Some(&json!("[]")));
    }

    #[test]
    fn test_order_line_accepts_sale_price_field() {
        let line: OrderLine = serde_json::from_value(json!({"id": 9, "salePriceU": 250})).unwrap();
        assert_eq!(line, OrderLine::new(9, 250));
    }
}
