//! Delivery of serialized envelopes to the collection endpoint
//!
//! - **HttpTransport**: production, `POST` to the storefront's collection URL
//! - **InMemoryTransport**: tests and local runs, broadcasts bodies to subscribers

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::{AnalyticsError, AnalyticsResult};

/// Sink for JSON-encoded event envelopes.
///
/// Implementations send exactly one request per call and do not retry.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, body: Vec<u8>) -> AnalyticsResult<()>;
}

impl std::fmt::Debug for dyn EventTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventTransport")
    }
}

/// Posts envelopes to a fixed collection URL
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> AnalyticsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyticsError::Config(e.to_string()))?;

        Ok(Self::with_client(client, endpoint))
    }

    /// Share an existing client (and its connection pool)
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn send(&self, body: Vec<u8>) -> AnalyticsResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AnalyticsError::Delivery(e.to_string()))?;

        // The response body is never read; only transport-level and status
        // failures are reported.
        if !response.status().is_success() {
            return Err(AnalyticsError::Delivery(format!(
                "collection endpoint returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Transport that broadcasts every body to in-process subscribers.
///
/// Sending never fails; with no subscribers the body is dropped.
///
/// # Example
/// ```rust
/// use viewport_analytics::{EventTransport, InMemoryTransport};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = InMemoryTransport::new();
/// let mut sent = transport.subscribe();
///
/// transport.send(br#"{"type":"route"}"#.to_vec()).await?;
///
/// let body = sent.next().await.unwrap();
/// assert_eq!(body, br#"{"type":"route"}"#);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryTransport {
    sender: Arc<broadcast::Sender<Vec<u8>>>,
}

impl InMemoryTransport {
    /// Buffer of 1000 bodies; lagging subscribers lose the oldest ones
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Stream of every body sent after this call
    pub fn subscribe(&self) -> BoxStream<'static, Vec<u8>> {
        let mut receiver = self.sender.subscribe();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(body) => yield body,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "InMemoryTransport subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        stream.boxed()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn send(&self, body: Vec<u8>) -> AnalyticsResult<()> {
        let _ = self.sender.send(body);
        Ok(())
    }
}
