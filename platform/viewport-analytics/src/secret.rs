//! Per-product secret key lookup

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::{AnalyticsError, AnalyticsResult};

/// Resolves the secret key that must accompany a product view event.
///
/// The returned JSON value is attached to the event as-is under `secretKey`.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, product_id: &str) -> AnalyticsResult<Value>;
}

/// `GET <endpoint>?id=<productId>`; the JSON response body is the secret
#[derive(Clone)]
pub struct HttpSecretResolver {
    client: Client,
    endpoint: String,
}

impl HttpSecretResolver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> AnalyticsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyticsError::Config(e.to_string()))?;

        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SecretResolver for HttpSecretResolver {
    async fn resolve(&self, product_id: &str) -> AnalyticsResult<Value> {
        let lookup_error = |reason: String| AnalyticsError::SecretLookup {
            product_id: product_id.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id", product_id)])
            .send()
            .await
            .map_err(|e| lookup_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_error(format!("secret endpoint returned {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| lookup_error(e.to_string()))
    }
}

/// Caches resolved secrets per product id.
///
/// Off by default: every visibility transition normally triggers a fresh
/// lookup, since secrets may rotate. Failed lookups are not cached.
pub struct MemoizedSecretResolver<R> {
    inner: R,
    resolved: DashMap<String, Value>,
}

impl<R: SecretResolver> MemoizedSecretResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            resolved: DashMap::new(),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.resolved.len()
    }
}

#[async_trait]
impl<R: SecretResolver> SecretResolver for MemoizedSecretResolver<R> {
    async fn resolve(&self, product_id: &str) -> AnalyticsResult<Value> {
        if let Some(secret) = self.resolved.get(product_id) {
            return Ok(secret.value().clone());
        }

        let secret = self.inner.resolve(product_id).await?;
        self.resolved.insert(product_id.to_string(), secret.clone());
        Ok(secret)
    }
}
