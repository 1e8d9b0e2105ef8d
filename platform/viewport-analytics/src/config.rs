use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{AnalyticsError, AnalyticsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    InMemory,
}

impl TransportKind {
    pub fn from_env() -> Self {
        match env::var("ANALYTICS_TRANSPORT")
            .unwrap_or_else(|_| "http".to_string())
            .to_lowercase()
            .as_str()
        {
            "http" => TransportKind::Http,
            "inmemory" => TransportKind::InMemory,
            _ => {
                tracing::warn!("Unknown ANALYTICS_TRANSPORT, defaulting to http");
                TransportKind::Http
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub base_url: String,
    pub event_path: String,
    pub secret_path: String,
    pub http_timeout: Duration,
    /// `None` waits for the secret endpoint as long as the HTTP client does
    pub secret_lookup_timeout: Option<Duration>,
    pub memoize_secrets: bool,
    pub transport: TransportKind,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            event_path: "/api/sendEvent".to_string(),
            secret_path: "/api/getProductSecretKey".to_string(),
            http_timeout: Duration::from_secs(30),
            secret_lookup_timeout: None,
            memoize_secrets: false,
            transport: TransportKind::Http,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> AnalyticsResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let secret_timeout_ms: u64 = parse_var("ANALYTICS_SECRET_TIMEOUT_MS", 0)?;

        Ok(Self {
            base_url: env::var("ANALYTICS_BASE_URL").unwrap_or(defaults.base_url),
            event_path: env::var("ANALYTICS_EVENT_PATH").unwrap_or(defaults.event_path),
            secret_path: env::var("ANALYTICS_SECRET_PATH").unwrap_or(defaults.secret_path),
            http_timeout: Duration::from_secs(parse_var("ANALYTICS_HTTP_TIMEOUT_SECS", 30)?),
            secret_lookup_timeout: (secret_timeout_ms > 0).then(|| Duration::from_millis(secret_timeout_ms)),
            memoize_secrets: parse_var("ANALYTICS_MEMOIZE_SECRETS", false)?,
            transport: TransportKind::from_env(),
        })
    }

    /// Collection endpoint URL
    pub fn event_url(&self) -> String {
        join_url(&self.base_url, &self.event_path)
    }

    /// Secret lookup endpoint URL (without the `id` query)
    pub fn secret_url(&self) -> String {
        join_url(&self.base_url, &self.secret_path)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> AnalyticsResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AnalyticsError::Config(format!("{} has an invalid value: {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 7] = [
        "ANALYTICS_BASE_URL",
        "ANALYTICS_EVENT_PATH",
        "ANALYTICS_SECRET_PATH",
        "ANALYTICS_HTTP_TIMEOUT_SECS",
        "ANALYTICS_SECRET_TIMEOUT_MS",
        "ANALYTICS_MEMOIZE_SECRETS",
        "ANALYTICS_TRANSPORT",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = AnalyticsConfig::from_env().unwrap();

        assert_eq!(config.event_url(), "http://localhost:3000/api/sendEvent");
        assert_eq!(config.secret_url(), "http://localhost:3000/api/getProductSecretKey");
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.secret_lookup_timeout, None);
        assert!(!config.memoize_secrets);
        assert_eq!(config.transport, TransportKind::Http);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        env::set_var("ANALYTICS_BASE_URL", "https://shop.example/");
        env::set_var("ANALYTICS_SECRET_TIMEOUT_MS", "1500");
        env::set_var("ANALYTICS_MEMOIZE_SECRETS", "true");
        env::set_var("ANALYTICS_TRANSPORT", "InMemory");

        let config = AnalyticsConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.event_url(), "https://shop.example/api/sendEvent");
        assert_eq!(config.secret_lookup_timeout, Some(Duration::from_millis(1500)));
        assert!(config.memoize_secrets);
        assert_eq!(config.transport, TransportKind::InMemory);
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_config_error() {
        clear_env();
        env::set_var("ANALYTICS_HTTP_TIMEOUT_SECS", "soon");

        let result = AnalyticsConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(AnalyticsError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_unknown_transport_falls_back_to_http() {
        clear_env();
        env::set_var("ANALYTICS_TRANSPORT", "carrier-pigeon");

        let kind = TransportKind::from_env();
        clear_env();

        assert_eq!(kind, TransportKind::Http);
    }
}
