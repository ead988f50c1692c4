use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as HttpClient, StatusCode};
use std::time::Duration;
use tracing::{debug, trace, warn};
use wirecall_core::{Context, Delivery, RpcError};
use wirecall_transport::{is_hop_by_hop, Invoker, TransportError};

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL; the route is appended as the last path segment
    pub url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/rpc".to_string(),
            timeout_ms: 30000,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `WIRECALL_URL` and `WIRECALL_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("WIRECALL_URL") {
            config.url = url;
        }
        if let Some(raw) = lookup("WIRECALL_TIMEOUT_MS") {
            match raw.trim().parse() {
                Ok(timeout_ms) => config.timeout_ms = timeout_ms,
                Err(_) => warn!(value = %raw, "ignoring unparseable WIRECALL_TIMEOUT_MS"),
            }
        }
        config
    }
}

/// [`Invoker`] that POSTs each call to `{url}/{route}`, carrying the context
/// as headers.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    config: ClientConfig,
    http_client: HttpClient,
}

impl HttpInvoker {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn new_with_url(url: &str) -> Result<Self> {
        Self::new(ClientConfig {
            url: url.to_string(),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), route)
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn call(&self, route: &str, context: Context, body: Option<Bytes>) -> Delivery {
        let url = self.endpoint(route);
        let mut request = self.http_client.post(&url);
        for (name, value) in context.iter().filter(|(name, _)| !is_hop_by_hop(name)) {
            match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
                (Ok(name), Ok(value)) => request = request.header(name, value),
                _ => debug!(header = name, "context entry is not a valid header; dropped"),
            }
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        debug!(%url, request_id = context.request_id(), "sending call");
        let response = request
            .send()
            .await
            .map_err(|e| RpcError::technical(format!("HTTP request to {} failed: {}", url, e)))?;

        let status = response.status();
        let headers = headers_to_context(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RpcError::technical(format!("Failed to read response from {}: {}", url, e)))?;
        trace!(%url, %status, len = bytes.len(), "response received");

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let error = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Authentication(text),
                StatusCode::NOT_FOUND => TransportError::NotFound(text),
                _ => TransportError::Protocol(format!("HTTP {}: {}", status, text)),
            };
            return Err(error.into());
        }

        let body = if bytes.is_empty() { None } else { Some(bytes) };
        Ok((headers, body))
    }
}

fn headers_to_context(headers: &HeaderMap) -> Context {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wirecall_core::ErrorKind;

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("WIRECALL_URL", "http://calc.internal:9000/rpc"),
            ("WIRECALL_TIMEOUT_MS", "soon"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.url, "http://calc.internal:9000/rpc");
        assert_eq!(config.timeout_ms, 30000);
    }

    #[tokio::test]
    async fn test_call_carries_context_both_ways() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rpc/com.example.calculator.plus")
            .match_header("x-request-id", "req-7")
            .match_header("tenant", "acme")
            .match_body(r#"{"a":341.2,"b":359.3}"#)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("invoked-by", "mock")
            .with_header("x-request-id", "req-7")
            .with_body(r#"{"payload":700.5}"#)
            .create_async()
            .await;

        let invoker = HttpInvoker::new_with_url(&format!("{}/rpc/", server.url())).unwrap();
        let mut ctx = Context::new();
        ctx.set_request_id("req-7");
        ctx.insert("Tenant", "acme");

        let (response, body) = invoker
            .call(
                "com.example.calculator.plus",
                ctx,
                Some(Bytes::from_static(br#"{"a":341.2,"b":359.3}"#)),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.get("invoked-by"), Some("mock"));
        assert_eq!(response.request_id(), Some("req-7"));
        assert_eq!(response.content_type(), Some("application/json"));
        assert!(response.get("content-length").is_none());
        assert_eq!(body.as_deref(), Some(&br#"{"payload":700.5}"#[..]));
    }

    #[tokio::test]
    async fn test_empty_response_has_no_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rpc/com.example.calculator.reset")
            .with_status(200)
            .create_async()
            .await;

        let invoker = HttpInvoker::new_with_url(&format!("{}/rpc", server.url())).unwrap();
        let (_, body) = invoker
            .call("com.example.calculator.reset", Context::new(), None)
            .await
            .unwrap();
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn test_status_maps_to_error_kind() {
        let mut server = mockito::Server::new_async().await;
        for (route, status) in [("denied", 403), ("anonymous", 401), ("gone", 404), ("broken", 500)] {
            server
                .mock("POST", format!("/rpc/{}", route).as_str())
                .with_status(status)
                .with_body(format!("{} says no", route))
                .create_async()
                .await;
        }
        let invoker = HttpInvoker::new_with_url(&format!("{}/rpc", server.url())).unwrap();

        let error_for = |route: &'static str| {
            let invoker = invoker.clone();
            async move {
                invoker
                    .call(route, Context::new(), None)
                    .await
                    .unwrap_err()
            }
        };

        let denied = error_for("denied").await;
        assert_eq!(denied.kind(), ErrorKind::Authentication);
        assert_eq!(denied.message(), "denied says no");
        assert_eq!(error_for("anonymous").await.kind(), ErrorKind::Authentication);
        assert_eq!(error_for("gone").await.kind(), ErrorKind::NotFound);

        let broken = error_for("broken").await;
        assert_eq!(broken.kind(), ErrorKind::Technical);
        assert!(broken.message().contains("500"));
    }

    #[tokio::test]
    async fn test_connection_failure_is_technical() {
        let invoker = HttpInvoker::new(ClientConfig {
            url: "http://127.0.0.1:9/rpc".to_string(),
            timeout_ms: 2000,
        })
        .unwrap();
        let err = invoker.call("anything", Context::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Technical);
        assert!(err.message().contains("HTTP request to http://127.0.0.1:9/rpc/anything failed"));
    }

    #[tokio::test]
    async fn test_invalid_context_entries_are_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rpc/com.example.calculator.reset")
            .match_header("tenant", "acme")
            .with_status(200)
            .create_async()
            .await;

        let invoker = HttpInvoker::new_with_url(&format!("{}/rpc", server.url())).unwrap();
        let mut ctx = Context::new();
        ctx.insert("Trace Note", "spaces are not allowed in names");
        ctx.insert("X-Note", "line\nbreak");
        ctx.insert("Tenant", "acme");

        let (_, body) = invoker
            .call("com.example.calculator.reset", ctx, None)
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(body.is_none());
    }
}
