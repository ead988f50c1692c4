use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use wirecall_core::{Context, Delivery, RpcError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No subscriber for topic {0}")]
    NoSubscriber(String),
    #[error("Authentication rejected: {0}")]
    Authentication(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Transport errors never carry an envelope, so they surface as the
/// transport-boundary kinds.
impl From<TransportError> for RpcError {
    #[track_caller]
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Authentication(message) => RpcError::authentication(message),
            TransportError::NotFound(message) => RpcError::not_found(message),
            other => RpcError::technical(other.to_string()),
        }
    }
}

/// Client-side seam: carries one request to wherever the route is served.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn call(&self, route: &str, context: Context, body: Option<Bytes>) -> Delivery;
}

/// Server-side seam: answers one request for a route. Application failures are
/// expected inside the returned body; an `Err` is reserved for conditions the
/// transport reports out-of-band.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn call(&self, route: &str, context: Context, body: Option<Bytes>) -> Delivery;
}

/// Connection-scoped headers that are never copied between a transport message
/// and a call context.
pub const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}
