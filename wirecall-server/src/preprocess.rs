use async_trait::async_trait;
use bytes::Bytes;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use tracing::warn;
use wirecall_core::{Context, RpcError};

/// Runs before argument binding, in registration order. Returning an error
/// short-circuits the call.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn process(&self, route: &str, context: Context, body: Option<&Bytes>) -> Result<Context, RpcError>;
}

/// Rejects calls whose context lacks a header. Deciding whether the value is
/// acceptable belongs to a later preprocessor.
#[derive(Debug, Clone)]
pub struct RequireHeader {
    header: String,
}

impl RequireHeader {
    pub fn new(header: impl Into<String>) -> Self {
        RequireHeader { header: header.into() }
    }
}

#[async_trait]
impl Preprocessor for RequireHeader {
    async fn process(&self, route: &str, context: Context, _body: Option<&Bytes>) -> Result<Context, RpcError> {
        match context.get(&self.header) {
            Some(value) if !value.trim().is_empty() => Ok(context),
            _ => {
                warn!(route, header = %self.header, "rejected call without required header");
                Err(RpcError::authentication(format!(
                    "Missing required header {}",
                    self.header
                )))
            }
        }
    }
}

/// Process-wide call quota.
pub struct RateLimit {
    limiter: DefaultDirectRateLimiter,
}

impl RateLimit {
    pub fn new(quota: Quota) -> Self {
        RateLimit {
            limiter: RateLimiter::direct(quota),
        }
    }

    pub fn per_second(calls: NonZeroU32) -> Self {
        Self::new(Quota::per_second(calls))
    }
}

impl fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimit").finish_non_exhaustive()
    }
}

#[async_trait]
impl Preprocessor for RateLimit {
    async fn process(&self, route: &str, context: Context, _body: Option<&Bytes>) -> Result<Context, RpcError> {
        match self.limiter.check() {
            Ok(()) => Ok(context),
            Err(_) => {
                warn!(route, request_id = context.request_id(), "rate limit exceeded");
                Err(RpcError::technical(format!("Rate limit exceeded for {}", route)))
            }
        }
    }
}
