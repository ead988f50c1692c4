//! In-flight request table for transports that deliver responses out-of-band.
//!
//! A request-id is registered before the request is published and resolved when
//! the matching response arrives. Lookup and removal are a single map operation,
//! so two racing deliveries for one id complete the waiter at most once.

use crate::context::Context;
use crate::error::RpcError;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A response as delivered by a transport: its context and optional body.
pub type Delivery = Result<(Context, Option<Bytes>), RpcError>;

#[derive(Debug)]
struct PendingRequest {
    context: Context,
    slot: oneshot::Sender<Delivery>,
}

#[derive(Debug, Default)]
pub struct CorrelationStore {
    pending: DashMap<String, PendingRequest>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `request_id`. Registering an id that is already in
    /// flight is rejected.
    pub fn register(
        &self,
        request_id: impl Into<String>,
        context: Context,
    ) -> Result<PendingResponse, RpcError> {
        let request_id = request_id.into();
        match self.pending.entry(request_id.clone()) {
            Entry::Occupied(_) => Err(RpcError::invocation(format!(
                "Request {} is already in flight",
                request_id
            ))),
            Entry::Vacant(vacant) => {
                let (slot, receiver) = oneshot::channel();
                vacant.insert(PendingRequest { context, slot });
                debug!(request_id = %request_id, "registered pending request");
                Ok(PendingResponse {
                    request_id,
                    receiver,
                })
            }
        }
    }

    /// Completes and removes the waiter for `request_id`. Returns `false` when no
    /// waiter exists, which happens on late or duplicate delivery.
    pub fn resolve(&self, request_id: &str, context: Context, outcome: Result<Option<Bytes>, RpcError>) -> bool {
        let Some((_, pending)) = self.pending.remove(request_id) else {
            warn!(request_id, "no pending request for response; dropping late or duplicate delivery");
            return false;
        };

        debug!(
            request_id,
            request_headers = pending.context.len(),
            "resolving pending request"
        );
        if pending.slot.send(outcome.map(|body| (context, body))).is_err() {
            debug!(request_id, "caller stopped waiting before the response arrived");
        }
        true
    }

    /// Drops the waiter without completing it. Its future fails with a technical
    /// error; a later `resolve` is a no-op.
    pub fn abandon(&self, request_id: &str) -> Option<Context> {
        self.pending
            .remove(request_id)
            .map(|(_, pending)| pending.context)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn size(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Resolves to the delivered response of one registered request.
#[derive(Debug)]
pub struct PendingResponse {
    request_id: String,
    receiver: oneshot::Receiver<Delivery>,
}

impl PendingResponse {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Future for PendingResponse {
    type Output = Delivery;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.receiver).poll(cx).map(|received| match received {
            Ok(delivery) => delivery,
            Err(_) => Err(RpcError::technical(format!(
                "Request {} was abandoned",
                this.request_id
            ))),
        })
    }
}
