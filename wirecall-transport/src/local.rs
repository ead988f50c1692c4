use crate::transport::{Dispatcher, Invoker};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use wirecall_core::{Context, Delivery};

/// In-process request/response transport. The context is moved across on
/// both legs, just as a network transport would copy it.
#[derive(Clone)]
pub struct LocalInvoker {
    dispatcher: Arc<dyn Dispatcher>,
}

impl LocalInvoker {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        LocalInvoker { dispatcher }
    }
}

impl fmt::Debug for LocalInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalInvoker").finish_non_exhaustive()
    }
}

#[async_trait]
impl Invoker for LocalInvoker {
    async fn call(&self, route: &str, context: Context, body: Option<Bytes>) -> Delivery {
        trace!(route, request_id = context.request_id(), "loopback call");
        self.dispatcher.call(route, context, body).await
    }
}
