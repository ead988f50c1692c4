//! In-process topic bus transport.
//!
//! Requests are published on the route's topic with a reply-to key naming the
//! caller's inbox. Every dispatcher subscribed to the topic answers, so the
//! caller matches responses through a [`CorrelationStore`] and keeps only the
//! first one per request id.

use crate::transport::{Dispatcher, Invoker, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wirecall_core::{Context, CorrelationStore, Delivery, ErrorKind, IdGenerator, RpcError};

/// Context key naming the topic a response is published on.
pub const REPLY_TO: &str = "X-Reply-To";

const INBOX_PREFIX: &str = "inbox.";
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum BusPayload {
    Request(Option<Bytes>),
    Reply(Option<Bytes>),
    /// A dispatcher-level failure reported outside the envelope channel.
    Fault { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub context: Context,
    pub payload: BusPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    Exact(String),
    Prefix(String),
    All,
}

impl TopicFilter {
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicFilter::Exact(t) => t == topic,
            TopicFilter::Prefix(p) => topic.starts_with(p.as_str()),
            TopicFilter::All => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicBus {
    sender: broadcast::Sender<BusMessage>,
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TopicBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        TopicBus { sender }
    }

    /// Returns the number of subscriptions the message reached.
    pub fn publish(&self, message: BusMessage) -> Result<usize, TransportError> {
        let topic = message.topic.clone();
        self.sender
            .send(message)
            .map_err(|_| TransportError::NoSubscriber(topic))
    }

    pub fn subscribe(&self, filter: TopicFilter) -> TopicSubscription {
        TopicSubscription {
            filter,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug)]
pub struct TopicSubscription {
    filter: TopicFilter,
    receiver: broadcast::Receiver<BusMessage>,
}

impl TopicSubscription {
    /// Next message matching the filter; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if self.filter.matches(&message.topic) => return Some(message),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, filter = ?self.filter, "topic subscription lagged; messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Client side of the topic transport.
pub struct TopicInvoker {
    bus: TopicBus,
    inbox: String,
    ids: Arc<dyn IdGenerator>,
    store: Arc<CorrelationStore>,
    listener: JoinHandle<()>,
}

impl TopicInvoker {
    /// Opens an inbox and starts listening for responses. Must be called from
    /// within a tokio runtime.
    pub fn connect(bus: &TopicBus, ids: Arc<dyn IdGenerator>) -> Self {
        let inbox = format!("{}{}", INBOX_PREFIX, ids.next_id());
        let store = Arc::new(CorrelationStore::new());
        let subscription = bus.subscribe(TopicFilter::Exact(inbox.clone()));
        let listener = tokio::spawn(listen(subscription, Arc::clone(&store)));

        debug!(inbox = %inbox, "topic invoker connected");
        TopicInvoker {
            bus: bus.clone(),
            inbox,
            ids,
            store,
            listener,
        }
    }

    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    /// Requests still waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.store.size()
    }
}

async fn listen(mut subscription: TopicSubscription, store: Arc<CorrelationStore>) {
    while let Some(message) = subscription.recv().await {
        let Some(request_id) = message.context.request_id().map(str::to_string) else {
            warn!(topic = %message.topic, "response without request id dropped");
            continue;
        };

        let mut context = message.context;
        context.remove(REPLY_TO);
        match message.payload {
            BusPayload::Reply(body) => {
                store.resolve(&request_id, context, Ok(body));
            }
            BusPayload::Fault { kind, message } => {
                store.resolve(&request_id, context, Err(RpcError::new(kind, message)));
            }
            BusPayload::Request(_) => {
                debug!(request_id = %request_id, "ignoring request published to an inbox");
            }
        }
    }
}

impl fmt::Debug for TopicInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicInvoker")
            .field("inbox", &self.inbox)
            .field("in_flight", &self.store.size())
            .finish()
    }
}

impl Drop for TopicInvoker {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl Invoker for TopicInvoker {
    async fn call(&self, route: &str, mut context: Context, body: Option<Bytes>) -> Delivery {
        let request_id = match context.request_id().map(str::to_string) {
            Some(id) => id,
            None => {
                let id = self.ids.next_id();
                context.set_request_id(id.clone());
                id
            }
        };
        context.insert(REPLY_TO, self.inbox.clone());

        let pending = self.store.register(request_id.clone(), context.clone())?;
        let message = BusMessage {
            topic: route.to_string(),
            context,
            payload: BusPayload::Request(body),
        };
        if let Err(err) = self.bus.publish(message) {
            self.store.abandon(&request_id);
            return Err(err.into());
        }

        debug!(route, request_id = %request_id, "published request");
        pending.await
    }
}

/// Server side of the topic transport: feeds matching requests to a dispatcher
/// and publishes each answer on the request's reply-to topic.
pub struct TopicDispatcherAdapter {
    task: JoinHandle<()>,
}

impl TopicDispatcherAdapter {
    /// Subscribes immediately, so requests published after this returns are
    /// seen. Must be called from within a tokio runtime.
    pub fn spawn(bus: &TopicBus, filter: TopicFilter, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let subscription = bus.subscribe(filter);
        let task = tokio::spawn(serve(subscription, bus.clone(), dispatcher));
        TopicDispatcherAdapter { task }
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl fmt::Debug for TopicDispatcherAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicDispatcherAdapter")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl Drop for TopicDispatcherAdapter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut subscription: TopicSubscription, bus: TopicBus, dispatcher: Arc<dyn Dispatcher>) {
    while let Some(message) = subscription.recv().await {
        let BusMessage {
            topic: route,
            context,
            payload,
        } = message;
        let BusPayload::Request(body) = payload else {
            continue;
        };
        let Some(reply_to) = context.get(REPLY_TO).map(str::to_string) else {
            warn!(route = %route, "request without reply-to dropped");
            continue;
        };

        let bus = bus.clone();
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let request_context = context.clone();
            let (mut context, payload) = match dispatcher.call(&route, context, body).await {
                Ok((context, body)) => (context, BusPayload::Reply(body)),
                Err(err) => {
                    warn!(route = %route, error = %err, "dispatcher failed outside the envelope");
                    let fault = BusPayload::Fault {
                        kind: err.kind(),
                        message: err.message().to_string(),
                    };
                    (request_context.clone(), fault)
                }
            };

            if context.request_id().is_none() {
                if let Some(id) = request_context.request_id() {
                    context.set_request_id(id);
                }
            }

            let reply = BusMessage {
                topic: reply_to,
                context,
                payload,
            };
            if let Err(err) = bus.publish(reply) {
                warn!(route = %route, error = %err, "reply could not be published");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirecall_core::SequentialIdGenerator;

    struct Upper;

    #[async_trait]
    impl Dispatcher for Upper {
        async fn call(&self, route: &str, mut context: Context, body: Option<Bytes>) -> Delivery {
            if route.ends_with("forbidden") {
                return Err(RpcError::authentication("forbidden route"));
            }
            context.insert("Handled-By", "upper");
            let body = body.map(|b| Bytes::from(String::from_utf8_lossy(&b).to_uppercase()));
            Ok((context, body))
        }
    }

    fn ids() -> Arc<dyn IdGenerator> {
        Arc::new(SequentialIdGenerator::new("t"))
    }

    #[test]
    fn test_filter_matching() {
        assert!(TopicFilter::Exact("a.b".into()).matches("a.b"));
        assert!(!TopicFilter::Exact("a.b".into()).matches("a.bc"));
        assert!(TopicFilter::Prefix("com.example.".into()).matches("com.example.calculator.plus"));
        assert!(!TopicFilter::Prefix("com.example.".into()).matches("inbox.1"));
        assert!(TopicFilter::All.matches("anything"));
    }

    #[tokio::test]
    async fn test_publish_without_subscriber() {
        let bus = TopicBus::default();
        let err = bus
            .publish(BusMessage {
                topic: "nowhere".into(),
                context: Context::new(),
                payload: BusPayload::Request(None),
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::NoSubscriber(topic) if topic == "nowhere"));
    }

    #[tokio::test]
    async fn test_subscription_filters_topics() {
        let bus = TopicBus::default();
        let mut sub = bus.subscribe(TopicFilter::Exact("wanted".into()));

        for topic in ["other", "wanted"] {
            bus.publish(BusMessage {
                topic: topic.into(),
                context: Context::new(),
                payload: BusPayload::Request(None),
            })
            .unwrap();
        }

        let message = sub.recv().await.unwrap();
        assert_eq!(message.topic, "wanted");
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = TopicBus::default();
        let _adapter = TopicDispatcherAdapter::spawn(&bus, TopicFilter::Prefix("svc.".into()), Arc::new(Upper));
        let invoker = TopicInvoker::connect(&bus, ids());
        assert_eq!(invoker.inbox(), "inbox.t-1");

        let mut ctx = Context::new();
        ctx.set_request_id("req-1");
        let (ctx, body) = invoker
            .call("svc.echo", ctx, Some(Bytes::from_static(b"hello")))
            .await
            .unwrap();

        assert_eq!(body.unwrap(), Bytes::from_static(b"HELLO"));
        assert_eq!(ctx.get("handled-by"), Some("upper"));
        assert_eq!(ctx.request_id(), Some("req-1"));
        assert!(!ctx.contains_key(REPLY_TO));
        assert_eq!(invoker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_missing_request_id_is_generated() {
        let bus = TopicBus::default();
        let _adapter = TopicDispatcherAdapter::spawn(&bus, TopicFilter::All, Arc::new(Upper));
        let invoker = TopicInvoker::connect(&bus, ids());

        let (ctx, _) = invoker.call("svc.echo", Context::new(), None).await.unwrap();
        assert_eq!(ctx.request_id(), Some("t-2"));
    }

    #[tokio::test]
    async fn test_fault_surfaces_as_boundary_error() {
        let bus = TopicBus::default();
        let _adapter = TopicDispatcherAdapter::spawn(&bus, TopicFilter::All, Arc::new(Upper));
        let invoker = TopicInvoker::connect(&bus, ids());

        let err = invoker
            .call("svc.forbidden", Context::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.message(), "forbidden route");
    }

    #[tokio::test]
    async fn test_unanswered_request_stays_pending() {
        let bus = TopicBus::default();
        let invoker = TopicInvoker::connect(&bus, ids());

        // Only the inbox subscription exists, so the publish succeeds and
        // nobody answers. The core has no timeout; the caller adds one.
        let mut ctx = Context::new();
        ctx.set_request_id("req-1");
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            invoker.call("svc.echo", ctx, None),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(invoker.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_abandons_request() {
        let bus = TopicBus::default();
        let invoker = TopicInvoker::connect(&bus, ids());
        invoker.listener.abort();
        // Wait for the aborted listener to release its subscription.
        while bus.subscriber_count() > 0 {
            tokio::task::yield_now().await;
        }

        let err = invoker.call("svc.echo", Context::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Technical);
        assert!(err.message().contains("svc.echo"));
        assert_eq!(invoker.in_flight(), 0);
    }
}
