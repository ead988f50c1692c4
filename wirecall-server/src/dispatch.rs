//! Server half of one call: route lookup, preprocessing, argument binding,
//! handler execution and envelope construction.
//!
//! Everything that goes wrong past the preprocessors is written into the
//! envelope and returned as a successful transport response. Only a
//! preprocessor may fail the call outside the envelope, and only with one of
//! the transport-boundary kinds.

use crate::binding::{BindingTable, BoundMethod, Handler, ServiceBinder};
use crate::pool::{panic_message, WorkerPool};
use crate::preprocess::Preprocessor;
use crate::server::ServerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};
use wirecall_core::{
    json_kind, Arguments, Context, Delivery, Deserializer, DeserializerRegistry, Envelope, ErrorKind,
    JsonSerializer, Route, RouteResolver, RpcError, Serializer, TypeDescriptor,
};
use wirecall_transport::Dispatcher;

pub struct ServerDispatchCore {
    bindings: BindingTable,
    resolver: RouteResolver,
    preprocessors: Vec<Arc<dyn Preprocessor>>,
    serializer: Arc<dyn Serializer>,
    deserializers: DeserializerRegistry,
    pool: WorkerPool,
}

pub struct DispatchBuilder {
    preprocessors: Vec<Arc<dyn Preprocessor>>,
    serializer: Arc<dyn Serializer>,
    extra_deserializers: Vec<(String, Arc<dyn Deserializer>)>,
    worker_threads: usize,
}

impl Default for DispatchBuilder {
    fn default() -> Self {
        DispatchBuilder {
            preprocessors: Vec::new(),
            serializer: Arc::new(JsonSerializer),
            extra_deserializers: Vec::new(),
            worker_threads: ServerConfig::default().worker_threads,
        }
    }
}

impl DispatchBuilder {
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Reads request bodies arriving with `content_type`.
    pub fn deserializer(mut self, content_type: &str, deserializer: Arc<dyn Deserializer>) -> Self {
        self.extra_deserializers
            .push((content_type.to_string(), deserializer));
        self
    }

    pub fn preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.preprocessors.push(preprocessor);
        self
    }

    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn config(self, config: &ServerConfig) -> Self {
        self.worker_threads(config.worker_threads)
    }

    pub fn build(self) -> ServerDispatchCore {
        let mut deserializers = DeserializerRegistry::for_serializer(self.serializer.as_ref());
        for (content_type, deserializer) in self.extra_deserializers {
            deserializers.register(&content_type, deserializer);
        }

        ServerDispatchCore {
            bindings: BindingTable::new(),
            resolver: RouteResolver::new(),
            preprocessors: self.preprocessors,
            serializer: self.serializer,
            deserializers,
            pool: WorkerPool::new(self.worker_threads),
        }
    }
}

impl fmt::Debug for DispatchBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchBuilder")
            .field("preprocessors", &self.preprocessors.len())
            .field("serializer", &self.serializer)
            .field("worker_threads", &self.worker_threads)
            .finish()
    }
}

impl Default for ServerDispatchCore {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ServerDispatchCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> DispatchBuilder {
        DispatchBuilder::default()
    }

    /// Binds a service and makes its routes callable. Fails without exporting
    /// anything when the contract is invalid or a route is already taken.
    pub fn export<T>(&self, binder: ServiceBinder<T>) -> Result<Vec<Route>, RpcError>
    where
        T: Send + Sync + 'static,
    {
        let binding = binder.bind(&self.resolver)?;
        Ok(self.bindings.export(binding)?)
    }

    pub fn routes(&self) -> Vec<Route> {
        self.bindings.routes()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn dispatch(&self, route: &str, context: Context, body: Option<Bytes>) -> Delivery {
        debug!(route, request_id = context.request_id(), "dispatching call");
        let (mut context, envelope) = self.execute(route, context, body).await?;

        let bytes = match envelope.encode(self.serializer.as_ref()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(route, error = %err, "response envelope could not be serialized");
                let fallback = Envelope::failure(&RpcError::invocation(format!(
                    "Response of {} could not be serialized: {}",
                    route,
                    err.message()
                )));
                fallback
                    .encode(self.serializer.as_ref())
                    .await
                    .map_err(|e| e.into_kind(ErrorKind::Technical))?
            }
        };

        context.set_content_type(self.serializer.content_type());
        Ok((context, Some(bytes)))
    }

    /// `Err` only for a preprocessor rejection of a transport-boundary kind.
    async fn execute(
        &self,
        route: &str,
        context: Context,
        body: Option<Bytes>,
    ) -> Result<(Context, Envelope), RpcError> {
        let Some(bound) = self.bindings.lookup(route) else {
            warn!(route, "no route");
            let err = RpcError::invocation(format!("No route to {}", route));
            return Ok((context, Envelope::failure(&err)));
        };

        let mut context = context;
        for preprocessor in &self.preprocessors {
            match preprocessor.process(route, context.clone(), body.as_ref()).await {
                Ok(next) => context = next,
                Err(err) if err.kind().is_transport_boundary() => {
                    debug!(route, kind = %err.kind(), "preprocessor rejected call outside the envelope");
                    return Err(err);
                }
                Err(err) => return Ok((context, Envelope::failure(&err))),
            }
        }

        let args = match self.bind_arguments(route, &bound, &context, body.as_deref()).await {
            Ok(args) => args,
            Err(err) => {
                debug!(route, error = %err, "argument binding failed");
                return Ok((context, Envelope::failure(&err)));
            }
        };

        let (context, result) = self.invoke(&bound, context, args).await;
        let envelope = match result {
            Ok(value) => Envelope::success(Some(value)),
            Err(err) => {
                debug!(route, kind = %err.kind(), error = %err.message(), "handler failed");
                Envelope::failure(&err)
            }
        };
        Ok((context, envelope))
    }

    async fn bind_arguments(
        &self,
        route: &str,
        bound: &BoundMethod,
        context: &Context,
        body: Option<&[u8]>,
    ) -> Result<Arguments, RpcError> {
        let params = bound.method.argument_params();
        let args = match body {
            Some(bytes) if !bytes.is_empty() => {
                let deserializer = self.deserializers.lookup(context.content_type());
                let decoded = deserializer
                    .deserialize(bytes, &TypeDescriptor::arguments())
                    .await?;
                Arguments::from_value(decoded)?
            }
            _ => Arguments::new(),
        };

        if args.len() > params.len() {
            return Err(RpcError::invocation(format!(
                "Expected {} argument(s) for {} but received {}",
                params.len(),
                route,
                args.len()
            )));
        }

        for name in args.names() {
            let Some(param) = params.iter().find(|p| p.name.as_deref() == Some(name)) else {
                return Err(RpcError::invocation(format!(
                    "Unknown argument '{}' for {}",
                    name, route
                )));
            };
            if let Some(value) = args.get(name) {
                if !param.ty.accepts(value) {
                    return Err(RpcError::invocation(format!(
                        "Argument '{}' of {} expected {} but received {}",
                        name,
                        route,
                        param.ty,
                        json_kind(value)
                    )));
                }
            }
        }

        Ok(args)
    }

    /// The returned context is the handler's, failed or not. Only a panic or a
    /// pool failure falls back to the context the handler was given.
    async fn invoke(
        &self,
        bound: &BoundMethod,
        context: Context,
        args: Arguments,
    ) -> (Context, Result<Value, RpcError>) {
        let before = context.clone();
        match &bound.handler {
            Handler::Async(handler) => {
                let pending = AssertUnwindSafe(async move { handler(context, args).await });
                match pending.catch_unwind().await {
                    Ok((context, result)) => (context, result.map_err(handler_failure)),
                    Err(payload) => {
                        let message = panic_message(payload);
                        error!(panic = %message, "handler panicked");
                        (before, Err(RpcError::business(format!("Handler panicked: {}", message))))
                    }
                }
            }
            Handler::Blocking(handler) => {
                let handler = Arc::clone(handler);
                let job = move || {
                    let mut context = context;
                    let result = handler(&mut context, args);
                    (context, result)
                };
                match self.pool.run(job).await {
                    Ok((context, result)) => (context, result.map_err(handler_failure)),
                    Err(err) => (before, Err(err)),
                }
            }
        }
    }
}

/// Handler errors are business errors unless the handler itself reported bad
/// arguments.
fn handler_failure(err: RpcError) -> RpcError {
    match err.kind() {
        ErrorKind::Invocation | ErrorKind::Business => err,
        _ => err.into_kind(ErrorKind::Business),
    }
}

impl fmt::Debug for ServerDispatchCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDispatchCore")
            .field("routes", &self.bindings.len())
            .field("preprocessors", &self.preprocessors.len())
            .field("serializer", &self.serializer)
            .field("pool", &self.pool)
            .finish()
    }
}

#[async_trait]
impl Dispatcher for ServerDispatchCore {
    async fn call(&self, route: &str, context: Context, body: Option<Bytes>) -> Delivery {
        self.dispatch(route, context, body).await
    }
}
