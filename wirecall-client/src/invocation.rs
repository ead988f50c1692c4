//! Client half of one call.
//!
//! `invoke` resolves the route, checks the named arguments against the method
//! description, stamps a fresh request id, serializes the arguments and hands
//! the request to the [`Invoker`]. The response envelope is decoded with the
//! deserializer registered for the response content type, and the response
//! context is merged back into the caller's context.

use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use wirecall_core::{
    default_id_generator, json_kind, Arguments, Context, ContractDescriptor, Delivery, Deserializer,
    DeserializerRegistry, Envelope, ErrorKind, IdGenerator, JsonSerializer, MethodDescriptor, Route,
    RouteResolver, RpcError, Serializer, TypeDescriptor,
};
use wirecall_transport::Invoker;

/// Outcome of one call together with the context the response carried.
#[derive(Debug)]
pub struct Completion {
    pub context: Context,
    pub result: Result<Value, RpcError>,
}

/// What `invoke` hands back: a value for plain methods, a handle for
/// async-declared ones.
#[derive(Debug)]
pub enum Reply {
    Ready(Value),
    Pending(PendingReply),
}

impl Reply {
    /// Waits for the value either way, merging a pending call's response
    /// context into `context`.
    pub async fn into_value(self, context: &mut Context) -> Result<Value, RpcError> {
        match self {
            Reply::Ready(value) => Ok(value),
            Reply::Pending(pending) => pending.join(context).await,
        }
    }
}

/// Handle to an async-declared call that is already in flight.
///
/// Awaiting it yields only the result; [`PendingReply::join`] also merges the
/// response context into the caller's.
#[derive(Debug)]
pub struct PendingReply {
    state: PendingState,
}

#[derive(Debug)]
enum PendingState {
    Running(JoinHandle<Completion>),
    Ready(Option<Completion>),
}

impl PendingReply {
    pub fn ready(completion: Completion) -> Self {
        PendingReply {
            state: PendingState::Ready(Some(completion)),
        }
    }

    pub async fn completion(self) -> Completion {
        match self.state {
            PendingState::Running(handle) => handle.await.unwrap_or_else(|e| Completion {
                context: Context::new(),
                result: Err(RpcError::technical(format!("Call task failed: {}", e))),
            }),
            PendingState::Ready(Some(completion)) => completion,
            PendingState::Ready(None) => Completion {
                context: Context::new(),
                result: Err(RpcError::invocation("Reply was already consumed")),
            },
        }
    }

    pub async fn join(self, context: &mut Context) -> Result<Value, RpcError> {
        let completion = self.completion().await;
        context.merge(&completion.context);
        completion.result
    }
}

impl Future for PendingReply {
    type Output = Result<Value, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            PendingState::Running(handle) => Pin::new(handle).poll(cx).map(|joined| match joined {
                Ok(completion) => completion.result,
                Err(e) => Err(RpcError::technical(format!("Call task failed: {}", e))),
            }),
            PendingState::Ready(slot) => Poll::Ready(
                slot.take()
                    .map(|completion| completion.result)
                    .unwrap_or_else(|| Err(RpcError::invocation("Reply was already consumed"))),
            ),
        }
    }
}

struct Pipeline {
    invoker: Arc<dyn Invoker>,
    serializer: Arc<dyn Serializer>,
    deserializers: DeserializerRegistry,
    resolver: RouteResolver,
    ids: Arc<dyn IdGenerator>,
    runtime: Option<Handle>,
}

/// One prepared request, owned so it can move onto a spawned task.
struct Request {
    route: Route,
    context: Context,
    body: Option<Bytes>,
    returns: TypeDescriptor,
}

#[derive(Clone)]
pub struct ClientInvocationCore {
    pipeline: Arc<Pipeline>,
}

pub struct ClientBuilder {
    invoker: Arc<dyn Invoker>,
    serializer: Arc<dyn Serializer>,
    extra_deserializers: Vec<(String, Arc<dyn Deserializer>)>,
    ids: Arc<dyn IdGenerator>,
    runtime: Option<Handle>,
}

impl ClientBuilder {
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Reads responses arriving with `content_type`.
    pub fn deserializer(mut self, content_type: &str, deserializer: Arc<dyn Deserializer>) -> Self {
        self.extra_deserializers
            .push((content_type.to_string(), deserializer));
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Runtime used by blocking calls made from outside any runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> ClientInvocationCore {
        let mut deserializers = DeserializerRegistry::for_serializer(self.serializer.as_ref());
        for (content_type, deserializer) in self.extra_deserializers {
            deserializers.register(&content_type, deserializer);
        }

        ClientInvocationCore {
            pipeline: Arc::new(Pipeline {
                invoker: self.invoker,
                serializer: self.serializer,
                deserializers,
                resolver: RouteResolver::new(),
                ids: self.ids,
                runtime: self.runtime,
            }),
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("serializer", &self.serializer)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl ClientInvocationCore {
    pub fn new(invoker: Arc<dyn Invoker>) -> Self {
        Self::builder(invoker).build()
    }

    pub fn builder(invoker: Arc<dyn Invoker>) -> ClientBuilder {
        ClientBuilder {
            invoker,
            serializer: Arc::new(JsonSerializer),
            extra_deserializers: Vec::new(),
            ids: default_id_generator(),
            runtime: None,
        }
    }

    /// Performs one call. Plain methods are driven to completion; for an
    /// async-declared method the request is already sent when the pending
    /// handle comes back.
    ///
    /// A plain method surfaces invocation errors and the error kinds it
    /// declares unchanged; any other failure is wrapped in an invocation error.
    pub async fn invoke(
        &self,
        contract: &ContractDescriptor,
        method: &str,
        context: &mut Context,
        args: Arguments,
    ) -> Result<Reply, RpcError> {
        let descriptor = contract.find_method(method).ok_or_else(|| {
            RpcError::invocation(format!(
                "Method {} is not declared by {}",
                method, contract.name
            ))
        })?;
        let request = self.prepare(contract, descriptor, context, args).await?;

        if descriptor.is_async() {
            let pipeline = Arc::clone(&self.pipeline);
            let handle = tokio::spawn(async move { pipeline.execute(request).await });
            return Ok(Reply::Pending(PendingReply {
                state: PendingState::Running(handle),
            }));
        }

        let completion = self.pipeline.execute(request).await;
        context.merge(&completion.context);
        completion
            .result
            .map(Reply::Ready)
            .map_err(|err| surface(descriptor, err))
    }

    /// Blocks the current thread until the call completes, including the
    /// pending part of an async-declared method.
    ///
    /// Works from a multi-threaded runtime worker, or from outside any runtime
    /// when the core was built with [`ClientBuilder::runtime`]. A
    /// current-thread runtime cannot be blocked and is rejected.
    pub fn invoke_blocking(
        &self,
        contract: &ContractDescriptor,
        method: &str,
        context: &mut Context,
        args: Arguments,
    ) -> Result<Value, RpcError> {
        let call = async {
            let reply = self.invoke(contract, method, context, args).await?;
            reply.into_value(context).await
        };

        match Handle::try_current() {
            Ok(current) => match current.runtime_flavor() {
                RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| current.block_on(call))
                }
                _ => Err(RpcError::invocation(
                    "Blocking calls are not supported on a current-thread runtime",
                )),
            },
            Err(_) => match &self.pipeline.runtime {
                Some(runtime) => runtime.block_on(call),
                None => Err(RpcError::invocation(
                    "No tokio runtime is available for a blocking call",
                )),
            },
        }
    }

    async fn prepare(
        &self,
        contract: &ContractDescriptor,
        method: &MethodDescriptor,
        context: &Context,
        args: Arguments,
    ) -> Result<Request, RpcError> {
        let pipeline = &self.pipeline;
        let route = pipeline.resolver.resolve(contract, method)?;
        check_arguments(&route, method, &args)?;

        let mut request_context = context.clone();
        request_context.set_request_id(pipeline.ids.next_id());

        let body = if method.has_arguments() {
            request_context.set_content_type(pipeline.serializer.content_type());
            Some(pipeline.serializer.serialize(&args.into_value()).await?)
        } else {
            None
        };

        Ok(Request {
            route,
            context: request_context,
            body,
            returns: method.returns.resolved().clone(),
        })
    }
}

impl fmt::Debug for ClientInvocationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientInvocationCore")
            .field("serializer", &self.pipeline.serializer)
            .field("routes_cached", &self.pipeline.resolver.cached())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    async fn execute(&self, request: Request) -> Completion {
        let Request {
            route,
            context,
            body,
            returns,
        } = request;
        debug!(
            route = %route,
            request_id = context.request_id(),
            body_len = body.as_ref().map_or(0, Bytes::len),
            "invoking"
        );

        let delivery: Delivery = self.invoker.call(route.as_str(), context, body).await;
        match delivery {
            Ok((context, body)) => {
                let result = self.decode(&route, &context, body, &returns).await;
                trace!(route = %route, ok = result.is_ok(), "response decoded");
                Completion { context, result }
            }
            Err(err) => {
                debug!(route = %route, kind = %err.kind(), "transport failed");
                Completion {
                    context: Context::new(),
                    result: Err(err),
                }
            }
        }
    }

    async fn decode(
        &self,
        route: &Route,
        context: &Context,
        body: Option<Bytes>,
        returns: &TypeDescriptor,
    ) -> Result<Value, RpcError> {
        let bytes = match body {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Ok(Value::Null),
        };

        let deserializer = self.deserializers.lookup(context.content_type());
        let envelope = Envelope::decode(deserializer.as_ref(), &bytes).await?;
        match envelope.into_result()? {
            None => Ok(Value::Null),
            Some(value) if returns.accepts(&value) => Ok(value),
            Some(value) => Err(RpcError::invocation(format!(
                "Expected {} from {} but received {}",
                returns,
                route,
                json_kind(&value)
            ))),
        }
    }
}

fn check_arguments(route: &Route, method: &MethodDescriptor, args: &Arguments) -> Result<(), RpcError> {
    let declared = method.argument_names();
    if args.len() > declared.len() {
        return Err(RpcError::invocation(format!(
            "Expected {} argument(s) for {} but received {}",
            declared.len(),
            route,
            args.len()
        )));
    }
    if let Some(unknown) = args.names().find(|name| !declared.contains(name)) {
        return Err(RpcError::invocation(format!(
            "Unknown argument '{}' for {}",
            unknown, route
        )));
    }
    Ok(())
}

fn surface(method: &MethodDescriptor, err: RpcError) -> RpcError {
    if err.kind() == ErrorKind::Invocation || method.declares(err.kind()) {
        err
    } else {
        let message = err.to_string();
        RpcError::with_frames(ErrorKind::Invocation, message, err.frames)
    }
}
