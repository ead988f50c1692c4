//! Binding service implementations to routes.
//!
//! A [`ServiceBinder`] pairs a contract description with one closure per method.
//! Binding validates the contract, checks that every method has a handler of
//! the right kind, and resolves each method's route. The resulting
//! [`ServiceBinding`] is exported into a [`BindingTable`], which refuses to let
//! two methods share a route.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};
use wirecall_core::{
    Arguments, Context, ContractDescriptor, MethodDescriptor, Route, RouteError, RouteResolver,
    RpcError, SignatureValidator,
};

pub type BlockingHandler =
    Arc<dyn Fn(&mut Context, Arguments) -> Result<Value, RpcError> + Send + Sync>;

/// The context comes back whether or not the handler succeeded.
pub type AsyncHandler =
    Arc<dyn Fn(Context, Arguments) -> BoxFuture<'static, (Context, Result<Value, RpcError>)> + Send + Sync>;

#[derive(Clone)]
pub enum Handler {
    /// Runs on the worker pool.
    Blocking(BlockingHandler),
    /// Awaited inline on the dispatching task.
    Async(AsyncHandler),
}

impl Handler {
    pub fn is_async(&self) -> bool {
        matches!(self, Handler::Async(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Blocking(_) => write!(f, "Handler::Blocking"),
            Handler::Async(_) => write!(f, "Handler::Async"),
        }
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub contract: String,
    pub method: MethodDescriptor,
    pub handler: Handler,
}

impl BoundMethod {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.contract, self.method.name)
    }
}

fn to_result_value<R: Serialize>(result: R) -> Result<Value, RpcError> {
    serde_json::to_value(result)
        .map_err(|e| RpcError::invocation(format!("Result is not serializable: {}", e)))
}

/// Collects handlers for one contract implemented by `T`.
pub struct ServiceBinder<T> {
    contract: ContractDescriptor,
    service: Arc<T>,
    handlers: Vec<(String, Handler)>,
}

impl<T> ServiceBinder<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(contract: ContractDescriptor, service: Arc<T>) -> Self {
        ServiceBinder {
            contract,
            service,
            handlers: Vec::new(),
        }
    }

    pub fn contract(&self) -> &ContractDescriptor {
        &self.contract
    }

    /// Handler for a method declared with a plain return type.
    pub fn blocking<F, R>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(&T, &mut Context, Arguments) -> Result<R, RpcError> + Send + Sync + 'static,
        R: Serialize,
    {
        let service = Arc::clone(&self.service);
        let erased: BlockingHandler = Arc::new(move |context: &mut Context, args: Arguments| {
            let result = handler(&service, context, args)?;
            to_result_value(result)
        });
        self.handlers.push((method.to_string(), Handler::Blocking(erased)));
        self
    }

    /// Handler for a method declared with an async return type. The handler
    /// hands its context back alongside the outcome, so entries it set survive
    /// a failure.
    pub fn asynchronous<F, Fut, R>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Arc<T>, Context, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (Context, Result<R, RpcError>)> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let erased: AsyncHandler = Arc::new(
            move |context: Context, args: Arguments| -> BoxFuture<'static, (Context, Result<Value, RpcError>)> {
                let pending = handler(Arc::clone(&service), context, args);
                Box::pin(async move {
                    let (context, result) = pending.await;
                    (context, result.and_then(to_result_value))
                })
            },
        );
        self.handlers.push((method.to_string(), Handler::Async(erased)));
        self
    }

    /// Validates the contract and resolves one route per method.
    pub fn bind(self, resolver: &RouteResolver) -> Result<ServiceBinding, RpcError> {
        let contract = self.contract;
        SignatureValidator::validate(&contract)?;

        let mut seen = HashSet::new();
        for (name, _) in &self.handlers {
            if contract.find_method(name).is_none() {
                return Err(RpcError::invocation(format!(
                    "Handler {} does not match any method of {}",
                    name, contract.name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(RpcError::invocation(format!(
                    "Method {} of {} has more than one handler",
                    name, contract.name
                )));
            }
        }

        let mut methods = Vec::with_capacity(contract.methods.len());
        for method in &contract.methods {
            let handler = self
                .handlers
                .iter()
                .find(|(name, _)| *name == method.name)
                .map(|(_, handler)| handler.clone())
                .ok_or_else(|| {
                    RpcError::invocation(format!(
                        "Method {} of {} has no handler",
                        method.name, contract.name
                    ))
                })?;

            if handler.is_async() != method.is_async() {
                let expected = if method.is_async() { "an asynchronous" } else { "a blocking" };
                return Err(RpcError::invocation(format!(
                    "Method {} of {} returns {} and needs {} handler",
                    method.name, contract.name, method.returns, expected
                )));
            }

            let route = resolver.resolve(&contract, method)?;
            debug!(contract = %contract.name, method = %method.name, %route, "bound method");
            methods.push((
                route,
                Arc::new(BoundMethod {
                    contract: contract.name.clone(),
                    method: method.clone(),
                    handler,
                }),
            ));
        }

        Ok(ServiceBinding {
            contract: contract.name,
            methods,
        })
    }
}

impl<T> fmt::Debug for ServiceBinder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBinder")
            .field("contract", &self.contract.name)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Routes of one bound contract, ready to export.
#[derive(Debug)]
pub struct ServiceBinding {
    pub contract: String,
    pub methods: Vec<(Route, Arc<BoundMethod>)>,
}

impl ServiceBinding {
    pub fn routes(&self) -> Vec<Route> {
        self.methods.iter().map(|(route, _)| route.clone()).collect()
    }
}

/// Route table shared by every request. Written at export time, read-only
/// afterwards.
#[derive(Debug, Default)]
pub struct BindingTable {
    methods: DashMap<Route, Arc<BoundMethod>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports every route of the binding, or none of them when one collides.
    pub fn export(&self, binding: ServiceBinding) -> Result<Vec<Route>, RouteError> {
        let mut inserted: Vec<Route> = Vec::with_capacity(binding.methods.len());

        for (route, method) in binding.methods {
            // The entry guard must be released before rolling back.
            let occupied_by = match self.methods.entry(route.clone()) {
                Entry::Occupied(existing) => Some(existing.get().qualified_name()),
                Entry::Vacant(vacant) => {
                    vacant.insert(method);
                    None
                }
            };

            if let Some(existing) = occupied_by {
                for route in &inserted {
                    self.methods.remove(route);
                }
                return Err(RouteError::Duplicate { route, existing });
            }
            inserted.push(route);
        }

        info!(contract = %binding.contract, routes = inserted.len(), "exported service");
        Ok(inserted)
    }

    pub fn lookup(&self, route: &str) -> Option<Arc<BoundMethod>> {
        self.methods.get(route).map(|entry| Arc::clone(entry.value()))
    }

    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.methods.iter().map(|entry| entry.key().clone()).collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
