use crate::invocation::{ClientInvocationCore, Completion, PendingReply, Reply};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use wirecall_core::{Arguments, Context, ContractDescriptor, RpcError, SignatureValidator};

/// Typed calls against one contract.
///
/// Hand-written client types wrap a stub and forward each method:
///
/// ```rust,ignore
/// struct CalculatorClient(ServiceStub);
///
/// impl CalculatorClient {
///     async fn plus(&self, ctx: &mut Context, a: f64, b: f64) -> Result<f64, RpcError> {
///         self.0.call("plus", ctx, args! { "a" => a, "b" => b }).await
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ServiceStub {
    core: ClientInvocationCore,
    contract: Arc<ContractDescriptor>,
}

impl ServiceStub {
    /// Fails when the contract does not describe a valid service.
    pub fn new(core: ClientInvocationCore, contract: ContractDescriptor) -> Result<Self, RpcError> {
        SignatureValidator::validate(&contract)?;
        Ok(ServiceStub {
            core,
            contract: Arc::new(contract),
        })
    }

    pub fn contract(&self) -> &ContractDescriptor {
        &self.contract
    }

    /// Calls `method` and waits for its result, joining the pending reply of
    /// an async-declared method.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        context: &mut Context,
        args: Arguments,
    ) -> Result<R, RpcError> {
        let value = self
            .core
            .invoke(&self.contract, method, context, args)
            .await?
            .into_value(context)
            .await?;
        decode(value)
    }

    /// Starts `method` and returns without waiting for it. For a plain method
    /// the returned reply is already complete.
    pub async fn call_async<R: DeserializeOwned>(
        &self,
        method: &str,
        context: &mut Context,
        args: Arguments,
    ) -> Result<TypedReply<R>, RpcError> {
        let pending = match self.core.invoke(&self.contract, method, context, args).await? {
            Reply::Pending(pending) => pending,
            Reply::Ready(value) => PendingReply::ready(Completion {
                context: Context::new(),
                result: Ok(value),
            }),
        };
        Ok(TypedReply {
            pending,
            _result: PhantomData,
        })
    }

    pub fn call_blocking<R: DeserializeOwned>(
        &self,
        method: &str,
        context: &mut Context,
        args: Arguments,
    ) -> Result<R, RpcError> {
        let value = self
            .core
            .invoke_blocking(&self.contract, method, context, args)?;
        decode(value)
    }
}

/// [`PendingReply`] decoded into `R`.
#[derive(Debug)]
pub struct TypedReply<R> {
    pending: PendingReply,
    _result: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> TypedReply<R> {
    /// Waits for the result and merges the response context into `context`.
    pub async fn join(self, context: &mut Context) -> Result<R, RpcError> {
        decode(self.pending.join(context).await?)
    }
}

impl<R: DeserializeOwned> Future for TypedReply<R> {
    type Output = Result<R, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.pending)
            .poll(cx)
            .map(|result| result.and_then(decode))
    }
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R, RpcError> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::invocation(format!("Result could not be decoded: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use wirecall_core::{
        Delivery, Envelope, ErrorKind, MethodDescriptor, TypeDescriptor, JSON_CONTENT_TYPE,
    };
    use wirecall_transport::Invoker;

    /// Adds or subtracts `a` and `b` depending on the route.
    struct Arithmetic;

    #[async_trait]
    impl Invoker for Arithmetic {
        async fn call(&self, route: &str, mut context: Context, body: Option<Bytes>) -> Delivery {
            let args: Value = serde_json::from_slice(body.as_deref().unwrap_or(&b"{}"[..]))?;
            let a = args["a"].as_f64().unwrap_or_default();
            let b = args["b"].as_f64().unwrap_or_default();
            let envelope = match route {
                "com.example.calculator.plus" => Envelope::success(Some(json!(a + b))),
                "com.example.calculator.minus" => Envelope::success(Some(json!(a - b))),
                _ => Envelope::failure(&RpcError::invocation(format!("No route to {}", route))),
            };
            context.insert("Invoked-By", "arithmetic");
            context.set_content_type(JSON_CONTENT_TYPE);
            Ok((context, Some(Bytes::from(serde_json::to_vec(&envelope)?))))
        }
    }

    fn calculator() -> ContractDescriptor {
        let binary = |name: &str, returns: TypeDescriptor| {
            MethodDescriptor::new(name)
                .param("a", TypeDescriptor::F64)
                .param("b", TypeDescriptor::F64)
                .returns(returns)
        };
        ContractDescriptor::new("com.example.CalculatorService")
            .method(binary("plus", TypeDescriptor::F64))
            .method(binary("minus", TypeDescriptor::async_of(TypeDescriptor::F64)))
    }

    fn stub() -> ServiceStub {
        ServiceStub::new(ClientInvocationCore::new(Arc::new(Arithmetic)), calculator()).unwrap()
    }

    #[tokio::test]
    async fn test_typed_call() {
        let mut ctx = Context::new();
        let sum: f64 = stub()
            .call("plus", &mut ctx, args! { "a" => 341.2, "b" => 359.3 })
            .await
            .unwrap();
        assert!((sum - 700.5).abs() < 1e-9);
        assert_eq!(ctx.get("invoked-by"), Some("arithmetic"));
    }

    #[tokio::test]
    async fn test_call_joins_async_method() {
        let mut ctx = Context::new();
        let difference: f64 = stub()
            .call("minus", &mut ctx, args! { "a" => 359.3, "b" => 341.2 })
            .await
            .unwrap();
        assert!((difference - 18.1).abs() < 1e-9);
        assert_eq!(ctx.get("invoked-by"), Some("arithmetic"));
    }

    #[tokio::test]
    async fn test_call_async_then_join() {
        let stub = stub();
        let mut ctx = Context::new();
        let reply = stub
            .call_async::<f64>("minus", &mut ctx, args! { "a" => 359.3, "b" => 341.2 })
            .await
            .unwrap();
        let difference = reply.join(&mut ctx).await.unwrap();
        assert!((difference - 18.1).abs() < 1e-9);

        // A plain method comes back as an already completed reply.
        let reply = stub
            .call_async::<f64>("plus", &mut ctx, args! { "a" => 1.0, "b" => 2.0 })
            .await
            .unwrap();
        assert_eq!(reply.await.unwrap(), 3.0);
    }

    #[tokio::test]
    async fn test_undecodable_result() {
        let mut ctx = Context::new();
        let err = stub()
            .call::<String>("plus", &mut ctx, args! { "a" => 1.0, "b" => 2.0 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invocation);
        assert!(err.message().starts_with("Result could not be decoded"));
    }

    #[test]
    fn test_invalid_contract_rejected() {
        let contract = ContractDescriptor::new("com.example.BrokenService")
            .method(MethodDescriptor::new("twice"))
            .method(MethodDescriptor::new("twice"));
        let core = ClientInvocationCore::new(Arc::new(Arithmetic));
        assert!(ServiceStub::new(core, contract).is_err());
    }
}
