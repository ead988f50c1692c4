//! Calls the demo calculator exported by `wirecall-server`.
//!
//! Start the server first, then run with `WIRECALL_URL` pointing at it
//! (default `http://localhost:8080/rpc`).

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use wirecall_client::{
    args, ClientConfig, ClientInvocationCore, Context, ContractDescriptor, ErrorKind, HttpInvoker,
    MethodDescriptor, RpcError, ServiceStub, TypeDescriptor,
};

struct CalculatorClient {
    stub: ServiceStub,
}

impl CalculatorClient {
    fn contract() -> ContractDescriptor {
        let binary = |name: &str, returns: TypeDescriptor| {
            MethodDescriptor::new(name)
                .param("a", TypeDescriptor::F64)
                .param("b", TypeDescriptor::F64)
                .returns(returns)
        };

        ContractDescriptor::new("com.example.CalculatorService")
            .method(binary("plus", TypeDescriptor::F64))
            .method(binary("minus", TypeDescriptor::async_of(TypeDescriptor::F64)))
            .method(binary("divide", TypeDescriptor::F64).throws(ErrorKind::Business))
    }

    fn new(core: ClientInvocationCore) -> Result<Self, RpcError> {
        Ok(Self {
            stub: ServiceStub::new(core, Self::contract())?,
        })
    }

    async fn plus(&self, ctx: &mut Context, a: f64, b: f64) -> Result<f64, RpcError> {
        self.stub.call("plus", ctx, args! { "a" => a, "b" => b }).await
    }

    async fn minus(&self, ctx: &mut Context, a: f64, b: f64) -> Result<f64, RpcError> {
        let reply = self
            .stub
            .call_async::<f64>("minus", ctx, args! { "a" => a, "b" => b })
            .await?;
        reply.join(ctx).await
    }

    async fn divide(&self, ctx: &mut Context, a: f64, b: f64) -> Result<f64, RpcError> {
        self.stub.call("divide", ctx, args! { "a" => a, "b" => b }).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("wirecall_client=debug,info")
        .init();

    let invoker = HttpInvoker::new(ClientConfig::from_env())?;
    let calculator = CalculatorClient::new(ClientInvocationCore::new(Arc::new(invoker)))?;

    let mut ctx = Context::new();
    let sum = calculator.plus(&mut ctx, 341.2, 359.3).await?;
    info!(sum, invoked_by = ctx.get("invoked-by"), "plus");

    let difference = calculator.minus(&mut ctx, 359.3, 341.2).await?;
    info!(difference, "minus");

    match calculator.divide(&mut ctx, 1.0, 0.0).await {
        Ok(quotient) => info!(quotient, "divide"),
        Err(err) => info!(kind = %err.kind(), message = err.message(), "divide failed as expected"),
    }
    Ok(())
}
