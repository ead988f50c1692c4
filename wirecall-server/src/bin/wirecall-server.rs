//! wirecall demo server
//!
//! Exports a calculator service over HTTP at `POST /rpc/{route}`.
//! Configure with `WIRECALL_HOST`, `WIRECALL_PORT` and `WIRECALL_WORKERS`.

use anyhow::Result;
use nonzero_ext::nonzero;
use std::sync::Arc;
use tracing::info;
use wirecall_core::{ContractDescriptor, ErrorKind, MethodDescriptor, RpcError, TypeDescriptor};
use wirecall_server::{init_logging, RateLimit, Server, ServerConfig, ServerDispatchCore, ServiceBinder};

#[derive(Debug)]
struct Calculator {
    name: String,
}

impl Calculator {
    fn divide(&self, a: f64, b: f64) -> Result<f64, RpcError> {
        if b == 0.0 {
            return Err(RpcError::business("Division by zero"));
        }
        Ok(a / b)
    }
}

fn calculator_contract() -> ContractDescriptor {
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

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging("logs", "wirecall-server")?;

    let config = ServerConfig::from_env();
    let core = ServerDispatchCore::builder()
        .config(&config)
        .preprocessor(Arc::new(RateLimit::per_second(nonzero!(1000u32))))
        .build();

    let calculator = Arc::new(Calculator {
        name: "calculator".to_string(),
    });
    let routes = core.export(
        ServiceBinder::new(calculator_contract(), calculator)
            .blocking("plus", |calc, ctx, mut args| {
                ctx.insert("invoked-by", calc.name.as_str());
                Ok(args.take::<f64>("a")? + args.take::<f64>("b")?)
            })
            .asynchronous("minus", |calc, mut ctx, mut args| async move {
                ctx.insert("invoked-by", calc.name.as_str());
                let difference = args
                    .take::<f64>("a")
                    .and_then(|a| args.take::<f64>("b").map(|b| a - b));
                (ctx, difference)
            })
            .blocking("divide", |calc, _ctx, mut args| {
                calc.divide(args.take("a")?, args.take("b")?)
            }),
    )?;

    for route in &routes {
        info!(%route, "route available");
    }

    Server::new(config, Arc::new(core)).run().await?;
    Ok(())
}
