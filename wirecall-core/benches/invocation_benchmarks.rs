use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use wirecall_core::{
    Context, ContractDescriptor, ContractRoute, CorrelationStore, Envelope, MethodDescriptor,
    RouteResolver, RpcError, TypeDescriptor,
};

fn calculator() -> ContractDescriptor {
    ContractDescriptor::new("com.example.math.CalculatorService")
        .route(ContractRoute::Substitute {
            from: "math".to_string(),
            to: "arith".to_string(),
        })
        .method(
            MethodDescriptor::new("plus")
                .param("a", TypeDescriptor::F64)
                .param("b", TypeDescriptor::F64)
                .returns(TypeDescriptor::F64),
        )
}

fn bench_route_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_resolution");
    let contract = calculator();
    let method = &contract.methods[0];

    group.bench_function("derive_uncached", |b| {
        b.iter(|| black_box(wirecall_core::route::derive_route(&contract, method).unwrap()))
    });

    let resolver = RouteResolver::new();
    group.bench_function("resolve_cached", |b| {
        b.iter(|| black_box(resolver.resolve(&contract, method).unwrap()))
    });

    group.finish();
}

fn bench_envelope_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_serialization");

    let envelopes = vec![
        ("scalar", Envelope::success(Some(json!(700.5)))),
        (
            "object",
            Envelope::success(Some(json!({
                "orders": (0..50).map(|i| json!({"id": i, "total": i as f64 * 1.5})).collect::<Vec<_>>()
            }))),
        ),
        ("failure", Envelope::failure(&RpcError::business("Insufficient funds"))),
    ];

    for (name, envelope) in envelopes.iter() {
        group.bench_with_input(BenchmarkId::new("serialize", name), envelope, |b, envelope| {
            b.iter(|| black_box(serde_json::to_vec(envelope).unwrap()))
        });

        let bytes = serde_json::to_vec(envelope).unwrap();
        group.bench_with_input(BenchmarkId::new("deserialize", name), &bytes, |b, bytes| {
            b.iter(|| black_box(serde_json::from_slice::<Envelope>(bytes).unwrap()))
        });
    }

    group.finish();
}

fn bench_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("context");

    for size in [1, 10, 100].iter() {
        let mut ctx = Context::new();
        for i in 0..*size {
            ctx.insert(format!("X-Header-{}", i), format!("value-{}", i));
        }

        group.bench_with_input(BenchmarkId::new("case_insensitive_get", size), &ctx, |b, ctx| {
            b.iter(|| black_box(ctx.get("x-header-0")))
        });

        group.bench_with_input(BenchmarkId::new("merge", size), &ctx, |b, ctx| {
            b.iter(|| {
                let mut target = Context::new();
                target.merge(ctx);
                black_box(target)
            })
        });
    }

    group.finish();
}

fn bench_correlation(c: &mut Criterion) {
    let store = CorrelationStore::new();
    let mut counter = 0u64;

    c.bench_function("correlation_register_resolve", |b| {
        b.iter(|| {
            counter += 1;
            let id = counter.to_string();
            let pending = store.register(id.clone(), Context::new()).unwrap();
            black_box(store.resolve(&id, Context::new(), Ok(None)));
            drop(pending);
        })
    });
}

criterion_group!(
    benches,
    bench_route_resolution,
    bench_envelope_serialization,
    bench_context,
    bench_correlation
);
criterion_main!(benches);
