use criterion::{Criterion, black_box, criterion_group, criterion_main};

use rust_backprop::{
    Activation, Bindings, FeedForwardNetwork, NetworkBuilder, Vector, VectorExpr,
};

fn dense_chain(depth: usize, width: usize) -> (FeedForwardNetwork, Bindings) {
    let mut builder = NetworkBuilder::new(width).unwrap();
    for _ in 0..depth {
        builder = builder
            .add_fully_connected(width, Activation::Tanh, true)
            .unwrap();
    }
    let (network, model) = builder.build().unwrap();
    let mut bindings = model.create_bindings();
    for (i, v) in bindings.as_mut_slice().iter_mut().enumerate() {
        *v = (i as f64 * 0.37).sin() * 0.5;
    }
    (network, bindings)
}

fn backprop_jacobian_bench(c: &mut Criterion) {
    let (network, bindings) = dense_chain(8, 16);
    let vars = network.variables();
    let x = Vector::filled(16, 0.1);

    c.bench_function("backprop_jacobian_8x16", |b| {
        b.iter(|| {
            let jac = network
                .jacobian(black_box(&x), black_box(&vars), &bindings)
                .unwrap();
            black_box(jac);
        })
    });
}

fn expression_jacobian_bench(c: &mut Criterion) {
    let (network, bindings) = dense_chain(8, 16);
    let vars = network.variables();
    let expr = network
        .expression(VectorExpr::constant(Vector::filled(16, 0.1)))
        .unwrap();

    c.bench_function("expression_jacobian_8x16", |b| {
        b.iter(|| {
            let jac = expr.derivative(black_box(&vars), &bindings).unwrap();
            black_box(jac);
        })
    });
}

fn forward_bench(c: &mut Criterion) {
    let (network, bindings) = dense_chain(8, 64);
    let x = Vector::filled(64, 0.1);

    c.bench_function("forward_8x64", |b| {
        b.iter(|| {
            let out = network.evaluate(black_box(&x), &bindings).unwrap();
            black_box(out);
        })
    });
}

criterion_group!(
    benches,
    backprop_jacobian_bench,
    expression_jacobian_bench,
    forward_bench
);
criterion_main!(benches);
