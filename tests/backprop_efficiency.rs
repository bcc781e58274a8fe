use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_backprop::{
    Activation, BackpropStats, Bindings, FeedForwardNetwork, LayerOps, NetworkBuilder,
    ParameterModel, Variable, Vector,
};

const WIDTH: usize = 3;

fn deep_chain(depth: usize) -> (FeedForwardNetwork, ParameterModel) {
    let mut builder = NetworkBuilder::new(WIDTH).unwrap();
    for _ in 0..depth {
        builder = builder
            .add_fully_connected(WIDTH, Activation::Tanh, true)
            .unwrap();
    }
    builder.build().unwrap()
}

fn seeded_bindings(model: &ParameterModel) -> Bindings {
    let mut rng = StdRng::seed_from_u64(50);
    let mut bindings = model.create_bindings();
    for v in bindings.as_mut_slice() {
        *v = rng.gen_range(-0.5..0.5);
    }
    bindings
}

fn stats_for(network: &FeedForwardNetwork, bindings: &Bindings, vars: &[Variable]) -> BackpropStats {
    let x = Vector::filled(WIDTH, 0.25);
    network.jacobian_with_stats(&x, vars, bindings).unwrap().1
}

#[test]
fn fifty_layer_chain_costs_depth_plus_parameters() {
    let depth = 50;
    let (network, model) = deep_chain(depth);
    let bindings = seeded_bindings(&model);
    let vars = network.variables();
    let per_layer = WIDTH * WIDTH + WIDTH;
    assert_eq!(vars.len(), depth * per_layer);

    let stats = stats_for(&network, &bindings, &vars);
    assert_eq!(
        stats,
        BackpropStats {
            layer_evaluations: depth,
            input_jacobians: depth - 1,
            jacobian_products: depth - 2,
            parameter_derivatives: vars.len(),
            sensitivity_products: vars.len() - per_layer,
        }
    );

    // Differentiating each parameter through the whole chain would take
    // about depth multiplications per parameter.
    let total = stats.input_jacobians
        + stats.jacobian_products
        + stats.parameter_derivatives
        + stats.sensitivity_products;
    assert!(total <= 3 * (depth + vars.len()));
    assert!(total < depth * vars.len() / 10);
}

#[test]
fn backward_pass_grows_linearly_with_depth() {
    let mut previous: Option<BackpropStats> = None;
    for depth in [10, 20, 40] {
        let (network, model) = deep_chain(depth);
        let bindings = seeded_bindings(&model);
        // Only the bottom layer: every delta above it is still needed exactly once.
        let bottom = network.layers()[0].variables();
        let stats = stats_for(&network, &bindings, &bottom);

        assert_eq!(stats.input_jacobians, depth - 1);
        assert_eq!(stats.jacobian_products, depth - 2);
        assert_eq!(stats.parameter_derivatives, bottom.len());
        assert_eq!(stats.sensitivity_products, bottom.len());
        if let Some(prev) = previous {
            assert_eq!(stats.input_jacobians + 1, 2 * (prev.input_jacobians + 1));
        }
        previous = Some(stats);
    }
}

#[test]
fn deltas_stop_at_the_lowest_requested_layer() {
    let depth = 50;
    let (network, model) = deep_chain(depth);
    let bindings = seeded_bindings(&model);
    let owner = 40;
    let vars = network.layers()[owner].variables();

    let stats = stats_for(&network, &bindings, &vars);
    // delta[49] .. delta[41]
    assert_eq!(stats.input_jacobians, depth - owner - 1);
    assert_eq!(stats.jacobian_products, depth - owner - 2);
}

#[test]
fn deep_chain_jacobian_is_finite_and_fully_shaped() {
    let (network, model) = deep_chain(50);
    let bindings = seeded_bindings(&model);
    let vars = network.variables();
    let x = Vector::filled(WIDTH, 0.25);

    let jac = network.jacobian(&x, &vars, &bindings).unwrap();
    assert_eq!(jac.shape(), (WIDTH, vars.len()));
    assert!(jac.as_slice().iter().all(|v| v.is_finite()));
}
