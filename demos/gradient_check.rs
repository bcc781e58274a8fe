use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_backprop::{Activation, ImageShape, NetworkBuilder, Vector, gradcheck, loss};

fn parse_usize(args: &[String], key: &str, default: usize) -> usize {
    let mut i = 0;
    while i + 1 < args.len() {
        if args[i] == key {
            return args[i + 1]
                .parse::<usize>()
                .unwrap_or_else(|_| panic!("failed to parse {key} as usize"));
        }
        i += 1;
    }
    default
}

fn main() -> rust_backprop::Result<()> {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    let steps = parse_usize(&args, "--steps", 50);
    let hidden = parse_usize(&args, "--hidden", 8);
    let seed = parse_usize(&args, "--seed", 0) as u64;

    // 1x6x6 image -> 2 filters of 3x3 -> 2x2 max-pool -> dense -> 2 outputs.
    let (network, model) = NetworkBuilder::new(36)?
        .add_convolution(ImageShape::new(1, 6, 6)?, 3, 3, 2, Activation::Tanh, true)?
        .add_max_pool(ImageShape::new(2, 4, 4)?, 2, 2)?
        .add_fully_connected(hidden, Activation::Sigmoid, true)?
        .add_fully_connected(2, Activation::Identity, true)?
        .build()?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut bindings = model.create_bindings();
    for v in bindings.as_mut_slice() {
        *v = rng.gen_range(-0.5..0.5);
    }
    let x: Vector = (0..36).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let target = Vector::from([0.25, -0.75]);
    let variables = network.variables();

    println!(
        "network: {} layers, {} parameters",
        network.num_layers(),
        model.size()
    );

    let t0 = Instant::now();
    gradcheck::check(&network, &x, &variables, &bindings)?;
    println!("gradient check passed in {:?}", t0.elapsed());

    let (_, stats) = network.jacobian_with_stats(&x, &variables, &bindings)?;
    println!("backprop stats: {stats:?}");

    let lr = 0.1;
    for step in 0..steps {
        let grad = network.squared_error_gradient(&x, &target, &variables, &bindings)?;
        for (&v, g) in variables.iter().zip(grad.iter()) {
            let value = bindings.get(v)?;
            bindings.put(v, value - lr * g)?;
        }
        if step % 10 == 0 || step + 1 == steps {
            let y = network.evaluate(&x, &bindings)?;
            println!(
                "step {step:>3}: loss={:.6}",
                loss::squared_error_value(&y, &target)
            );
        }
    }

    let predict = network.into_fn(bindings);
    println!("final output: {:?}", predict(&x)?.as_slice());
    Ok(())
}
