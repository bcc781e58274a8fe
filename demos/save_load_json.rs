use rust_backprop::{Activation, NetworkBuilder, NetworkSnapshot, Vector};

fn main() -> rust_backprop::Result<()> {
    env_logger::init();

    let (network, model) = NetworkBuilder::new(3)?
        .add_fully_connected(4, Activation::Tanh, true)?
        .add_fully_connected(1, Activation::Sigmoid, false)?
        .build()?;
    let mut bindings = model.create_bindings();
    for (i, v) in bindings.as_mut_slice().iter_mut().enumerate() {
        *v = (i as f64 * 0.7).sin() * 0.5;
    }

    let path = std::env::temp_dir().join("rust_backprop_snapshot.json");
    NetworkSnapshot::capture(&network, &bindings)?.save_json(&path)?;
    println!("saved to {}", path.display());

    let (restored, _, restored_bindings) = NetworkSnapshot::load_json(&path)?.restore()?;
    let x = Vector::from([0.2, -0.1, 0.4]);
    let before = network.evaluate(&x, &bindings)?;
    let after = restored.evaluate(&x, &restored_bindings)?;
    assert_eq!(before, after);
    println!("output before save: {:?}", before.as_slice());
    println!("output after load:  {:?}", after.as_slice());
    Ok(())
}
