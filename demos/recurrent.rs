//! An unrolled recurrence `h_t = tanh(x_t + h_{t-1} * w)` with a weight shared
//! across every step.

use revgraph::prelude::*;

const STEPS: usize = 5;

fn main() -> Result<()> {
    env_logger::init();

    let template = TimeStepDescription::new()
        .start(OperationEntry::new("identity").named("xin").input("x"))
        .layer(
            LayerDescription::new("cell")
                .entry(OperationEntry::new("mul").named("hw").inputs(["h[t-1]", "w"]))
                .entry(OperationEntry::new("add").named("pre").inputs(["xin", "hw"]))
                .entry(OperationEntry::new("tanh").named("h").input("pre")),
        )
        .end(OperationEntry::new("identity").named("out").input("h"));

    let parameters = ParameterStore::new();
    parameters.insert_shared("w", Tensor::from_vec(vec![0.7, -0.2]));
    let intermediates = IntermediateStore::new();
    intermediates.insert_shared("h", Tensor::zeros(&[2]));
    for t in 0..STEPS {
        let x = t as f32 / STEPS as f32;
        intermediates.insert_at("x", Position::time_step(t), Tensor::from_vec(vec![x, 1.0 - x]));
    }

    let registry = builtin_registry();
    let graph = GraphBuilder::new(&registry)
        .config(BuilderConfig::new().reject_unused_weights(true))
        .parameters(parameters)
        .intermediates(intermediates)
        .build(&ArchitectureDescription::repeated(template, STEPS))?;
    println!("built {} nodes", graph.len());

    let output = graph.forward()?;
    println!("h_{} = {:?}", STEPS - 1, output);

    let scheduler = BackwardScheduler::new(SchedulerConfig::new(ExecutionMode::Parallel).num_threads(4))?;
    let report = scheduler.backward(&graph, StartingPoint(0), output.ones_like())?;
    println!("propagated {} nodes in {:?}", report.nodes_propagated, report.elapsed);

    for t in 0..STEPS {
        let h = graph.named(&format!("h_{}_0", t))?;
        println!("dOut/dh_{} = {:?}", t, h.output_gradient()?);
    }
    println!("dOut/dw = {:?}", graph.gradients().get_shared("w")?);
    Ok(())
}
