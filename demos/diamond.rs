//! Shared-input diamond: one value feeds two branches that are summed again.
//!
//! Run with `RUST_LOG=debug` to watch the scheduler combine the two partial
//! gradients at `S`.

use revgraph::prelude::*;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let step = TimeStepDescription::new()
        .start(OperationEntry::new("identity").named("X").input("x"))
        .start(OperationEntry::new("tanh").named("S").input("X"))
        .start(OperationEntry::new("scale").named("M1").input("S").attr("factor", 3.0))
        .start(OperationEntry::new("scale").named("M2").input("S").attr("factor", 5.0))
        .start(OperationEntry::new("add").named("L").inputs(["M1", "M2"]));

    let parameters = ParameterStore::new();
    parameters.insert_shared("x", Tensor::from_vec(vec![0.5, -1.0, 2.0]));

    let registry = builtin_registry();
    let graph = GraphBuilder::new(&registry)
        .parameters(parameters)
        .build(&ArchitectureDescription::new().time_step(step))?;
    let output = graph.forward()?;
    println!("forward: {:?}", output);

    let sink = Arc::new(CollectingSink::new());
    graph.add_destination(graph.named("S_0")?.id(), sink.clone())?;

    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let scheduler = BackwardScheduler::with_mode(mode);
        let report = scheduler.backward(&graph, StartingPoint(0), output.ones_like())?;
        println!(
            "{}: {} nodes, {} arrivals in {:?}",
            mode.as_str(),
            report.nodes_propagated,
            report.arrivals,
            report.elapsed
        );
        println!("  dL/dS = {:?}", graph.named("S_0")?.output_gradient()?);
    }

    for (node, name, result) in sink.take()? {
        println!("sink saw {} ({}): {:?}", name, node, result.entries());
    }
    println!("dL/dx = {:?}", graph.gradients().get_shared("x")?);
    Ok(())
}
