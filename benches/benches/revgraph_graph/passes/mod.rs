mod discovery;
mod scheduler;

use criterion::criterion_group;
use revgraph_core::{error::Result, tensor::Tensor};
use revgraph_graph::{
    ArchitectureDescription, Graph, GraphBuilder, IntermediateStore, LayerDescription, OperationEntry,
    ParameterStore, TimeStepDescription,
};
use revgraph_ops::builtin_registry;

// Constants for benchmark graph sizes
const WIDTHS: [(usize, &str); 2] = [(8, "small"), (64, "medium")];
const DEPTHS: [(usize, &str); 2] = [(16, "small"), (128, "medium")];

fn op(op_type: &str, name: &str, inputs: &[&str]) -> OperationEntry {
    OperationEntry::new(op_type).named(name).inputs(inputs.iter().copied())
}

/// One tanh source fanned out to `width` scaled branches summed at the end.
pub(crate) fn fan_in(width: usize) -> Result<Graph> {
    let mut step = TimeStepDescription::new()
        .start(op("identity", "X", &["x"]))
        .start(op("tanh", "S", &["X"]));
    let branches: Vec<String> = (0..width).map(|i| format!("M{}", i)).collect();
    for (i, branch) in branches.iter().enumerate() {
        step = step.start(op("scale", branch, &["S"]).attr("factor", 1.0 + i as f32 / width as f32));
    }
    let all: Vec<&str> = branches.iter().map(String::as_str).collect();
    step = step.start(op("add", "L", &all));

    let intermediates = IntermediateStore::new();
    intermediates.insert_shared("x", Tensor::from_vec((0..256).map(|i| (i % 10) as f32 / 10.0).collect()));

    let registry = builtin_registry();
    let graph = GraphBuilder::new(&registry)
        .intermediates(intermediates)
        .build(&ArchitectureDescription::new().time_step(step))?;
    graph.forward()?;
    Ok(graph)
}

/// A recurrent cell `h = tanh(x + h[t-1] * w)` unrolled `depth` times.
pub(crate) fn unrolled(depth: usize) -> Result<Graph> {
    let template = TimeStepDescription::new()
        .start(op("identity", "xin", &["x"]))
        .layer(
            LayerDescription::new("cell")
                .entry(op("mul", "hw", &["h[t-1]", "w"]))
                .entry(op("add", "pre", &["xin", "hw"]))
                .entry(op("tanh", "h", &["pre"])),
        );

    let parameters = ParameterStore::new();
    parameters.insert_shared("w", Tensor::from_vec(vec![0.5; 64]));
    let intermediates = IntermediateStore::new();
    intermediates.insert_shared("x", Tensor::from_vec(vec![0.1; 64]));
    intermediates.insert_shared("h", Tensor::zeros(&[64]));

    let registry = builtin_registry();
    let graph = GraphBuilder::new(&registry)
        .parameters(parameters)
        .intermediates(intermediates)
        .build(&ArchitectureDescription::repeated(template, depth))?;
    graph.forward()?;
    Ok(graph)
}

criterion_group!(benches, scheduler::basic, discovery::basic);
