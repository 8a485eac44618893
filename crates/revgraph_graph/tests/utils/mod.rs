#![allow(dead_code)]

use revgraph_core::{
    error::Result,
    mode::{parallel_mode, sequential_mode, ExecutionMode},
    tensor::Tensor,
    value::GradientValue,
};
use revgraph_graph::{
    ArchitectureDescription, Graph, GraphBuilder, IntermediateStore, OperationEntry, ParameterStore,
    TimeStepDescription,
};
use revgraph_ops::builtin_registry;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_both_modes<F>(test_fn: F) -> Result<()>
where
    F: Fn(ExecutionMode) -> Result<()>,
{
    init_logger();

    {
        let _guard = sequential_mode();
        test_fn(ExecutionMode::Sequential)?;
    }

    {
        let _guard = parallel_mode();
        test_fn(ExecutionMode::Parallel)?;
    }

    Ok(())
}

pub fn op(op_type: &str, name: &str, inputs: &[&str]) -> OperationEntry {
    OperationEntry::new(op_type).named(name).inputs(inputs.iter().copied())
}

pub fn scale(name: &str, input: &str, factor: f32) -> OperationEntry {
    op("scale", name, &[input]).attr("factor", factor)
}

pub fn tensor(data: &[f32]) -> GradientValue {
    GradientValue::Tensor(Tensor::from_vec(data.to_vec()))
}

pub fn output_gradient(graph: &Graph, node: &str) -> Result<Option<GradientValue>> {
    graph.named(node)?.output_gradient()
}

/// X = identity(x), S = identity(X), M1 = 3S, M2 = 5S, L = M1 + M2 with the
/// weight x = [2].
pub fn diamond() -> Result<Graph> {
    let step = TimeStepDescription::new()
        .start(op("identity", "X", &["x"]))
        .start(op("identity", "S", &["X"]))
        .start(scale("M1", "S", 3.0))
        .start(scale("M2", "S", 5.0))
        .start(op("add", "L", &["M1", "M2"]));

    let parameters = ParameterStore::new();
    parameters.insert_shared("x", Tensor::from_vec(vec![2.0]));

    let registry = builtin_registry();
    GraphBuilder::new(&registry)
        .parameters(parameters)
        .build(&ArchitectureDescription::new().time_step(step))
}

/// One source fanned out to `width` scaled branches (factors 1..=width)
/// that are summed twice: `L1` over every branch, `L2` over all but the
/// first.
pub fn wide(width: usize) -> Result<Graph> {
    let mut step = TimeStepDescription::new()
        .start(op("identity", "X", &["x"]))
        .start(op("tanh", "S", &["X"]));
    let branches: Vec<String> = (1..=width).map(|i| format!("M{}", i)).collect();
    for (i, branch) in branches.iter().enumerate() {
        step = step.start(scale(branch, "S", (i + 1) as f32));
    }
    let all: Vec<&str> = branches.iter().map(String::as_str).collect();
    step = step
        .start(op("add", "L1", &all))
        .start(op("add", "L2", &all[1..]));

    let intermediates = IntermediateStore::new();
    intermediates.insert_shared("x", Tensor::from_vec(vec![0.25, -0.5, 1.0]));

    let registry = builtin_registry();
    GraphBuilder::new(&registry)
        .intermediates(intermediates)
        .build(&ArchitectureDescription::new().time_step(step))
}
