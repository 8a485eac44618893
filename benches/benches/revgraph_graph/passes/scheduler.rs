use super::{fan_in, unrolled, DEPTHS, WIDTHS};
use criterion::{black_box, Criterion};
use revgraph_core::{error::Result, mode::ExecutionMode, tensor::Tensor, value::GradientValue};
use revgraph_graph::{BackwardScheduler, Graph, StartingPoint};

const MODES: [ExecutionMode; 2] = [ExecutionMode::Sequential, ExecutionMode::Parallel];

// Discovery runs once outside the timed loop; each iteration is one pass
fn bench_pass(b: &mut criterion::Bencher, graph: &Graph, mode: ExecutionMode, seed: &GradientValue) {
    let scheduler = BackwardScheduler::with_mode(mode);
    let start = graph.last();
    scheduler.discover(graph, StartingPoint(0), start).unwrap();

    b.iter(|| black_box(scheduler.run(graph, StartingPoint(0), start, seed.clone())).unwrap())
}

fn seed_like(graph: &Graph) -> Result<GradientValue> {
    let last = graph.node(graph.last())?;
    Ok(last
        .forward_output()?
        .map(|output| output.ones_like())
        .unwrap_or_else(|| GradientValue::Tensor(Tensor::from(1.0))))
}

pub fn basic(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("scheduler/basic");
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    for &(width, size_name) in &WIDTHS {
        let graph = fan_in(width).unwrap();
        let seed = seed_like(&graph).unwrap();
        for mode in MODES {
            let bench_name = format!("fan_in/{}/{}", mode.as_str(), size_name);
            group.bench_function(&bench_name, |b| bench_pass(b, &graph, mode, &seed));
        }
    }

    for &(depth, size_name) in &DEPTHS {
        let graph = unrolled(depth).unwrap();
        let seed = seed_like(&graph).unwrap();
        for mode in MODES {
            let bench_name = format!("unrolled/{}/{}", mode.as_str(), size_name);
            group.bench_function(&bench_name, |b| bench_pass(b, &graph, mode, &seed));
        }
    }

    group.finish();
}
