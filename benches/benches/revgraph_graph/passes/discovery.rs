use super::{fan_in, unrolled, DEPTHS, WIDTHS};
use criterion::{black_box, Criterion};
use revgraph_core::mode::ExecutionMode;
use revgraph_graph::{BackwardScheduler, StartingPoint};

pub fn basic(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("discovery/basic");
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    let graphs = WIDTHS
        .iter()
        .map(|&(width, size_name)| (format!("fan_in/{}", size_name), fan_in(width).unwrap()))
        .chain(
            DEPTHS
                .iter()
                .map(|&(depth, size_name)| (format!("unrolled/{}", size_name), unrolled(depth).unwrap())),
        )
        .collect::<Vec<_>>();

    for (name, graph) in &graphs {
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
            let scheduler = BackwardScheduler::with_mode(mode);
            let bench_name = format!("{}/{}", name, mode.as_str());
            group.bench_function(&bench_name, |b| {
                b.iter(|| black_box(scheduler.discover(graph, StartingPoint(0), graph.last())).unwrap())
            });
        }
    }

    group.finish();
}
