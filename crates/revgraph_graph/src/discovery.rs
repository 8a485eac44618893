//! Dependency-count discovery.
//!
//! Walks backward from a starting node and counts, per node, how many
//! deliveries the real pass will make to it. Only a node's first arrival
//! walks further, so shared sub-graphs are traversed once while every
//! incoming edge is still counted.

use crate::{
    graph::Graph,
    id::{NodeId, StartingPoint},
};
use log::info;
use rayon::prelude::*;
use revgraph_core::{error::Result, mode::ExecutionMode};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub starting_point: StartingPoint,
    /// Distinct nodes reached.
    pub nodes: usize,
    /// Deliveries counted, the root entry included.
    pub deliveries: usize,
    pub elapsed: Duration,
}

pub fn discover(graph: &Graph, starting_point: StartingPoint, start: NodeId, mode: ExecutionMode) -> Result<DiscoveryReport> {
    let started = Instant::now();
    graph.node(start)?;

    for node in graph.nodes() {
        node.clear_dependency_count(starting_point);
    }
    reset_visits(graph);

    let nodes = AtomicUsize::new(0);
    let deliveries = AtomicUsize::new(0);
    let walk = Walk {
        graph,
        starting_point,
        mode,
        nodes: &nodes,
        deliveries: &deliveries,
    };
    walk.arrive(start)?;
    reset_visits(graph);

    let report = DiscoveryReport {
        starting_point,
        nodes: nodes.load(Ordering::SeqCst),
        deliveries: deliveries.load(Ordering::SeqCst),
        elapsed: started.elapsed(),
    };
    info!(
        "discovered {} nodes and {} deliveries for starting point {} in {:?}",
        report.nodes, report.deliveries, starting_point, report.elapsed
    );
    Ok(report)
}

/// Zeroes every node's visit counter. Safe to call any number of times.
pub fn reset_visits(graph: &Graph) {
    for node in graph.nodes() {
        node.visited_count.store(0, Ordering::SeqCst);
    }
}

struct Walk<'a> {
    graph: &'a Graph,
    starting_point: StartingPoint,
    mode: ExecutionMode,
    nodes: &'a AtomicUsize,
    deliveries: &'a AtomicUsize,
}

impl Walk<'_> {
    fn arrive(&self, id: NodeId) -> Result<()> {
        let node = self.graph.node(id)?;
        node.count_dependency(self.starting_point);
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        if node.visited_count.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(());
        }
        self.nodes.fetch_add(1, Ordering::SeqCst);

        let predecessors: Vec<NodeId> = node.backward_adjacent().iter().flatten().copied().collect();
        match self.mode {
            ExecutionMode::Sequential => predecessors.into_iter().try_for_each(|p| self.arrive(p)),
            ExecutionMode::Parallel => predecessors.into_par_iter().try_for_each(|p| self.arrive(p)),
        }
    }
}
