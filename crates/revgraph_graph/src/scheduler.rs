//! Backward pass scheduling.
//!
//! Every arrival at a node computes its local backward result, then enters
//! the node lock to record it. All arrivals but the last one are done at that
//! point: in parallel mode they park on the node's join barrier until the
//! last arrival releases them, in sequential mode they simply return. The
//! last arrival combines the partial results in provenance order, delivers
//! them to the node's destinations and fans out to the predecessors.

use crate::{
    barrier::JoinBarrier,
    discovery::{self, DiscoveryReport},
    graph::Graph,
    id::{NodeId, Provenance, StartingPoint},
    node::{Node, Operand, Phase},
};
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use revgraph_core::{
    accumulate::{accumulate, accumulate_values},
    error::{Error, Result},
    mode::{get_default_execution_mode, ExecutionMode},
    result::BackwardResult,
    value::GradientValue,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

// ────────────────────────────────────────────────────────────────────────────
//  Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SchedulerConfig {
    pub mode: ExecutionMode,
    /// Size of a dedicated worker pool; the global rayon pool when `None`.
    pub num_threads: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: get_default_execution_mode(),
            num_threads: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode, num_threads: None }
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub starting_point: StartingPoint,
    pub mode: ExecutionMode,
    /// Nodes whose combined gradient was propagated.
    pub nodes_propagated: usize,
    /// Deliveries made, the root entry included.
    pub arrivals: usize,
    pub elapsed: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
//  Scheduler
// ────────────────────────────────────────────────────────────────────────────

pub struct BackwardScheduler {
    config: SchedulerConfig,
    pool: Option<rayon::ThreadPool>,
}

impl Default for BackwardScheduler {
    fn default() -> Self {
        Self {
            config: SchedulerConfig::default(),
            pool: None,
        }
    }
}

impl BackwardScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let pool = match config.num_threads {
            Some(num_threads) if config.mode.is_parallel() => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .thread_name(|i| format!("revgraph-backward-{}", i))
                    .build()
                    .map_err(|e| Error::InvalidState(format!("failed to build backward pool: {}", e)))?,
            ),
            _ => None,
        };
        Ok(Self { config, pool })
    }

    pub fn sequential() -> Self {
        Self {
            config: SchedulerConfig::new(ExecutionMode::Sequential),
            pool: None,
        }
    }

    pub fn parallel() -> Self {
        Self {
            config: SchedulerConfig::new(ExecutionMode::Parallel),
            pool: None,
        }
    }

    pub fn with_mode(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Sequential => Self::sequential(),
            ExecutionMode::Parallel => Self::parallel(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    /// Counts the deliveries each node will receive when a pass for
    /// `starting_point` starts at `start`.
    pub fn discover(&self, graph: &Graph, starting_point: StartingPoint, start: NodeId) -> Result<DiscoveryReport> {
        self.install(|| discovery::discover(graph, starting_point, start, self.config.mode))
    }

    /// Runs one backward pass from `start`, seeded with `seed`. The counts
    /// for `starting_point` must have been discovered beforehand.
    pub fn run(
        &self,
        graph: &Graph,
        starting_point: StartingPoint,
        start: NodeId,
        seed: GradientValue,
    ) -> Result<PassReport> {
        let started = Instant::now();
        graph.reset()?;

        let root = graph.node(start)?;
        root.state.lock()?.backward_input = Some(seed.clone());

        let pass = Pass::new(graph, starting_point, self.config.mode);

        debug!(
            "backward pass {} from {} ({} mode)",
            starting_point,
            root.specific_id(),
            self.config.mode.as_str()
        );
        let outcome = self.install(|| pass.visit(start, Provenance::Root, seed));
        if let Err(e) = outcome {
            let first = pass.first_error.lock()?.take().unwrap_or(e);
            warn!("backward pass {} aborted: {}", starting_point, first);
            return Err(first);
        }

        pass.verify()?;

        let report = PassReport {
            starting_point,
            mode: self.config.mode,
            nodes_propagated: pass.propagated.load(Ordering::SeqCst),
            arrivals: pass.arrivals.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };
        info!(
            "backward pass {} propagated {} nodes over {} arrivals in {:?}",
            starting_point, report.nodes_propagated, report.arrivals, report.elapsed
        );
        Ok(report)
    }

    /// Discovery followed by a pass from the graph's last node.
    pub fn backward(&self, graph: &Graph, starting_point: StartingPoint, seed: GradientValue) -> Result<PassReport> {
        let start = graph.last();
        self.discover(graph, starting_point, start)?;
        self.run(graph, starting_point, start, seed)
    }

    fn install<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

impl std::fmt::Debug for BackwardScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackwardScheduler")
            .field("config", &self.config)
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Pass
// ────────────────────────────────────────────────────────────────────────────

struct Pass<'g> {
    graph: &'g Graph,
    starting_point: StartingPoint,
    mode: ExecutionMode,
    aborted: AtomicBool,
    /// Visits that are neither parked on a barrier nor waiting on their own
    /// fan-out. Zero while a waiter holds no permit means nothing is left
    /// that could release it.
    running: AtomicIsize,
    arrivals: AtomicUsize,
    propagated: AtomicUsize,
    first_error: Mutex<Option<Error>>,
    barriers: Mutex<Vec<Arc<JoinBarrier>>>,
}

struct Route {
    to: NodeId,
    provenance: Provenance,
    gradient: GradientValue,
}

enum Arrival {
    /// Another arrival will propagate.
    Waiting(Option<Arc<JoinBarrier>>),
    Last(BackwardResult),
}

impl<'g> Pass<'g> {
    fn new(graph: &'g Graph, starting_point: StartingPoint, mode: ExecutionMode) -> Self {
        Self {
            graph,
            starting_point,
            mode,
            aborted: AtomicBool::new(false),
            running: AtomicIsize::new(1),
            arrivals: AtomicUsize::new(0),
            propagated: AtomicUsize::new(0),
            first_error: Mutex::new(None),
            barriers: Mutex::new(Vec::new()),
        }
    }

    fn visit(&self, id: NodeId, provenance: Provenance, incoming: GradientValue) -> Result<()> {
        let outcome = self.step(id, provenance, incoming);
        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome.map_err(|e| self.fail(e))
    }

    fn step(&self, id: NodeId, provenance: Provenance, incoming: GradientValue) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Error::PassAborted);
        }
        self.arrivals.fetch_add(1, Ordering::SeqCst);

        let node = self.graph.node(id)?;
        let expected = node
            .dependency_count(self.starting_point)
            .ok_or_else(|| Error::NotDiscovered {
                node: node.specific_id().to_string(),
                starting_point: self.starting_point.0,
            })?;

        let local = {
            let operation = node.operation()?;
            node.backward_invocations.fetch_add(1, Ordering::SeqCst);
            operation.backward(&incoming)?
        };

        let combined = match self.record(node, expected, provenance, incoming, local)? {
            Arrival::Waiting(barrier) => {
                if let Some(barrier) = barrier {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                    barrier.wait(|| self.check_progress(node, expected))?;
                }
                return Ok(());
            },
            Arrival::Last(combined) => combined,
        };

        let routes = self.route(node, &combined)?;
        self.deliver(node, &combined)?;
        self.dispatch(routes)?;

        node.state.lock()?.phase = Phase::Propagated;
        self.propagated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// The node's critical section.
    fn record(
        &self,
        node: &Node,
        expected: usize,
        provenance: Provenance,
        incoming: GradientValue,
        local: BackwardResult,
    ) -> Result<Arrival> {
        let mut state = node.state.lock()?;
        if !state.visitors.insert(provenance) {
            return Err(Error::DuplicateVisit {
                node: node.specific_id().to_string(),
                provenance: provenance.to_string(),
            });
        }
        let visited = node.visited_count.fetch_add(1, Ordering::SeqCst) + 1;
        if visited > expected {
            return Err(Error::VisitOverflow {
                node: node.specific_id().to_string(),
                visited,
                expected,
            });
        }

        state.phase = Phase::Accumulating;
        state.incoming.push((provenance, incoming));
        if expected > 1 {
            state.accumulated.push((provenance, local.clone()));
        }

        if visited < expected {
            trace!("{} holds {}/{} arrivals", node.specific_id(), visited, expected);
            let barrier = match self.mode {
                ExecutionMode::Sequential => None,
                ExecutionMode::Parallel => Some(self.barrier_of(&mut state.barrier, expected)?),
            };
            return Ok(Arrival::Waiting(barrier));
        }

        let combined = if expected > 1 {
            if self.mode.is_parallel() {
                let barrier = self.barrier_of(&mut state.barrier, expected)?;
                self.running.fetch_add((expected - 1) as isize, Ordering::SeqCst);
                barrier.release(expected - 1)?;
            }
            if state.accumulated.len() != expected {
                return Err(Error::AccumulationMismatch {
                    node: node.specific_id().to_string(),
                    accumulated: state.accumulated.len(),
                    expected,
                });
            }
            state.accumulated.sort_by_key(|(provenance, _)| *provenance);
            debug!("{} combines {} partial gradients", node.specific_id(), expected);
            accumulate(state.accumulated.iter().map(|(_, part)| part))?
        } else {
            local
        };

        state.incoming.sort_by_key(|(provenance, _)| *provenance);
        state.output_gradient = Some(accumulate_values(state.incoming.iter().map(|(_, value)| value))?);
        state.calculated = Some(combined.clone());
        state.phase = Phase::Ready;
        Ok(Arrival::Last(combined))
    }

    fn barrier_of(&self, slot: &mut Option<Arc<JoinBarrier>>, parties: usize) -> Result<Arc<JoinBarrier>> {
        if let Some(barrier) = slot {
            return Ok(Arc::clone(barrier));
        }
        let barrier = Arc::new(JoinBarrier::new(parties));
        self.barriers.lock()?.push(Arc::clone(&barrier));
        *slot = Some(Arc::clone(&barrier));
        Ok(barrier)
    }

    fn check_progress(&self, node: &Node, expected: usize) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Error::PassAborted);
        }
        if self.running.load(Ordering::SeqCst) <= 0 {
            return Err(Error::AccumulationStalled {
                node: node.specific_id().to_string(),
                visited: node.visited_count(),
                expected,
            });
        }
        Ok(())
    }

    /// Hands the combined result to the node's sinks and the gradients that
    /// line up with weight operands to the graph's buffers. The layout has
    /// already been checked by `route`.
    fn deliver(&self, node: &Node, combined: &BackwardResult) -> Result<()> {
        for sink in node.destinations.read()?.iter() {
            sink.deliver(node.id(), node.specific_id(), combined)?;
        }

        for (slot, operand) in node.operands().iter().enumerate() {
            let Operand::Weight(key) = operand else {
                continue;
            };
            let gradient = if combined.has_multiple_inputs() {
                combined.entries()[slot].clone()
            } else {
                combined.gradient()?.clone()
            };
            self.graph.gradients().accumulate(key, node.id(), slot, &gradient)?;
            trace!("{} slot {} -> weight {}", node.specific_id(), slot, key);
        }
        Ok(())
    }

    fn route(&self, node: &Node, combined: &BackwardResult) -> Result<Vec<Route>> {
        let adjacent = node.backward_adjacent();
        let mismatch = |entries: usize| Error::RoutingMismatch {
            node: node.specific_id().to_string(),
            entries,
            adjacent: adjacent.len(),
        };

        if combined.has_multiple_inputs() {
            if combined.len() != adjacent.len() {
                return Err(mismatch(combined.len()));
            }
            Ok(adjacent
                .iter()
                .zip(combined.entries())
                .enumerate()
                .filter_map(|(slot, (target, gradient))| {
                    target.map(|to| Route {
                        to,
                        provenance: Provenance::edge(node.id(), slot),
                        gradient: gradient.clone(),
                    })
                })
                .collect())
        } else {
            if combined.len() != 1 {
                return Err(mismatch(combined.len()));
            }
            let gradient = combined.gradient()?;
            Ok(adjacent
                .iter()
                .enumerate()
                .filter_map(|(slot, target)| {
                    target.map(|to| Route {
                        to,
                        provenance: Provenance::edge(node.id(), slot),
                        gradient: gradient.clone(),
                    })
                })
                .collect())
        }
    }

    fn dispatch(&self, routes: Vec<Route>) -> Result<()> {
        if routes.is_empty() {
            return Ok(());
        }
        for route in &routes {
            trace!("dispatch {} -> {}", route.provenance, route.to);
        }

        // The dispatched visits count as running, this one does not until
        // they have all returned.
        self.running.fetch_add(routes.len() as isize - 1, Ordering::SeqCst);
        let outcome = match self.mode {
            ExecutionMode::Sequential => routes
                .into_iter()
                .try_for_each(|route| self.visit(route.to, route.provenance, route.gradient)),
            // One job per route: a route parked on a barrier must not hold
            // back siblings sharing its rayon leaf.
            ExecutionMode::Parallel => routes
                .into_par_iter()
                .with_max_len(1)
                .try_for_each(|route| self.visit(route.to, route.provenance, route.gradient)),
        };
        self.running.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn fail(&self, error: Error) -> Error {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            warn!("aborting backward pass {}: {}", self.starting_point, error);
        }
        if let Ok(mut first) = self.first_error.lock() {
            if first.is_none() && error != Error::PassAborted {
                *first = Some(error.clone());
            }
        }
        if let Ok(barriers) = self.barriers.lock() {
            barriers.iter().for_each(|barrier| barrier.interrupt());
        }
        error
    }

    /// Every node discovered for this starting point must have received all
    /// of its deliveries.
    fn verify(&self) -> Result<()> {
        for node in self.graph.nodes() {
            let Some(expected) = node.dependency_count(self.starting_point) else {
                continue;
            };
            let visited = node.visited_count();
            if visited != expected {
                return Err(Error::IncompletePass {
                    node: node.specific_id().to_string(),
                    visited,
                    expected,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::GraphBuilder,
        description::{ArchitectureDescription, OperationEntry, TimeStepDescription},
        operation::Operation,
        registry::OperationRegistry,
        store::IntermediateStore,
    };

    /// Passes its operand through and hands `fan` copies of the gradient back.
    struct Relay {
        fan: usize,
    }

    impl Operation for Relay {
        fn op_type(&self) -> &str {
            "relay"
        }

        fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
            operands
                .first()
                .cloned()
                .ok_or_else(|| Error::InvalidState("relay needs an operand".into()))
        }

        fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
            Ok(match self.fan {
                1 => BackwardResult::single(output_gradient.clone()),
                n => BackwardResult::multiple(vec![output_gradient.clone(); n]),
            })
        }
    }

    fn relay_graph(entries: Vec<OperationEntry>) -> Result<Graph> {
        let mut registry = OperationRegistry::new();
        registry.register("relay", |entry| {
            let fan = entry.attribute("fan").map_or(1, |fan| fan as usize);
            Ok(Box::new(Relay { fan }) as Box<dyn Operation>)
        });
        let intermediates = IntermediateStore::new();
        intermediates.insert_shared("x", 1.0);

        let step = entries.into_iter().fold(TimeStepDescription::new(), TimeStepDescription::start);
        GraphBuilder::new(&registry)
            .intermediates(intermediates)
            .build(&ArchitectureDescription::new().time_step(step))
    }

    fn relay(name: &str, input: &str) -> OperationEntry {
        OperationEntry::new("relay").named(name).input(input)
    }

    #[test]
    fn repeated_provenance_is_rejected() -> Result<()> {
        let graph = relay_graph(vec![relay("a", "x"), relay("b", "a")])?;
        let a = graph.named("a_0")?;
        a.count_dependency(StartingPoint(0));
        a.count_dependency(StartingPoint(0));

        let pass = Pass::new(&graph, StartingPoint(0), ExecutionMode::Sequential);
        let from_b = Provenance::edge(NodeId(1), 0);
        pass.visit(a.id(), from_b, GradientValue::Scalar(1.0))?;
        assert_eq!(a.phase()?, Phase::Accumulating);
        assert!(a.state.lock()?.barrier.is_none());

        let err = pass.visit(a.id(), from_b, GradientValue::Scalar(1.0)).unwrap_err();
        assert!(matches!(err, Error::DuplicateVisit { .. }));
        assert!(err.is_invariant_violation());
        assert_eq!(a.visited_count(), 1);
        Ok(())
    }

    #[test]
    fn arrivals_beyond_the_count_overflow() -> Result<()> {
        let graph = relay_graph(vec![relay("a", "x"), relay("b", "a"), relay("c", "a")])?;
        let a = graph.named("a_0")?;
        a.count_dependency(StartingPoint(0));

        let pass = Pass::new(&graph, StartingPoint(0), ExecutionMode::Sequential);
        pass.visit(a.id(), Provenance::edge(NodeId(1), 0), GradientValue::Scalar(1.0))?;
        assert_eq!(a.phase()?, Phase::Propagated);

        let err = pass
            .visit(a.id(), Provenance::edge(NodeId(2), 0), GradientValue::Scalar(1.0))
            .unwrap_err();
        assert_eq!(
            err,
            Error::VisitOverflow {
                node: "a_0".into(),
                visited: 2,
                expected: 1
            }
        );
        Ok(())
    }

    #[test]
    fn entry_count_must_match_predecessors() -> Result<()> {
        let graph = relay_graph(vec![relay("a", "x"), relay("b", "a").attr("fan", 3.0)])?;
        graph.forward()?;

        for scheduler in [BackwardScheduler::sequential(), BackwardScheduler::parallel()] {
            let err = scheduler
                .backward(&graph, StartingPoint(0), GradientValue::Scalar(1.0))
                .unwrap_err();
            assert_eq!(
                err,
                Error::RoutingMismatch {
                    node: "b_0".into(),
                    entries: 3,
                    adjacent: 1
                }
            );
            assert_eq!(graph.named("a_0")?.backward_invocations(), 0);
        }
        Ok(())
    }

    #[test]
    fn parallel_pass_parks_early_arrivals() -> Result<()> {
        let graph = relay_graph(vec![relay("a", "x"), relay("b", "a"), relay("c", "a")])?;
        let a = graph.named("a_0")?;
        a.count_dependency(StartingPoint(0));
        a.count_dependency(StartingPoint(0));

        let pass = Pass::new(&graph, StartingPoint(0), ExecutionMode::Parallel);
        // as if dispatched by a node with two routes
        pass.running.fetch_add(1, Ordering::SeqCst);
        let (first, second) = rayon::join(
            || pass.visit(a.id(), Provenance::edge(NodeId(1), 0), GradientValue::Scalar(1.0)),
            || pass.visit(a.id(), Provenance::edge(NodeId(2), 0), GradientValue::Scalar(2.0)),
        );
        first?;
        second?;

        assert_eq!(a.phase()?, Phase::Propagated);
        assert_eq!(a.output_gradient()?, Some(GradientValue::Scalar(3.0)));
        assert_eq!(a.backward_invocations(), 2);
        assert_eq!(pass.propagated.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn config_builds_a_dedicated_pool() -> Result<()> {
        let scheduler = BackwardScheduler::new(SchedulerConfig::new(ExecutionMode::Parallel).num_threads(2))?;
        assert!(scheduler.pool.is_some());
        let sequential = BackwardScheduler::new(SchedulerConfig::new(ExecutionMode::Sequential).num_threads(2))?;
        assert!(sequential.pool.is_none());
        Ok(())
    }
}
