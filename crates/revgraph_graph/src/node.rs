use crate::{
    barrier::JoinBarrier,
    id::{InputRef, NodeId, Position, Provenance, SpecificId, StartingPoint},
    operation::Operation,
    store::{GradientSink, ValueKey},
};
use dashmap::DashMap;
use revgraph_core::{
    checkpoint::{CheckpointId, CheckpointSlots},
    error::Result,
    result::BackwardResult,
    value::GradientValue,
};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard,
    },
};

/// What a declared input resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Node(NodeId),
    Weight(ValueKey),
    Intermediate(ValueKey),
}

impl Operand {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn weight(&self) -> Option<&ValueKey> {
        match self {
            Self::Weight(key) => Some(key),
            _ => None,
        }
    }
}

/// Where a node stands in the current backward pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Unvisited,
    /// At least one delivery arrived, more are expected.
    Accumulating,
    /// All deliveries combined into the calculated gradient.
    Ready,
    /// Every predecessor has been dispatched and has returned.
    Propagated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unvisited => "unvisited",
            Self::Accumulating => "accumulating",
            Self::Ready => "ready",
            Self::Propagated => "propagated",
        }
    }
}

/// Per-pass mutable state, guarded by the node lock.
#[derive(Default)]
pub(crate) struct PassState {
    pub phase: Phase,
    pub visitors: BTreeSet<Provenance>,
    pub accumulated: Vec<(Provenance, BackwardResult)>,
    pub incoming: Vec<(Provenance, GradientValue)>,
    pub output_gradient: Option<GradientValue>,
    pub calculated: Option<BackwardResult>,
    pub barrier: Option<Arc<JoinBarrier>>,
    pub backward_input: Option<GradientValue>,
}

pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) specific_id: SpecificId,
    pub(crate) op_type: String,
    pub(crate) inputs: Vec<InputRef>,
    pub(crate) operands: Vec<Operand>,
    pub(crate) backward_adjacent: Vec<Option<NodeId>>,
    pub(crate) outputs: Vec<NodeId>,
    pub(crate) next: Option<NodeId>,

    pub(crate) operation: RwLock<Box<dyn Operation>>,
    pub(crate) forward_output: RwLock<Option<GradientValue>>,
    pub(crate) saved_outputs: CheckpointSlots<Option<GradientValue>>,

    pub(crate) dependency_counts: DashMap<StartingPoint, usize>,
    pub(crate) visited_count: AtomicUsize,
    pub(crate) backward_invocations: AtomicUsize,
    pub(crate) state: Mutex<PassState>,
    pub(crate) destinations: RwLock<Vec<Arc<dyn GradientSink>>>,
}

impl Node {
    pub(crate) fn new(id: NodeId, specific_id: SpecificId, inputs: Vec<InputRef>, operation: Box<dyn Operation>) -> Self {
        Self {
            id,
            specific_id,
            op_type: operation.op_type().to_string(),
            inputs,
            operands: Vec::new(),
            backward_adjacent: Vec::new(),
            outputs: Vec::new(),
            next: None,
            operation: RwLock::new(operation),
            forward_output: RwLock::new(None),
            saved_outputs: CheckpointSlots::new(),
            dependency_counts: DashMap::new(),
            visited_count: AtomicUsize::new(0),
            backward_invocations: AtomicUsize::new(0),
            state: Mutex::new(PassState::default()),
            destinations: RwLock::new(Vec::new()),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Structure
    // ────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn specific_id(&self) -> &SpecificId {
        &self.specific_id
    }

    pub fn name(&self) -> &str {
        self.specific_id.name()
    }

    pub fn position(&self) -> Position {
        self.specific_id.position()
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn inputs(&self) -> &[InputRef] {
        &self.inputs
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Gradient targets aligned with `inputs`; `None` for weights and
    /// intermediates.
    pub fn backward_adjacent(&self) -> &[Option<NodeId>] {
        &self.backward_adjacent
    }

    /// Consumers of this node's forward output.
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    pub fn operation(&self) -> Result<RwLockReadGuard<'_, Box<dyn Operation>>> {
        Ok(self.operation.read()?)
    }

    pub fn forward_output(&self) -> Result<Option<GradientValue>> {
        Ok(self.forward_output.read()?.clone())
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Traversal state
    // ────────────────────────────────────────────────────────────────────────

    pub fn dependency_count(&self, starting_point: StartingPoint) -> Option<usize> {
        self.dependency_counts.get(&starting_point).map(|count| *count)
    }

    pub fn visited_count(&self) -> usize {
        self.visited_count.load(Ordering::SeqCst)
    }

    pub fn backward_invocations(&self) -> usize {
        self.backward_invocations.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Result<Phase> {
        Ok(self.state.lock()?.phase)
    }

    /// The combined backward result of the current pass.
    pub fn calculated_gradient(&self) -> Result<Option<BackwardResult>> {
        Ok(self.state.lock()?.calculated.clone())
    }

    /// The summed gradient with respect to this node's output.
    pub fn output_gradient(&self) -> Result<Option<GradientValue>> {
        Ok(self.state.lock()?.output_gradient.clone())
    }

    /// The gradient the pass was seeded with, on the node it started from.
    pub fn backward_input(&self) -> Result<Option<GradientValue>> {
        Ok(self.state.lock()?.backward_input.clone())
    }

    pub fn add_destination(&self, sink: Arc<dyn GradientSink>) -> Result<()> {
        self.destinations.write()?.push(sink);
        Ok(())
    }

    pub fn clear_destinations(&self) -> Result<()> {
        self.destinations.write()?.clear();
        Ok(())
    }

    pub(crate) fn clear_dependency_count(&self, starting_point: StartingPoint) {
        self.dependency_counts.remove(&starting_point);
    }

    pub(crate) fn count_dependency(&self, starting_point: StartingPoint) {
        *self.dependency_counts.entry(starting_point).or_insert(0) += 1;
    }

    /// Clears per-pass state; structure, dependency counts, destinations and
    /// forward state survive.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        *state = PassState::default();
        self.visited_count.store(0, Ordering::SeqCst);
        self.backward_invocations.store(0, Ordering::SeqCst);
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Forward state
    // ────────────────────────────────────────────────────────────────────────

    pub(crate) fn evaluate(&self, operands: &[GradientValue]) -> Result<GradientValue> {
        let output = self.operation.write()?.forward(operands)?;
        *self.forward_output.write()? = Some(output.clone());
        Ok(output)
    }

    pub(crate) fn store(&self, checkpoint: CheckpointId) -> Result<()> {
        self.operation.write()?.store(checkpoint)?;
        self.saved_outputs.store(checkpoint, self.forward_output()?);
        Ok(())
    }

    pub(crate) fn restore(&self, checkpoint: CheckpointId) -> Result<()> {
        self.operation.write()?.restore(checkpoint)?;
        let output = self.saved_outputs.restore(&self.op_type, checkpoint)?;
        *self.forward_output.write()? = output;
        Ok(())
    }

    pub(crate) fn clear_forward_state(&self) -> Result<()> {
        self.operation.write()?.reset();
        *self.forward_output.write()? = None;
        self.saved_outputs.clear();
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("specific_id", &self.specific_id.to_string())
            .field("op_type", &self.op_type)
            .field("operands", &self.operands)
            .field("backward_adjacent", &self.backward_adjacent)
            .field("outputs", &self.outputs)
            .field("next", &self.next)
            .finish()
    }
}
