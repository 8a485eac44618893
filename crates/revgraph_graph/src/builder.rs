use crate::{
    description::{ArchitectureDescription, LayerEntry, OperationEntry},
    graph::Graph,
    id::{InputRef, NodeId, Position, SpecificId},
    node::{Node, Operand},
    registry::OperationRegistry,
    store::{GradientBuffers, IntermediateStore, ParameterStore, ValueKey},
};
use log::{debug, trace};
use revgraph_core::error::{Error, Result};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

/// Resolves an input nothing else could, typically a reference into another
/// time step. Returns a node that precedes the consumer in the forward chain.
pub type OperationFinder = Arc<dyn Fn(&InputRef, &Position, &NodeLookup<'_>) -> Option<NodeId> + Send + Sync>;

#[derive(Clone, Default)]
pub struct BuilderConfig {
    repeats: HashMap<String, usize>,
    finders: Vec<OperationFinder>,
    reject_unused_weights: bool,
}

impl BuilderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the repeat count of every layer or nested layer named `layer`.
    pub fn repeat(mut self, layer: impl Into<String>, count: usize) -> Self {
        self.repeats.insert(layer.into(), count);
        self
    }

    pub fn finder<F>(mut self, finder: F) -> Self
    where
        F: Fn(&InputRef, &Position, &NodeLookup<'_>) -> Option<NodeId> + Send + Sync + 'static,
    {
        self.finders.push(Arc::new(finder));
        self
    }

    pub fn reject_unused_weights(mut self, reject: bool) -> Self {
        self.reject_unused_weights = reject;
        self
    }

    fn repeat_of(&self, layer: &str, declared: usize) -> usize {
        self.repeats.get(layer).copied().unwrap_or(declared)
    }
}

impl std::fmt::Debug for BuilderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderConfig")
            .field("repeats", &self.repeats)
            .field("finders", &self.finders.len())
            .field("reject_unused_weights", &self.reject_unused_weights)
            .finish()
    }
}

/// Read-only view of the instantiated nodes handed to finders.
pub struct NodeLookup<'a> {
    index: &'a HashMap<SpecificId, NodeId>,
    by_name: &'a HashMap<String, Vec<NodeId>>,
    positions: &'a [Position],
}

impl NodeLookup<'_> {
    /// The node declared as `name` at exactly `position`.
    pub fn find(&self, name: &str, position: Position) -> Option<NodeId> {
        self.index.get(&SpecificId::new(name, position)).copied()
    }

    /// The node declared as `name` at `position` or its nearest enclosing scope.
    pub fn find_outward(&self, name: &str, position: Position) -> Option<NodeId> {
        position.outward().into_iter().find_map(|scope| self.find(name, scope))
    }

    /// The most recent node named `name` in `time_step` that precedes `before`.
    pub fn latest_before(&self, name: &str, time_step: usize, before: NodeId) -> Option<NodeId> {
        self.by_name.get(name).and_then(|ids| {
            ids.iter()
                .rev()
                .find(|id| **id < before && self.positions[id.0].time_step == time_step)
                .copied()
        })
    }

    /// Every instantiation of `name`, in forward order.
    pub fn all(&self, name: &str) -> &[NodeId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Turns an `ArchitectureDescription` into a wired `Graph`.
pub struct GraphBuilder<'r> {
    registry: &'r OperationRegistry,
    config: BuilderConfig,
    parameters: ParameterStore,
    intermediates: IntermediateStore,
}

struct Declared<'d> {
    entry: &'d OperationEntry,
    position: Position,
}

impl<'r> GraphBuilder<'r> {
    pub fn new(registry: &'r OperationRegistry) -> Self {
        Self {
            registry,
            config: BuilderConfig::default(),
            parameters: ParameterStore::new(),
            intermediates: IntermediateStore::new(),
        }
    }

    pub fn config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn parameters(mut self, parameters: ParameterStore) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn intermediates(mut self, intermediates: IntermediateStore) -> Self {
        self.intermediates = intermediates;
        self
    }

    /// Instantiates every declared operation, then resolves their inputs.
    /// Any failure discards the partially wired nodes.
    pub fn build(self, description: &ArchitectureDescription) -> Result<Graph> {
        let declared = self.flatten(description);
        if declared.is_empty() {
            return Err(Error::EmptyArchitecture);
        }

        let mut nodes = Vec::with_capacity(declared.len());
        let mut index = HashMap::with_capacity(declared.len());
        let mut by_name: HashMap<String, Vec<NodeId>> = HashMap::new();

        for (i, Declared { entry, position }) in declared.iter().enumerate() {
            let id = NodeId(i);
            let specific_id = SpecificId::new(entry.binding_name(), *position);
            if index.contains_key(&specific_id) {
                return Err(Error::DuplicateNode(specific_id.to_string()));
            }
            let inputs = entry
                .inputs
                .iter()
                .map(|raw| InputRef::parse(raw))
                .collect::<Result<Vec<_>>>()?;
            let operation = self.registry.create(entry)?;
            trace!("instantiated {} as {} ({})", entry.op_type, specific_id, id);

            index.insert(specific_id.clone(), id);
            by_name.entry(entry.binding_name().to_string()).or_default().push(id);
            nodes.push(Node::new(id, specific_id, inputs, operation));
        }

        for i in 1..nodes.len() {
            nodes[i - 1].next = Some(NodeId(i));
        }

        let positions: Vec<Position> = declared.iter().map(|d| d.position).collect();
        let lookup = NodeLookup {
            index: &index,
            by_name: &by_name,
            positions: &positions,
        };

        let mut resolved = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let operands = node
                .inputs
                .iter()
                .map(|input| self.resolve(node, input, &lookup))
                .collect::<Result<Vec<_>>>()?;
            resolved.push(operands);
        }

        for (consumer, operands) in resolved.into_iter().enumerate() {
            for operand in &operands {
                if let Operand::Node(producer) = operand {
                    let outputs = &mut nodes[producer.0].outputs;
                    if !outputs.contains(&NodeId(consumer)) {
                        outputs.push(NodeId(consumer));
                    }
                }
            }
            let node = &mut nodes[consumer];
            node.backward_adjacent = operands.iter().map(Operand::node).collect();
            node.operands = operands;
        }

        if self.config.reject_unused_weights {
            let used: BTreeSet<&ValueKey> = nodes
                .iter()
                .flat_map(|node| node.operands.iter().filter_map(Operand::weight))
                .collect();
            if let Some(unused) = self.parameters.keys().into_iter().find(|key| !used.contains(key)) {
                return Err(Error::UnusedWeight(unused.to_string()));
            }
        }

        let last = NodeId(nodes.len() - 1);
        debug!(
            "built graph: {} nodes over {} time steps, {} weights",
            nodes.len(),
            description.time_steps.len(),
            self.parameters.len()
        );

        Ok(Graph {
            nodes,
            index,
            start: NodeId(0),
            last,
            parameters: self.parameters,
            intermediates: self.intermediates,
            gradients: GradientBuffers::new(),
        })
    }

    fn flatten<'d>(&self, description: &'d ArchitectureDescription) -> Vec<Declared<'d>> {
        let mut declared = Vec::new();
        for (t, step) in description.time_steps.iter().enumerate() {
            let here = Position::time_step(t);
            declared.extend(step.start_operations.iter().map(|entry| Declared { entry, position: here }));

            let mut layer = 0;
            for layer_desc in &step.layers {
                for _ in 0..self.config.repeat_of(&layer_desc.name, layer_desc.repeat) {
                    let mut nested = 0;
                    for layer_entry in &layer_desc.entries {
                        match layer_entry {
                            LayerEntry::Operation(entry) => declared.push(Declared {
                                entry,
                                position: Position::layer(t, layer),
                            }),
                            LayerEntry::Nested(nested_desc) => {
                                for _ in 0..self.config.repeat_of(&nested_desc.name, nested_desc.repeat) {
                                    let position = Position::nested(t, layer, nested);
                                    declared.extend(
                                        nested_desc.operations.iter().map(|entry| Declared { entry, position }),
                                    );
                                    nested += 1;
                                }
                            },
                        }
                    }
                    layer += 1;
                }
            }

            declared.extend(step.end_operations.iter().map(|entry| Declared { entry, position: here }));
        }
        declared
    }

    fn resolve(&self, node: &Node, input: &InputRef, lookup: &NodeLookup<'_>) -> Result<Operand> {
        let consumer = node.id();
        let target = node.position().shifted(input);

        let as_node = |producer: NodeId| {
            if producer < consumer {
                Ok(Operand::Node(producer))
            } else {
                Err(Error::ForwardReference {
                    node: node.specific_id().to_string(),
                    input: input.to_string(),
                })
            }
        };

        if let Some(target) = target {
            if let Some(producer) = lookup.find_outward(&input.name, target) {
                return as_node(producer);
            }
            if input.layer_offset == 0 && input.nested_offset == 0 {
                if let Some(producer) = lookup.latest_before(&input.name, target.time_step, consumer) {
                    return as_node(producer);
                }
            }
        }

        if let Some(key) = self.parameters.resolve(&input.name, target) {
            return Ok(Operand::Weight(key));
        }
        if let Some(key) = self.intermediates.resolve(&input.name, target) {
            return Ok(Operand::Intermediate(key));
        }

        let position = node.position();
        if let Some(producer) = self.config.finders.iter().find_map(|finder| finder(input, &position, lookup)) {
            return as_node(producer);
        }

        Err(Error::UnresolvedInput {
            node: node.specific_id().to_string(),
            input: input.to_string(),
        })
    }
}
