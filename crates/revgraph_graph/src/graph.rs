use crate::{
    id::{NodeId, Position, SpecificId},
    node::{Node, Operand},
    store::{GradientBuffers, GradientSink, IntermediateStore, ParameterStore},
};
use log::debug;
use revgraph_core::{
    checkpoint::CheckpointId,
    error::{Error, Result},
    value::GradientValue,
};
use std::{collections::HashMap, sync::Arc};

/// A wired node arena produced by `GraphBuilder`.
///
/// Nodes are evaluated forward along the `next` chain and differentiated
/// backward along `backward_adjacent`. The graph is reused across passes;
/// only per-pass state is cleared between them.
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) index: HashMap<SpecificId, NodeId>,
    pub(crate) start: NodeId,
    pub(crate) last: NodeId,
    pub(crate) parameters: ParameterStore,
    pub(crate) intermediates: IntermediateStore,
    pub(crate) gradients: GradientBuffers,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| Error::InvalidState(format!("node {} is not part of this graph", id)))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First instantiated node.
    pub fn start(&self) -> NodeId {
        self.start
    }

    /// Last node of the forward chain, the usual backward starting node.
    pub fn last(&self) -> NodeId {
        self.last
    }

    /// Node ids in forward evaluation order.
    pub fn chain(&self) -> Chain<'_> {
        Chain {
            graph: self,
            cursor: Some(self.start),
        }
    }

    pub fn find(&self, name: &str, position: Position) -> Option<NodeId> {
        self.index.get(&SpecificId::new(name, position)).copied()
    }

    pub fn by_specific_id(&self, specific_id: &SpecificId) -> Option<&Node> {
        self.index.get(specific_id).and_then(|id| self.nodes.get(id.0))
    }

    /// Looks a node up by its rendered specific id, e.g. `hidden_2_0`.
    ///
    /// Names may themselves end in `_<n>`, so every split of up to three
    /// trailing indices is tried. A rendering that fits more than one node
    /// is rejected; use `find` with an explicit position instead.
    pub fn named(&self, rendered: &str) -> Result<&Node> {
        let mut rest = rendered;
        let mut indices = Vec::with_capacity(3);
        let mut found = Vec::new();
        while indices.len() < 3 {
            let Some((head, tail)) = rest.rsplit_once('_') else {
                break;
            };
            let Ok(index) = tail.parse::<usize>() else {
                break;
            };
            indices.insert(0, index);
            rest = head;
            let position = match indices[..] {
                [t] => Position::time_step(t),
                [t, l] => Position::layer(t, l),
                [t, l, n] => Position::nested(t, l, n),
                _ => break,
            };
            if let Some(id) = self.find(rest, position) {
                found.push(id);
            }
        }
        match found[..] {
            [id] => self.node(id),
            [] => Err(Error::InvalidState(format!("no node named {}", rendered))),
            _ => Err(Error::InvalidState(format!(
                "{} names {} nodes, look it up by position",
                rendered,
                found.len()
            ))),
        }
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn intermediates(&self) -> &IntermediateStore {
        &self.intermediates
    }

    pub fn gradients(&self) -> &GradientBuffers {
        &self.gradients
    }

    pub fn add_destination(&self, id: NodeId, sink: Arc<dyn GradientSink>) -> Result<()> {
        self.node(id)?.add_destination(sink)
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Forward
    // ────────────────────────────────────────────────────────────────────────

    /// Evaluates every node along the chain and returns the last output.
    pub fn forward(&self) -> Result<GradientValue> {
        let mut output = None;
        for id in self.chain() {
            let node = self.node(id)?;
            let operands = self.gather(node)?;
            output = Some(node.evaluate(&operands)?);
        }
        debug!("forward pass evaluated {} nodes", self.nodes.len());
        output.ok_or_else(|| Error::InvalidState("forward chain is empty".into()))
    }

    fn gather(&self, node: &Node) -> Result<Vec<GradientValue>> {
        node.operands()
            .iter()
            .map(|operand| match operand {
                Operand::Node(id) => {
                    let producer = self.node(*id)?;
                    producer
                        .forward_output()?
                        .ok_or_else(|| Error::MissingForwardState(producer.specific_id().to_string()))
                },
                Operand::Weight(key) => self
                    .parameters
                    .get(key)
                    .ok_or_else(|| Error::InvalidState(format!("weight {} was removed after wiring", key))),
                Operand::Intermediate(key) => self
                    .intermediates
                    .get(key)
                    .ok_or_else(|| Error::InvalidState(format!("intermediate {} was removed after wiring", key))),
            })
            .collect()
    }

    /// Saves every node's forward state under `checkpoint`.
    pub fn store(&self, checkpoint: impl Into<CheckpointId>) -> Result<()> {
        let checkpoint = checkpoint.into();
        self.nodes.iter().try_for_each(|node| node.store(checkpoint))
    }

    /// Brings back the forward state saved under `checkpoint`.
    pub fn restore(&self, checkpoint: impl Into<CheckpointId>) -> Result<()> {
        let checkpoint = checkpoint.into();
        self.nodes.iter().try_for_each(|node| node.restore(checkpoint))
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Reset
    // ────────────────────────────────────────────────────────────────────────

    /// Clears per-pass state on every node.
    pub fn reset(&self) -> Result<()> {
        self.nodes.iter().try_for_each(Node::reset)
    }

    /// Drops forward outputs, checkpoints and operation state.
    pub fn clear_forward_state(&self) -> Result<()> {
        self.nodes.iter().try_for_each(Node::clear_forward_state)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes)
            .field("start", &self.start)
            .field("last", &self.last)
            .finish()
    }
}

pub struct Chain<'g> {
    graph: &'g Graph,
    cursor: Option<NodeId>,
}

impl Iterator for Chain<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.cursor?;
        self.cursor = self.graph.nodes.get(current.0).and_then(Node::next);
        Some(current)
    }
}
