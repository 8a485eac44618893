use crate::id::{NodeId, Position, SpecificId};
use dashmap::DashMap;
use revgraph_core::{
    accumulate::accumulate_values,
    error::Result,
    result::BackwardResult,
    value::GradientValue,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Mutex};

/// Name of a stored value, optionally pinned to a structural position.
/// Keys without a position are shared by every position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValueKey {
    pub name: String,
    pub position: Option<Position>,
}

impl ValueKey {
    pub fn shared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: None,
        }
    }

    pub fn at(name: impl Into<String>, position: Position) -> Self {
        Self {
            name: name.into(),
            position: Some(position),
        }
    }
}

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(position) => write!(f, "{}_{}", self.name, position),
            None => write!(f, "{}", self.name),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Value stores
// ────────────────────────────────────────────────────────────────────────────

/// Named values looked up while wiring and gathered during forward.
#[derive(Default)]
pub struct ValueStore {
    values: DashMap<ValueKey, GradientValue>,
}

/// Trainable weights. Their gradients land in `GradientBuffers`.
pub type ParameterStore = ValueStore;

/// Feeds and other non-trainable operands, such as an initial recurrent state.
pub type IntermediateStore = ValueStore;

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ValueKey, value: impl Into<GradientValue>) -> Option<GradientValue> {
        self.values.insert(key, value.into())
    }

    pub fn insert_shared(&self, name: impl Into<String>, value: impl Into<GradientValue>) -> Option<GradientValue> {
        self.insert(ValueKey::shared(name), value)
    }

    pub fn insert_at(
        &self,
        name: impl Into<String>,
        position: Position,
        value: impl Into<GradientValue>,
    ) -> Option<GradientValue> {
        self.insert(ValueKey::at(name, position), value)
    }

    pub fn get(&self, key: &ValueKey) -> Option<GradientValue> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &ValueKey) -> bool {
        self.values.contains_key(key)
    }

    /// Finds the key `name` is stored under as seen from `position`:
    /// innermost scope first, then the shared value.
    pub fn resolve(&self, name: &str, position: Option<Position>) -> Option<ValueKey> {
        let scoped = position
            .into_iter()
            .flat_map(|position| position.outward())
            .map(|scope| ValueKey::at(name, scope));
        scoped
            .chain(std::iter::once(ValueKey::shared(name)))
            .find(|key| self.values.contains_key(key))
    }

    pub fn remove(&self, key: &ValueKey) -> Option<GradientValue> {
        self.values.remove(key).map(|(_, value)| value)
    }

    pub fn keys(&self) -> Vec<ValueKey> {
        let mut keys: Vec<ValueKey> = self.values.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStore").field("keys", &self.keys()).finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Gradient buffers
// ────────────────────────────────────────────────────────────────────────────

/// Per-weight gradient accumulators filled by the backward scheduler.
///
/// Contributions are kept apart by the `(node, slot)` that produced them and
/// summed in that order on read, so the total does not depend on which
/// branch of a parallel pass finished first. Contributions from the same
/// slot in later passes add onto the earlier ones until `zero`.
#[derive(Default)]
pub struct GradientBuffers {
    buffers: DashMap<ValueKey, BTreeMap<(NodeId, usize), GradientValue>>,
}

impl GradientBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&self, key: &ValueKey, from: NodeId, slot: usize, gradient: &GradientValue) -> Result<()> {
        let mut buffer = self.buffers.entry(key.clone()).or_default();
        match buffer.get_mut(&(from, slot)) {
            Some(existing) => existing.add_assign(gradient)?,
            None => {
                buffer.insert((from, slot), gradient.clone());
            },
        }
        Ok(())
    }

    pub fn get(&self, key: &ValueKey) -> Result<Option<GradientValue>> {
        match self.buffers.get(key) {
            Some(buffer) if !buffer.is_empty() => accumulate_values(buffer.values()).map(Some),
            _ => Ok(None),
        }
    }

    /// Gradient of a shared weight.
    pub fn get_shared(&self, name: &str) -> Result<Option<GradientValue>> {
        self.get(&ValueKey::shared(name))
    }

    /// Number of distinct `(node, slot)` contributions held for `key`.
    pub fn contributions(&self, key: &ValueKey) -> usize {
        self.buffers.get(key).map(|buffer| buffer.len()).unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<ValueKey> {
        let mut keys: Vec<ValueKey> = self.buffers.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn zero(&self) {
        self.buffers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl fmt::Debug for GradientBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientBuffers").field("keys", &self.keys()).finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Sinks
// ────────────────────────────────────────────────────────────────────────────

/// Receives a node's combined backward result once per pass.
pub trait GradientSink: Send + Sync {
    fn deliver(&self, node: NodeId, specific_id: &SpecificId, gradient: &BackwardResult) -> Result<()>;
}

/// Keeps every delivery, for inspection.
#[derive(Default, Debug)]
pub struct CollectingSink {
    deliveries: Mutex<Vec<(NodeId, String, BackwardResult)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the deliveries, ordered by node.
    pub fn take(&self) -> Result<Vec<(NodeId, String, BackwardResult)>> {
        let mut deliveries = std::mem::take(&mut *self.deliveries.lock()?);
        deliveries.sort_by_key(|(node, _, _)| *node);
        Ok(deliveries)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.deliveries.lock()?.len())
    }
}

impl GradientSink for CollectingSink {
    fn deliver(&self, node: NodeId, specific_id: &SpecificId, gradient: &BackwardResult) -> Result<()> {
        self.deliveries
            .lock()?
            .push((node, specific_id.to_string(), gradient.clone()));
        Ok(())
    }
}
