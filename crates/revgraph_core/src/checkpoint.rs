use crate::error::{Error, Result};
use dashmap::DashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque key under which forward-time state is saved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CheckpointId(pub u64);

impl From<u64> for CheckpointId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Per-operation store of forward state keyed by checkpoint.
///
/// Lets several graph instances share one node's code without sharing the
/// state it captured during `forward`.
pub struct CheckpointSlots<S> {
    slots: DashMap<CheckpointId, S>,
}

impl<S> Default for CheckpointSlots<S> {
    fn default() -> Self {
        Self { slots: DashMap::new() }
    }
}

impl<S: Clone> CheckpointSlots<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, id: CheckpointId, state: S) {
        self.slots.insert(id, state);
    }

    pub fn restore(&self, op: &str, id: CheckpointId) -> Result<S> {
        self.slots
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::MissingCheckpoint {
                op: op.to_string(),
                checkpoint: id.0,
            })
    }

    pub fn remove(&self, id: CheckpointId) -> Option<S> {
        self.slots.remove(&id).map(|(_, state)| state)
    }

    pub fn contains(&self, id: CheckpointId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}
