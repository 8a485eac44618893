//! Declarative architecture description consumed by the graph builder.
//!
//! A description is a sequence of time steps. Each step evaluates its start
//! operations, then every layer (each repeated `repeat` times, with nested
//! layers repeated inside one layer iteration), then its end operations.

use revgraph_core::error::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OperationEntry {
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub op_type: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub inputs: Vec<String>,
    /// Result binding; falls back to the operation type.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "BTreeMap::is_empty"))]
    pub attributes: BTreeMap<String, f32>,
}

impl OperationEntry {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            ..Default::default()
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: f32) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn binding_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.op_type)
    }

    pub fn attribute(&self, key: &str) -> Option<f32> {
        self.attributes.get(key).copied()
    }

    pub fn required_attribute(&self, key: &str) -> Result<f32> {
        self.attribute(key).ok_or_else(|| Error::InvalidAttribute {
            op: self.op_type.clone(),
            attribute: key.to_string(),
            message: "missing".into(),
        })
    }

    /// Reads a non-negative integral attribute such as an index.
    pub fn index_attribute(&self, key: &str) -> Result<usize> {
        let value = self.required_attribute(key)?;
        if value < 0.0 || value.fract() != 0.0 {
            return Err(Error::InvalidAttribute {
                op: self.op_type.clone(),
                attribute: key.to_string(),
                message: format!("expected a non-negative integer, got {}", value),
            });
        }
        Ok(value as usize)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NestedLayerDescription {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default = "one"))]
    pub repeat: usize,
    pub operations: Vec<OperationEntry>,
}

impl NestedLayerDescription {
    pub fn new(name: impl Into<String>, repeat: usize) -> Self {
        Self {
            name: name.into(),
            repeat,
            operations: Vec::new(),
        }
    }

    pub fn operation(mut self, entry: OperationEntry) -> Self {
        self.operations.push(entry);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum LayerEntry {
    Nested(NestedLayerDescription),
    Operation(OperationEntry),
}

impl From<OperationEntry> for LayerEntry {
    fn from(entry: OperationEntry) -> Self {
        Self::Operation(entry)
    }
}

impl From<NestedLayerDescription> for LayerEntry {
    fn from(nested: NestedLayerDescription) -> Self {
        Self::Nested(nested)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerDescription {
    pub name: String,
    /// Default repeat count; `BuilderConfig::repeat` overrides it by name.
    #[cfg_attr(feature = "serde", serde(default = "one"))]
    pub repeat: usize,
    pub entries: Vec<LayerEntry>,
}

impl LayerDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repeat: 1,
            entries: Vec::new(),
        }
    }

    pub fn repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn entry(mut self, entry: impl Into<LayerEntry>) -> Self {
        self.entries.push(entry.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeStepDescription {
    #[cfg_attr(feature = "serde", serde(default))]
    pub start_operations: Vec<OperationEntry>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub layers: Vec<LayerDescription>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub end_operations: Vec<OperationEntry>,
}

impl TimeStepDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, entry: OperationEntry) -> Self {
        self.start_operations.push(entry);
        self
    }

    pub fn layer(mut self, layer: LayerDescription) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn end(mut self, entry: OperationEntry) -> Self {
        self.end_operations.push(entry);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArchitectureDescription {
    pub time_steps: Vec<TimeStepDescription>,
}

impl ArchitectureDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_step(mut self, step: TimeStepDescription) -> Self {
        self.time_steps.push(step);
        self
    }

    /// The same time step stamped `count` times, as for an unrolled recurrence.
    pub fn repeated(template: TimeStepDescription, count: usize) -> Self {
        Self {
            time_steps: vec![template; count],
        }
    }

    pub fn operation_count(&self) -> usize {
        self.time_steps
            .iter()
            .map(|step| {
                let layered: usize = step
                    .layers
                    .iter()
                    .map(|layer| {
                        let per_iteration: usize = layer
                            .entries
                            .iter()
                            .map(|entry| match entry {
                                LayerEntry::Operation(_) => 1,
                                LayerEntry::Nested(nested) => nested.repeat * nested.operations.len(),
                            })
                            .sum();
                        layer.repeat * per_iteration
                    })
                    .sum();
                step.start_operations.len() + layered + step.end_operations.len()
            })
            .sum()
    }
}

#[cfg(feature = "serde")]
fn one() -> usize {
    1
}
