use crate::{
    error::{Error, Result},
    value::GradientValue,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Output of one `backward` call.
///
/// With `has_multiple_inputs` the entries line up positionally with the
/// node's operands and each is routed to the matching predecessor. Without
/// it the single entry is handed to every predecessor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackwardResult {
    entries: Vec<GradientValue>,
    has_multiple_inputs: bool,
}

impl BackwardResult {
    pub fn single(gradient: impl Into<GradientValue>) -> Self {
        Self {
            entries: vec![gradient.into()],
            has_multiple_inputs: false,
        }
    }

    pub fn multiple(entries: Vec<GradientValue>) -> Self {
        Self {
            entries,
            has_multiple_inputs: true,
        }
    }

    pub fn has_multiple_inputs(&self) -> bool {
        self.has_multiple_inputs
    }

    pub fn entries(&self) -> &[GradientValue] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<GradientValue> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&GradientValue> {
        self.entries.get(index)
    }

    /// The one gradient of a single-input result.
    pub fn gradient(&self) -> Result<&GradientValue> {
        match (self.has_multiple_inputs, self.entries.as_slice()) {
            (false, [g]) => Ok(g),
            _ => Err(Error::InvalidState(format!(
                "expected a single-input backward result, got {} entries (multiple: {})",
                self.entries.len(),
                self.has_multiple_inputs
            ))),
        }
    }

    /// Elementwise sum with another result of the same layout.
    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        if self.has_multiple_inputs != other.has_multiple_inputs || self.entries.len() != other.entries.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.entries.len()],
                got: vec![other.entries.len()],
                msg: "backward result layout".into(),
            });
        }
        for (lhs, rhs) in self.entries.iter_mut().zip(other.entries.iter()) {
            lhs.add_assign(rhs)?;
        }
        Ok(())
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f32) -> bool {
        self.has_multiple_inputs == other.has_multiple_inputs
            && self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|(a, b)| a.approx_eq(b, tolerance))
    }
}
