use revgraph_core::error::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

// ────────────────────────────────────────────────────────────────────────────
//  Node identity
// ────────────────────────────────────────────────────────────────────────────

/// Index of a node in its graph's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(pub usize);

impl NodeId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one logical backward pass (a loss head, a time step, an epoch).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StartingPoint(pub usize);

impl From<usize> for StartingPoint {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for StartingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Structural position
// ────────────────────────────────────────────────────────────────────────────

/// Where a declared operation was instantiated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    pub time_step: usize,
    pub layer: Option<usize>,
    pub nested: Option<usize>,
}

impl Position {
    pub fn time_step(time_step: usize) -> Self {
        Self {
            time_step,
            layer: None,
            nested: None,
        }
    }

    pub fn layer(time_step: usize, layer: usize) -> Self {
        Self {
            time_step,
            layer: Some(layer),
            nested: None,
        }
    }

    pub fn nested(time_step: usize, layer: usize, nested: usize) -> Self {
        Self {
            time_step,
            layer: Some(layer),
            nested: Some(nested),
        }
    }

    /// This position followed by its enclosing scopes, innermost first.
    pub fn outward(&self) -> Vec<Position> {
        let mut scopes = vec![*self];
        if self.nested.is_some() {
            scopes.push(Self {
                nested: None,
                ..*self
            });
        }
        if self.layer.is_some() {
            scopes.push(Self::time_step(self.time_step));
        }
        scopes
    }

    /// Applies the offsets of `input`; `None` when a coordinate would leave
    /// its range or an offset names a level this position does not have.
    pub fn shifted(&self, input: &InputRef) -> Option<Position> {
        let time_step = shift(self.time_step, input.time_offset)?;
        let layer = shift_level(self.layer, input.layer_offset)?;
        let nested = shift_level(self.nested, input.nested_offset)?;
        Some(Self {
            time_step,
            layer,
            nested,
        })
    }

    pub fn suffix(&self) -> String {
        match (self.layer, self.nested) {
            (Some(l), Some(n)) => format!("{}_{}_{}", self.time_step, l, n),
            (Some(l), None) => format!("{}_{}", self.time_step, l),
            _ => format!("{}", self.time_step),
        }
    }
}

fn shift(value: usize, offset: isize) -> Option<usize> {
    value.checked_add_signed(offset)
}

fn shift_level(level: Option<usize>, offset: isize) -> Option<Option<usize>> {
    match (level, offset) {
        (level, 0) => Some(level),
        (Some(value), offset) => shift(value, offset).map(Some),
        (None, _) => None,
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// A node name qualified by its structural position, e.g. `hidden_3_1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpecificId {
    name: String,
    position: Position,
}

impl SpecificId {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Position {
        self.position
    }
}

impl fmt::Display for SpecificId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.position.suffix())
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Input references
// ────────────────────────────────────────────────────────────────────────────

/// A declared operand: a name plus optional positional offsets.
///
/// Written `name`, `name[t-1]`, `name[l+1]`, `name[n-1]` or any combination
/// such as `state[t-1][l+0]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InputRef {
    pub name: String,
    pub time_offset: isize,
    pub layer_offset: isize,
    pub nested_offset: isize,
}

impl InputRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time_offset: 0,
            layer_offset: 0,
            nested_offset: 0,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::InvalidInputRef(raw.to_string());

        let raw_trimmed = raw.trim();
        let (name, mut rest) = match raw_trimmed.find('[') {
            Some(idx) => raw_trimmed.split_at(idx),
            None => (raw_trimmed, ""),
        };
        if name.is_empty() {
            return Err(invalid());
        }

        let mut input = Self::named(name);
        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(invalid)?;
            let group = rest.get(1..close).ok_or_else(invalid)?;
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(invalid());
            }

            let mut chars = group.chars();
            let axis = chars.next().ok_or_else(invalid)?;
            let offset: isize = chars.as_str().parse().map_err(|_| invalid())?;
            match axis {
                't' => input.time_offset = offset,
                'l' => input.layer_offset = offset,
                'n' => input.nested_offset = offset,
                _ => return Err(invalid()),
            }
        }

        Ok(input)
    }

    pub fn has_offsets(&self) -> bool {
        self.time_offset != 0 || self.layer_offset != 0 || self.nested_offset != 0
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (axis, offset) in [('t', self.time_offset), ('l', self.layer_offset), ('n', self.nested_offset)] {
            if offset != 0 {
                write!(f, "[{}{:+}]", axis, offset)?;
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Provenance
// ────────────────────────────────────────────────────────────────────────────

/// Who delivered a gradient to a node: the pass entry, or a slot of a
/// downstream node's backward result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provenance {
    Root,
    Edge { from: NodeId, slot: usize },
}

impl Provenance {
    pub fn edge(from: NodeId, slot: usize) -> Self {
        Self::Edge { from, slot }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Edge { from, slot } => write!(f, "{} slot {}", from, slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offsets() -> Result<()> {
        let plain = InputRef::parse("hidden")?;
        assert_eq!(plain, InputRef::named("hidden"));
        assert!(!plain.has_offsets());

        let shifted = InputRef::parse("hidden[t-1][l+2]")?;
        assert_eq!(shifted.name, "hidden");
        assert_eq!(shifted.time_offset, -1);
        assert_eq!(shifted.layer_offset, 2);
        assert_eq!(shifted.nested_offset, 0);
        assert_eq!(shifted.to_string(), "hidden[t-1][l+2]");
        Ok(())
    }

    #[test]
    fn rejects_malformed_refs() {
        for raw in ["", "[t-1]", "h[t-1", "h[x+1]", "h[t-a]", "h[t-1]x"] {
            assert!(InputRef::parse(raw).is_err(), "{} should not parse", raw);
        }
    }

    #[test]
    fn shifting_respects_ranges() -> Result<()> {
        let pos = Position::layer(2, 0);
        assert_eq!(pos.shifted(&InputRef::parse("h[t-1]")?), Some(Position::layer(1, 0)));
        assert_eq!(pos.shifted(&InputRef::parse("h[l-1]")?), None);
        assert_eq!(pos.shifted(&InputRef::parse("h[n+1]")?), None);
        assert_eq!(Position::time_step(0).shifted(&InputRef::parse("h[t-1]")?), None);
        Ok(())
    }

    #[test]
    fn specific_ids_carry_position() {
        assert_eq!(SpecificId::new("h", Position::time_step(3)).to_string(), "h_3");
        assert_eq!(SpecificId::new("h", Position::nested(0, 1, 2)).to_string(), "h_0_1_2");
        assert_eq!(
            Position::nested(0, 1, 2).outward(),
            vec![Position::nested(0, 1, 2), Position::layer(0, 1), Position::time_step(0)]
        );
    }
}
