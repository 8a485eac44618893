use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    // configuration
    UnresolvedInput {
        node: String,
        input: String,
    },
    UnknownOperation(String),
    DuplicateNode(String),
    ForwardReference {
        node: String,
        input: String,
    },
    InvalidInputRef(String),
    InvalidAttribute {
        op: String,
        attribute: String,
        message: String,
    },
    UnusedWeight(String),
    EmptyArchitecture,
    // invariant violations raised during traversal
    VisitOverflow {
        node: String,
        visited: usize,
        expected: usize,
    },
    DuplicateVisit {
        node: String,
        provenance: String,
    },
    AccumulationMismatch {
        node: String,
        accumulated: usize,
        expected: usize,
    },
    BarrierOverflow {
        parties: usize,
        released: usize,
    },
    NotDiscovered {
        node: String,
        starting_point: usize,
    },
    AccumulationStalled {
        node: String,
        visited: usize,
        expected: usize,
    },
    IncompletePass {
        node: String,
        visited: usize,
        expected: usize,
    },
    RoutingMismatch {
        node: String,
        entries: usize,
        adjacent: usize,
    },
    PassAborted,
    // operation level
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
        msg: String,
    },
    GradientKindMismatch {
        expected: &'static str,
        got: &'static str,
    },
    OperandCount {
        op: String,
        expected: usize,
        got: usize,
    },
    MissingForwardState(String),
    MissingCheckpoint {
        op: String,
        checkpoint: u64,
    },
    Operation {
        op: String,
        message: String,
    },
    //
    InvalidState(String),
    Lock,
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedInput { node, input } => {
                write!(f, "Unresolved input: '{}' of node {} matches no node, weight or intermediate", input, node)
            }
            Self::UnknownOperation(op) => write!(f, "Unknown operation type: {}", op),
            Self::DuplicateNode(id) => write!(f, "Duplicate node: {} is declared twice", id),
            Self::ForwardReference { node, input } => {
                write!(f, "Forward reference: node {} consumes {} which is not evaluated before it", node, input)
            }
            Self::InvalidInputRef(raw) => write!(f, "Invalid input reference: {}", raw),
            Self::InvalidAttribute { op, attribute, message } => {
                write!(f, "Invalid attribute '{}' for {}: {}", attribute, op, message)
            }
            Self::UnusedWeight(name) => write!(f, "Weight {} is never consumed by the graph", name),
            Self::EmptyArchitecture => write!(f, "Architecture description declares no operations"),
            Self::VisitOverflow { node, visited, expected } => {
                write!(f, "Visit overflow at {}: visited {} times, expected {}", node, visited, expected)
            }
            Self::DuplicateVisit { node, provenance } => {
                write!(f, "Duplicate visit at {} from {}", node, provenance)
            }
            Self::AccumulationMismatch { node, accumulated, expected } => {
                write!(
                    f,
                    "Accumulation mismatch at {}: {} partial gradients, expected {}",
                    node, accumulated, expected
                )
            }
            Self::BarrierOverflow { parties, released } => {
                write!(f, "Join barrier overflow: released {} waiters for {} parties", released, parties)
            }
            Self::NotDiscovered { node, starting_point } => {
                write!(f, "Node {} has no dependency count for starting point {}", node, starting_point)
            }
            Self::AccumulationStalled { node, visited, expected } => {
                write!(
                    f,
                    "Accumulation stalled at {}: {} of {} arrivals and no visitor left to deliver",
                    node, visited, expected
                )
            }
            Self::IncompletePass { node, visited, expected } => {
                write!(f, "Incomplete pass: {} received {} of {} gradients", node, visited, expected)
            }
            Self::RoutingMismatch { node, entries, adjacent } => {
                write!(
                    f,
                    "Routing mismatch at {}: {} gradient entries for {} backward-adjacent slots",
                    node, entries, adjacent
                )
            }
            Self::PassAborted => write!(f, "Backward pass aborted"),
            Self::ShapeMismatch { expected, got, msg } => {
                write!(f, "Shape mismatch ({}): expected {:?}, got {:?}", msg, expected, got)
            }
            Self::GradientKindMismatch { expected, got } => {
                write!(f, "Gradient kind mismatch: expected {}, got {}", expected, got)
            }
            Self::OperandCount { op, expected, got } => {
                write!(f, "Operand count for {}: expected {}, got {}", op, expected, got)
            }
            Self::MissingForwardState(op) => write!(f, "{} has no forward state to differentiate", op),
            Self::MissingCheckpoint { op, checkpoint } => {
                write!(f, "{} has no state stored under checkpoint {}", op, checkpoint)
            }
            Self::Operation { op, message } => write!(f, "Operation {} failed: {}", op, message),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Self::Lock => write!(f, "Lock poisoned"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedInput { .. }
                | Self::UnknownOperation(_)
                | Self::DuplicateNode(_)
                | Self::ForwardReference { .. }
                | Self::InvalidInputRef(_)
                | Self::InvalidAttribute { .. }
                | Self::UnusedWeight(_)
                | Self::EmptyArchitecture
        )
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::VisitOverflow { .. }
                | Self::DuplicateVisit { .. }
                | Self::AccumulationMismatch { .. }
                | Self::BarrierOverflow { .. }
                | Self::NotDiscovered { .. }
                | Self::AccumulationStalled { .. }
                | Self::IncompletePass { .. }
                | Self::RoutingMismatch { .. }
                | Self::PassAborted
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Lock
    }
}
