//! Reference operations for driving the revgraph engine.
//!
//! Their math is deliberately plain; what matters is that each one honours
//! the `Operation` contract: one gradient per operand, in operand order,
//! computed from state captured by the latest `forward` or `restore`.

pub mod binary;
pub mod list;
pub mod registry;
pub mod unary;
mod utils;

pub use binary::{Add, Matmul, Mul};
pub use list::{Select, Stack};
pub use registry::builtin_registry;
pub use unary::{Identity, Scale, Tanh};
