pub mod prelude;

pub use revgraph_core as core;
pub use revgraph_graph as graph;
#[cfg(feature = "ops")]
pub use revgraph_ops as ops;
