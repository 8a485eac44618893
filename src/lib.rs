pub use revgraph_internal::*;
