pub mod barrier;
pub mod builder;
pub mod description;
pub mod discovery;
pub mod graph;
pub mod id;
pub mod node;
pub mod operation;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use builder::{BuilderConfig, GraphBuilder, NodeLookup, OperationFinder};
pub use description::{
    ArchitectureDescription, LayerDescription, LayerEntry, NestedLayerDescription, OperationEntry,
    TimeStepDescription,
};
pub use discovery::{discover, reset_visits, DiscoveryReport};
pub use graph::Graph;
pub use id::{InputRef, NodeId, Position, Provenance, SpecificId, StartingPoint};
pub use node::{Node, Operand, Phase};
pub use operation::Operation;
pub use registry::{OperationFactory, OperationRegistry};
pub use scheduler::{BackwardScheduler, PassReport, SchedulerConfig};
pub use store::{
    CollectingSink, GradientBuffers, GradientSink, IntermediateStore, ParameterStore, ValueKey, ValueStore,
};
