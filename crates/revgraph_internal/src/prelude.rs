pub use crate::core::{
    error::{Error, Result},
    mode::{get_default_execution_mode, parallel_mode, sequential_mode, set_default_execution_mode, ExecutionMode},
    result::BackwardResult,
    tensor::Tensor,
    value::GradientValue,
};
pub use crate::graph::{
    ArchitectureDescription, BackwardScheduler, BuilderConfig, CollectingSink, GradientSink, Graph, GraphBuilder,
    IntermediateStore, LayerDescription, NestedLayerDescription, NodeId, Operation, OperationEntry,
    OperationRegistry, ParameterStore, Position, SchedulerConfig, StartingPoint, TimeStepDescription, ValueKey,
    ValueStore,
};
#[cfg(feature = "ops")]
pub use crate::ops::builtin_registry;
