use revgraph_core::{
    checkpoint::CheckpointId,
    error::Result,
    result::BackwardResult,
    value::GradientValue,
};

/// A stateful computation unit wired into a graph.
///
/// `forward` may capture whatever it needs; `backward` must be answerable
/// from that state alone (or from state brought back by `restore`). It takes
/// `&self` because every arrival at a fan-in node computes its own local
/// result, possibly at the same time as the others.
pub trait Operation: Send + Sync {
    fn op_type(&self) -> &str;

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue>;

    /// One entry per operand, in declared order, when the result has
    /// multiple inputs; a single entry otherwise.
    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult>;

    /// Saves forward-time state under `checkpoint`.
    fn store(&mut self, _checkpoint: CheckpointId) -> Result<()> {
        Ok(())
    }

    /// Brings back state saved under `checkpoint` so a following `backward`
    /// sees it as if it came from the most recent `forward`.
    fn restore(&mut self, _checkpoint: CheckpointId) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {}
}

impl std::fmt::Debug for dyn Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation({})", self.op_type())
    }
}
