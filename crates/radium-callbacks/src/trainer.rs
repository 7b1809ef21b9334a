use crate::context::ExecutionContext;
use crate::graph::{Graph, NodeId};
use std::sync::Arc;

/// Graph-building side of a model.
pub trait Model {
    /// Declare the model inputs in `graph`.
    fn input_vars(&self, graph: &mut Graph) -> anyhow::Result<Vec<NodeId>>;

    /// Build the cost on top of `inputs`. With `is_training == false` the model
    /// must not add training-only state (optimizer slots, gradient ops).
    fn build_cost(
        &self,
        graph: &mut Graph,
        inputs: &[NodeId],
        is_training: bool,
    ) -> anyhow::Result<NodeId>;
}

/// The training driver as seen by callbacks.
pub trait Trainer {
    fn model(&self) -> &dyn Model;

    /// Primary execution context. Owned by the trainer; callbacks only read it.
    fn context(&self) -> Arc<ExecutionContext>;
}
