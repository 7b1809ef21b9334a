//! The lazily built evaluation context used by test callbacks.
//!
//! The first `before_train_context` call builds an isolated graph from the
//! trainer's model in evaluation mode, opens a session on it and binds a saver
//! to every variable. Every later call reuses that same context. Epoch
//! triggers restore the latest checkpoint into it before test callbacks run.

use crate::checkpoint::CheckpointLocator;
use crate::context::{ContextGuard, ExecutionContext};
use crate::error::{CallbackError, Result};
use crate::graph::Graph;
use crate::session::Saver;
use crate::trainer::Trainer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

enum State {
    Uninitialized,
    Active {
        context: Arc<ExecutionContext>,
        saver: Saver,
    },
}

/// Owner of the secondary execution context.
pub struct SecondaryContextManager {
    state: State,
    checkpoints: Box<dyn CheckpointLocator>,
}

impl std::fmt::Debug for SecondaryContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryContextManager")
            .field("active", &self.is_active())
            .field("checkpoint_dir", &self.checkpoints.location())
            .finish_non_exhaustive()
    }
}

impl SecondaryContextManager {
    #[must_use]
    pub fn new(checkpoints: impl CheckpointLocator + 'static) -> Self {
        Self {
            state: State::Uninitialized,
            checkpoints: Box::new(checkpoints),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active { .. })
    }

    /// The secondary context, once built.
    #[must_use]
    pub fn context(&self) -> Option<&Arc<ExecutionContext>> {
        match &self.state {
            State::Active { context, .. } => Some(context),
            State::Uninitialized => None,
        }
    }

    /// Build the context on first use; return the same handle afterwards.
    pub fn get_or_create(&mut self, trainer: &dyn Trainer) -> Result<&Arc<ExecutionContext>> {
        if let State::Uninitialized = self.state {
            let (context, saver) = build_secondary_context(trainer)?;
            self.state = State::Active { context, saver };
        }
        self.context().ok_or(CallbackError::ContextNotInitialized)
    }

    /// Enter the secondary context, building it first if needed.
    pub fn before_train_context(&mut self, trainer: &dyn Trainer) -> Result<ContextGuard> {
        let context = self.get_or_create(trainer)?;
        Ok(context.enter())
    }

    /// Load the latest checkpoint into the secondary session.
    pub fn restore_checkpoint(&self) -> Result<PathBuf> {
        let path = self
            .checkpoints
            .latest_checkpoint()?
            .ok_or_else(|| CallbackError::MissingCheckpoint {
                dir: self.checkpoints.location().to_path_buf(),
            })?;

        let State::Active { context, saver } = &self.state else {
            return Err(CallbackError::ContextNotInitialized);
        };

        info!(path = %path.display(), "Restore checkpoint from {}", path.display());
        saver.restore(context.session(), &path)?;
        Ok(path)
    }

    /// Enter the already built secondary context.
    pub fn trigger_epoch_context(&self) -> Result<ContextGuard> {
        let context = self.context().ok_or(CallbackError::ContextNotInitialized)?;
        Ok(context.enter())
    }
}

fn build_secondary_context(trainer: &dyn Trainer) -> Result<(Arc<ExecutionContext>, Saver)> {
    let mut graph = Graph::new();
    graph.global_step()?;

    let model = trainer.model();
    let inputs = model.input_vars(&mut graph)?;
    model.build_cost(&mut graph, &inputs, false)?;

    let context = ExecutionContext::new(graph);
    let saver = Saver::new(context.graph());
    debug!(
        graph_id = %context.id(),
        nodes = context.graph().len(),
        variables = saver.var_names().len(),
        "Built secondary execution context"
    );
    Ok((context, saver))
}
