//! Radium Callbacks
//!
//! Callback orchestration for long-running training loops:
//! - Running callbacks at each lifecycle point, in registration order (`Callbacks`)
//! - Routing test callbacks into a lazily built evaluation context (`SecondaryContextManager`)
//! - Restoring the latest checkpoint before each epoch's evaluation
//! - Timing epoch triggers and logging the slow ones (`CallbackTimeLogger`)

pub mod callback;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod group;
pub mod loader;
pub mod model_saver;
pub mod secondary;
pub mod session;
pub mod timer;
pub mod trainer;

pub use callback::{Callback, CallbackKind};
pub use checkpoint::{
    get_checkpoint_state, update_checkpoint_state, CheckpointDir, CheckpointLocator,
    CheckpointState,
};
pub use config::{CallbackDefinition, CallbacksConfig};
pub use context::{current_context, ContextGuard, ExecutionContext};
pub use error::{CallbackError, Result};
pub use graph::{Graph, GraphId, NodeId, NodeKind, GLOBAL_STEP_VAR_NAME};
pub use group::Callbacks;
pub use loader::{CallbackFactory, CallbackLoader};
pub use model_saver::ModelSaver;
pub use secondary::SecondaryContextManager;
pub use session::{Saver, Session};
pub use timer::{CallbackTimeLogger, TimingThresholds};
pub use trainer::{Model, Trainer};
