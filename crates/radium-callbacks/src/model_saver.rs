//! Train callback that checkpoints the primary context every epoch.

use crate::callback::{Callback, CallbackKind};
use crate::checkpoint::{update_checkpoint_state, CheckpointDir};
use crate::config::{CallbackDefinition, CallbacksConfig};
use crate::context::ExecutionContext;
use crate::error::{CallbackError, Result};
use crate::session::Saver;
use crate::trainer::Trainer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Saves every variable of the trainer's graph to `model-<step>.json` and
/// records it as the latest checkpoint of the log directory.
pub struct ModelSaver {
    checkpoints: CheckpointDir,
    keep_last: usize,
    bound: Option<(Arc<ExecutionContext>, Saver)>,
}

impl ModelSaver {
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>, keep_last: usize) -> Self {
        Self {
            checkpoints: CheckpointDir::new(log_dir),
            keep_last,
            bound: None,
        }
    }

    /// Factory used by `CallbackLoader`. Honors an optional `keep_last`
    /// override in the definition's `config` table.
    pub fn from_definition(
        def: &CallbackDefinition,
        config: &CallbacksConfig,
    ) -> anyhow::Result<Box<dyn Callback>> {
        let keep_last = match def.config.as_ref().and_then(|c| c.get("keep_last")) {
            Some(value) => {
                let n = value.as_integer().filter(|n| *n >= 0).ok_or_else(|| {
                    anyhow::anyhow!(
                        "keep_last for '{}' must be a non-negative integer",
                        def.name
                    )
                })?;
                n as usize
            }
            None => config.keep_last,
        };
        Ok(Box::new(Self::new(&config.log_dir, keep_last)))
    }

    #[must_use]
    pub fn log_dir(&self) -> &Path {
        self.checkpoints.dir()
    }

    /// Write a checkpoint now. Requires `before_train` to have run.
    pub fn save(&self) -> Result<PathBuf> {
        let (context, saver) = self.bound.as_ref().ok_or(CallbackError::ContextNotInitialized)?;

        let step = context.session().global_step()?;
        let path = saver.save(context.session(), &self.checkpoints.model_path(step))?;
        update_checkpoint_state(self.checkpoints.dir(), &path, self.keep_last)?;

        debug!(path = %path.display(), step, "Saved checkpoint");
        Ok(path)
    }
}

impl Callback for ModelSaver {
    fn kind(&self) -> CallbackKind {
        CallbackKind::Train
    }

    fn before_train(&mut self, trainer: &dyn Trainer) -> anyhow::Result<()> {
        let context = trainer.context();
        let saver = Saver::new(context.graph());
        std::fs::create_dir_all(self.checkpoints.dir())?;
        self.bound = Some((context, saver));
        Ok(())
    }

    fn trigger_epoch(&mut self) -> anyhow::Result<()> {
        self.save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{get_checkpoint_state, CheckpointLocator};
    use crate::graph::{Graph, NodeId, GLOBAL_STEP_VAR_NAME};
    use crate::trainer::Model;
    use tempfile::TempDir;

    struct NoModel;

    impl Model for NoModel {
        fn input_vars(&self, _graph: &mut Graph) -> anyhow::Result<Vec<NodeId>> {
            Ok(Vec::new())
        }
        fn build_cost(&self, graph: &mut Graph, _: &[NodeId], _: bool) -> anyhow::Result<NodeId> {
            Ok(graph.variable("cost", vec![0.0], false)?)
        }
    }

    struct PrimaryTrainer(Arc<ExecutionContext>);

    impl Trainer for PrimaryTrainer {
        fn model(&self) -> &dyn Model {
            &NoModel
        }
        fn context(&self) -> Arc<ExecutionContext> {
            Arc::clone(&self.0)
        }
    }

    fn primary() -> Arc<ExecutionContext> {
        let mut graph = Graph::new();
        graph.global_step().unwrap();
        graph.variable("w", vec![1.0], true).unwrap();
        ExecutionContext::new(graph)
    }

    #[test]
    fn test_save_before_bind_fails() {
        let temp = TempDir::new().unwrap();
        let saver = ModelSaver::new(temp.path(), 0);
        assert!(matches!(saver.save(), Err(CallbackError::ContextNotInitialized)));
    }

    #[test]
    fn test_epoch_trigger_writes_checkpoint_and_state() {
        let temp = TempDir::new().unwrap();
        let trainer = PrimaryTrainer(primary());
        let mut saver = ModelSaver::new(temp.path(), 0);

        saver.before_train(&trainer).unwrap();
        trainer.0.session().assign(GLOBAL_STEP_VAR_NAME, vec![40.0]).unwrap();
        saver.trigger_epoch().unwrap();

        let expected = temp.path().join("model-40.json");
        assert!(expected.exists());
        let locator = CheckpointDir::new(temp.path());
        assert_eq!(locator.latest_checkpoint().unwrap(), Some(expected));
    }

    #[test]
    fn test_keep_last_from_definition() {
        let temp = TempDir::new().unwrap();
        let config = CallbacksConfig::new(temp.path());
        let def = CallbackDefinition {
            name: "model_saver".to_string(),
            kind: "train".to_string(),
            enabled: true,
            config: Some(toml::from_str("keep_last = 1").unwrap()),
        };
        let trainer = PrimaryTrainer(primary());
        let mut saver = ModelSaver::from_definition(&def, &config).unwrap();

        saver.before_train(&trainer).unwrap();
        for _ in 0..3 {
            trainer.0.session().increment_global_step().unwrap();
            saver.trigger_epoch().unwrap();
        }

        let state = get_checkpoint_state(temp.path()).unwrap().unwrap();
        assert_eq!(state.all_model_checkpoint_paths, vec![temp.path().join("model-3.json")]);
    }

    #[test]
    fn test_negative_keep_last_rejected() {
        let config = CallbacksConfig::new("logs");
        let def = CallbackDefinition {
            name: "model_saver".to_string(),
            kind: "train".to_string(),
            enabled: true,
            config: Some(toml::from_str("keep_last = -2").unwrap()),
        };
        assert!(ModelSaver::from_definition(&def, &config).is_err());
    }
}
