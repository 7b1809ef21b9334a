//! Builds a `Callbacks` group from configuration.

use crate::callback::Callback;
use crate::checkpoint::CheckpointDir;
use crate::config::{CallbackDefinition, CallbacksConfig};
use crate::error::{CallbackError, Result};
use crate::group::Callbacks;
use crate::model_saver::ModelSaver;
use std::collections::HashMap;

/// Factory functions create callback instances from configurations.
pub type CallbackFactory =
    fn(&CallbackDefinition, &CallbacksConfig) -> anyhow::Result<Box<dyn Callback>>;

/// Maps callback names to factories.
pub struct CallbackLoader {
    factories: HashMap<String, CallbackFactory>,
}

impl Default for CallbackLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("CallbackLoader").field("factories", &names).finish()
    }
}

impl CallbackLoader {
    /// Loader with the built-in `model_saver` factory registered.
    #[must_use]
    pub fn new() -> Self {
        let mut loader = Self {
            factories: HashMap::new(),
        };
        loader.register_factory("model_saver", ModelSaver::from_definition);
        loader
    }

    pub fn register_factory(&mut self, name: impl Into<String>, factory: CallbackFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Build the group described by `config`.
    ///
    /// The whole configuration is validated before the first factory runs, so
    /// an unknown kind anywhere in the list means no callback is constructed.
    pub fn load(&self, config: &CallbacksConfig) -> Result<Callbacks> {
        config.validate()?;

        let mut callbacks = Vec::with_capacity(config.callbacks.len());
        for def in &config.callbacks {
            if !def.enabled {
                tracing::debug!(callback = %def.name, "Skipping disabled callback");
                continue;
            }

            let kind = def.parsed_kind()?;
            let factory = self.factories.get(&def.name).ok_or_else(|| {
                CallbackError::Configuration(format!(
                    "no factory registered for callback '{}'",
                    def.name
                ))
            })?;
            let callback = factory(def, config)?;

            if callback.kind() != kind {
                return Err(CallbackError::Configuration(format!(
                    "callback '{}' is configured as '{}' but is a '{}' callback",
                    def.name,
                    kind,
                    callback.kind()
                )));
            }
            callbacks.push(callback);
        }

        tracing::debug!(
            count = callbacks.len(),
            log_dir = %config.log_dir.display(),
            "Loaded callbacks"
        );
        Ok(Callbacks::new(callbacks, CheckpointDir::new(&config.log_dir))
            .with_timing(config.timing))
    }
}
