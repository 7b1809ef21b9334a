//! Callback configuration.

use crate::callback::CallbackKind;
use crate::error::{CallbackError, Result};
use crate::timer::TimingThresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Callback configuration from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbacksConfig {
    /// Directory holding checkpoints and the checkpoint state file.
    pub log_dir: PathBuf,
    /// Thresholds for the per-epoch timing digest.
    #[serde(default)]
    pub timing: TimingThresholds,
    /// Checkpoints retained by `ModelSaver` (0 keeps all).
    #[serde(default = "default_keep_last")]
    pub keep_last: usize,
    /// Callbacks in invocation order.
    #[serde(default)]
    pub callbacks: Vec<CallbackDefinition>,
}

/// Definition of a single callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackDefinition {
    /// Name used to find the factory.
    pub name: String,
    /// `train` or `test`.
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Callback-specific settings.
    pub config: Option<toml::Value>,
}

fn default_enabled() -> bool {
    true
}

fn default_keep_last() -> usize {
    5
}

impl CallbackDefinition {
    pub fn parsed_kind(&self) -> Result<CallbackKind> {
        self.kind.parse().map_err(|_| {
            CallbackError::Configuration(format!(
                "unknown callback kind '{}' for callback '{}' (expected 'train' or 'test')",
                self.kind, self.name
            ))
        })
    }
}

impl CallbacksConfig {
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            timing: TimingThresholds::default(),
            keep_last: default_keep_last(),
            callbacks: Vec::new(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Check every definition before anything is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(CallbackError::Configuration("log_dir cannot be empty".to_string()));
        }

        let t = &self.timing;
        for (field, value) in [
            ("timing.min_total_secs", t.min_total_secs),
            ("timing.min_fraction", t.min_fraction),
            ("timing.min_secs", t.min_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CallbackError::Configuration(format!(
                    "{field} must be a non-negative number"
                )));
            }
        }
        if t.min_fraction > 1.0 {
            return Err(CallbackError::Configuration(
                "timing.min_fraction must be <= 1.0".to_string(),
            ));
        }

        for def in &self.callbacks {
            if def.name.trim().is_empty() {
                return Err(CallbackError::Configuration(
                    "callback name cannot be empty".to_string(),
                ));
            }
            def.parsed_kind()?;
        }

        Ok(())
    }
}
