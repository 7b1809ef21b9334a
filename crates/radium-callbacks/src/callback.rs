//! The callback contract.

use crate::error::CallbackError;
use crate::trainer::Trainer;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which execution context a callback runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    /// Runs in the trainer's primary context and sees every step and epoch.
    Train,
    /// Runs in the secondary evaluation context, on epoch triggers only.
    Test,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackKind {
    type Err = CallbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            other => Err(CallbackError::Configuration(format!("unknown callback kind '{other}'"))),
        }
    }
}

/// A training-loop extension.
///
/// All lifecycle methods default to no-ops. Errors are returned as
/// `anyhow::Error` and reach the driver unchanged.
pub trait Callback {
    fn kind(&self) -> CallbackKind;

    /// Label used in timing digests. Defaults to the implementing type's name.
    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    fn before_train(&mut self, _trainer: &dyn Trainer) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_train(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Never called on test callbacks.
    fn trigger_step(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn trigger_epoch(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// `a::b::Foo<c::Bar>` -> `Foo<c::Bar>`
fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
