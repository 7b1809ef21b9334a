//! Variable state bound to a graph, and the saver that persists it.

use crate::error::{CallbackError, Result};
use crate::graph::{Graph, GraphId, NodeKind, GLOBAL_STEP_VAR_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Live variable values of one graph.
#[derive(Debug)]
pub struct Session {
    graph_id: GraphId,
    values: RwLock<HashMap<String, Vec<f64>>>,
}

impl Session {
    /// Open a session on `graph`, with every variable at its initial value.
    #[must_use]
    pub fn new(graph: &Graph) -> Self {
        let values = graph
            .variables()
            .filter_map(|node| match &node.kind {
                NodeKind::Variable { initial, .. } => Some((node.name.clone(), initial.clone())),
                _ => None,
            })
            .collect();

        Self {
            graph_id: graph.id(),
            values: RwLock::new(values),
        }
    }

    #[must_use]
    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    pub fn value(&self, name: &str) -> Result<Vec<f64>> {
        let values = self.read()?;
        values
            .get(name)
            .cloned()
            .ok_or_else(|| CallbackError::Session(format!("unknown variable '{name}'")))
    }

    /// Overwrite a variable. The new value must keep the variable's length.
    pub fn assign(&self, name: &str, value: Vec<f64>) -> Result<()> {
        let mut values = self.write()?;
        let slot = values
            .get_mut(name)
            .ok_or_else(|| CallbackError::Session(format!("unknown variable '{name}'")))?;
        if slot.len() != value.len() {
            return Err(CallbackError::Session(format!(
                "shape mismatch for '{}': expected {} values, got {}",
                name,
                slot.len(),
                value.len()
            )));
        }
        *slot = value;
        Ok(())
    }

    pub fn global_step(&self) -> Result<u64> {
        let value = self.value(GLOBAL_STEP_VAR_NAME)?;
        Ok(value.first().copied().unwrap_or(0.0) as u64)
    }

    pub fn increment_global_step(&self) -> Result<u64> {
        let next = self.global_step()? + 1;
        self.assign(GLOBAL_STEP_VAR_NAME, vec![next as f64])?;
        Ok(next)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<f64>>>> {
        self.values
            .read()
            .map_err(|_| CallbackError::Session("session state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<f64>>>> {
        self.values
            .write()
            .map_err(|_| CallbackError::Session("session state lock poisoned".to_string()))
    }
}

/// On-disk checkpoint written by [`Saver::save`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub global_step: Option<u64>,
    pub variables: BTreeMap<String, Vec<f64>>,
}

/// Saves and restores every variable that existed in a graph when the saver
/// was created.
#[derive(Debug, Clone)]
pub struct Saver {
    graph_id: GraphId,
    var_names: Vec<String>,
}

impl Saver {
    #[must_use]
    pub fn new(graph: &Graph) -> Self {
        Self {
            graph_id: graph.id(),
            var_names: graph.variables().map(|n| n.name.clone()).collect(),
        }
    }

    #[must_use]
    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    fn check_session(&self, session: &Session) -> Result<()> {
        if session.graph_id() != self.graph_id {
            return Err(CallbackError::Checkpoint(format!(
                "saver belongs to graph {} but session is bound to graph {}",
                self.graph_id,
                session.graph_id()
            )));
        }
        Ok(())
    }

    pub fn save(&self, session: &Session, path: &Path) -> Result<PathBuf> {
        self.check_session(session)?;

        let mut variables = BTreeMap::new();
        for name in &self.var_names {
            variables.insert(name.clone(), session.value(name)?);
        }
        let global_step = variables
            .get(GLOBAL_STEP_VAR_NAME)
            .and_then(|v| v.first())
            .map(|step| *step as u64);

        let file = CheckpointFile {
            saved_at: Utc::now(),
            global_step,
            variables,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(path.to_path_buf())
    }

    /// Load every saved variable from `path` into `session`.
    ///
    /// Variables are validated before any of them is assigned, so a bad
    /// checkpoint leaves the session untouched.
    pub fn restore(&self, session: &Session, path: &Path) -> Result<()> {
        self.check_session(session)?;

        let bytes = std::fs::read(path).map_err(|e| {
            CallbackError::Checkpoint(format!("failed to read {}: {}", path.display(), e))
        })?;
        let file: CheckpointFile = serde_json::from_slice(&bytes)?;

        let mut updates = Vec::with_capacity(self.var_names.len());
        for name in &self.var_names {
            let value = file.variables.get(name).ok_or_else(|| {
                CallbackError::Checkpoint(format!(
                    "variable '{}' not found in checkpoint {}",
                    name,
                    path.display()
                ))
            })?;
            let current = session.value(name)?;
            if current.len() != value.len() {
                return Err(CallbackError::Checkpoint(format!(
                    "shape mismatch for '{}' in {}: expected {} values, found {}",
                    name,
                    path.display(),
                    current.len(),
                    value.len()
                )));
            }
            updates.push((name, value.clone()));
        }

        for (name, value) in updates {
            session.assign(name, value)?;
        }
        Ok(())
    }
}
