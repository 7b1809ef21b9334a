//! Symbolic computation graph built by a model.
//!
//! A graph is a flat list of named nodes. Variables carry their initial value
//! and are the only restorable state; placeholders describe model inputs and
//! ops reference earlier nodes by id.

use crate::error::{CallbackError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Name of the step counter every secondary graph is seeded with.
pub const GLOBAL_STEP_VAR_NAME: &str = "global_step";

/// Unique identity of a graph instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Index of a node inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Placeholder { shape: Vec<usize> },
    Variable { initial: Vec<f64>, trainable: bool },
    Op { op: String, inputs: Vec<NodeId> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    id: GraphId,
    nodes: Vec<Node>,
    by_name: HashMap<String, NodeId>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: GraphId::new(),
            nodes: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn placeholder(&mut self, name: impl Into<String>, shape: Vec<usize>) -> Result<NodeId> {
        self.add_node(name.into(), NodeKind::Placeholder { shape })
    }

    pub fn variable(
        &mut self,
        name: impl Into<String>,
        initial: Vec<f64>,
        trainable: bool,
    ) -> Result<NodeId> {
        self.add_node(name.into(), NodeKind::Variable { initial, trainable })
    }

    /// Add an op node. Every input must already exist in this graph.
    pub fn op(
        &mut self,
        name: impl Into<String>,
        op: impl Into<String>,
        inputs: Vec<NodeId>,
    ) -> Result<NodeId> {
        let name = name.into();
        if let Some(missing) = inputs.iter().find(|id| id.0 >= self.nodes.len()) {
            return Err(CallbackError::Graph(format!(
                "op '{}' references unknown node {}",
                name, missing.0
            )));
        }
        self.add_node(
            name,
            NodeKind::Op {
                op: op.into(),
                inputs,
            },
        )
    }

    /// Add the non-trainable step counter, starting at zero.
    pub fn global_step(&mut self) -> Result<NodeId> {
        self.variable(GLOBAL_STEP_VAR_NAME, vec![0.0], false)
    }

    fn add_node(&mut self, name: String, kind: NodeKind) -> Result<NodeId> {
        if name.trim().is_empty() {
            return Err(CallbackError::Graph("node name must not be empty".to_string()));
        }
        if self.by_name.contains_key(&name) {
            return Err(CallbackError::Graph(format!("duplicate node name '{name}'")));
        }

        let id = NodeId(self.nodes.len());
        self.by_name.insert(name.clone(), id);
        self.nodes.push(Node { id, name, kind });
        Ok(id)
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.by_name.get(name).and_then(|id| self.node(*id))
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All variable nodes, in creation order.
    pub fn variables(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| matches!(n.kind, NodeKind::Variable { .. }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
