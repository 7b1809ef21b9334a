//! Execution contexts and the thread-local ambient-context stack.
//!
//! Entering a context pushes it onto the stack and returns a [`ContextGuard`];
//! dropping the guard pops back to the depth it was created at, so the
//! caller's ambient context is restored on every exit path.

use crate::graph::{Graph, GraphId};
use crate::session::Session;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

thread_local! {
    static AMBIENT: RefCell<Vec<Arc<ExecutionContext>>> = const { RefCell::new(Vec::new()) };
}

/// A graph together with the session bound to it.
#[derive(Debug)]
pub struct ExecutionContext {
    graph: Graph,
    session: Session,
}

impl ExecutionContext {
    /// Freeze `graph` and open a session on it.
    #[must_use]
    pub fn new(graph: Graph) -> Arc<Self> {
        let session = Session::new(&graph);
        Arc::new(Self { graph, session })
    }

    #[must_use]
    pub fn id(&self) -> GraphId {
        self.graph.id()
    }

    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Make this context ambient until the returned guard is dropped.
    pub fn enter(self: &Arc<Self>) -> ContextGuard {
        let depth = AMBIENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            let depth = stack.len();
            stack.push(Arc::clone(self));
            depth
        });
        trace!(graph_id = %self.id(), depth, "Entered execution context");
        ContextGuard {
            depth,
            _not_send: PhantomData,
        }
    }
}

/// The innermost entered context on this thread, if any.
#[must_use]
pub fn current_context() -> Option<Arc<ExecutionContext>> {
    AMBIENT.with(|stack| stack.borrow().last().cloned())
}

#[cfg(test)]
fn ambient_depth() -> usize {
    AMBIENT.with(|stack| stack.borrow().len())
}

/// Restores the previous ambient context when dropped.
#[must_use = "the context is left as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    depth: usize,
    // The stack is per-thread, so the guard must stay on the thread that made it.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let _ = AMBIENT.try_with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}
