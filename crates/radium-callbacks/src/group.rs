//! The callback group driven by the training loop.
//!
//! `Callbacks` holds every callback in invocation order and owns the secondary
//! context test callbacks run in. Each lifecycle entry point walks the
//! callbacks in order; the kind of a callback decides which context it runs in
//! and whether it takes part in a phase at all, never when it runs.

use crate::callback::{Callback, CallbackKind};
use crate::checkpoint::CheckpointLocator;
use crate::config::CallbacksConfig;
use crate::error::Result;
use crate::loader::CallbackLoader;
use crate::secondary::SecondaryContextManager;
use crate::timer::{CallbackTimeLogger, TimingThresholds};
use crate::trainer::Trainer;
use tracing::debug;

/// Label the checkpoint restore is timed under.
pub const RESTORE_CHECKPOINT_LABEL: &str = "restore checkpoint";

/// A container holding all callbacks, running each in the right order and
/// the right execution context.
pub struct Callbacks {
    callbacks: Vec<Box<dyn Callback>>,
    test_context: SecondaryContextManager,
    timing: TimingThresholds,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.callbacks.iter().map(|cb| cb.name()).collect();
        f.debug_struct("Callbacks")
            .field("callbacks", &names)
            .field("test_context", &self.test_context)
            .field("timing", &self.timing)
            .finish()
    }
}

impl Callbacks {
    /// Group `callbacks` in the given order. Test callbacks restore from the
    /// checkpoints `checkpoints` points at.
    #[must_use]
    pub fn new(
        callbacks: Vec<Box<dyn Callback>>,
        checkpoints: impl CheckpointLocator + 'static,
    ) -> Self {
        Self {
            callbacks,
            test_context: SecondaryContextManager::new(checkpoints),
            timing: TimingThresholds::default(),
        }
    }

    /// Build from configuration through `loader`. Fails on an unknown kind
    /// before any callback is constructed.
    pub fn from_config(config: &CallbacksConfig, loader: &CallbackLoader) -> Result<Self> {
        loader.load(config)
    }

    #[must_use]
    pub fn with_timing(mut self, timing: TimingThresholds) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<CallbackKind> {
        self.callbacks.iter().map(|cb| cb.kind()).collect()
    }

    #[must_use]
    pub fn test_context(&self) -> &SecondaryContextManager {
        &self.test_context
    }

    pub fn before_train(&mut self, trainer: &dyn Trainer) -> Result<()> {
        debug!(callbacks = self.callbacks.len(), "before_train");
        for cb in &mut self.callbacks {
            match cb.kind() {
                CallbackKind::Train => cb.before_train(trainer)?,
                CallbackKind::Test => {
                    let _scope = self.test_context.before_train_context(trainer)?;
                    cb.before_train(trainer)?;
                }
            }
        }
        Ok(())
    }

    pub fn after_train(&mut self) -> Result<()> {
        debug!(callbacks = self.callbacks.len(), "after_train");
        // Test callbacks stay in the caller's context here, unlike before_train
        // and trigger_epoch.
        for cb in &mut self.callbacks {
            cb.after_train()?;
        }
        Ok(())
    }

    pub fn trigger_step(&mut self) -> Result<()> {
        for cb in &mut self.callbacks {
            if cb.kind() == CallbackKind::Train {
                cb.trigger_step()?;
            }
        }
        Ok(())
    }

    /// Run the epoch trigger of every callback.
    ///
    /// The latest checkpoint is restored into the secondary context once per
    /// call, right before the first test callback, so test callbacks always
    /// see this epoch's weights.
    pub fn trigger_epoch(&mut self) -> Result<()> {
        let mut tm = CallbackTimeLogger::new(self.timing);

        let mut test_sess_restored = false;
        for cb in &mut self.callbacks {
            let name = cb.name();
            match cb.kind() {
                CallbackKind::Train => {
                    let _timed = tm.timed(name);
                    cb.trigger_epoch()?;
                }
                CallbackKind::Test => {
                    if !test_sess_restored {
                        tm.time(RESTORE_CHECKPOINT_LABEL, || {
                            self.test_context.restore_checkpoint()
                        })?;
                        test_sess_restored = true;
                    }
                    let _scope = self.test_context.trigger_epoch_context()?;
                    let _timed = tm.timed(name);
                    cb.trigger_epoch()?;
                }
            }
        }

        tm.log();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{update_checkpoint_state, CheckpointDir};
    use crate::context::{current_context, ExecutionContext};
    use crate::error::CallbackError;
    use crate::graph::{Graph, GraphId, NodeId};
    use crate::session::Saver;
    use crate::trainer::Model;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;
    use tempfile::TempDir;

    type Journal = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        label: &'static str,
        kind: CallbackKind,
        journal: Journal,
        fail_before_train: bool,
        fail_epoch: bool,
    }

    impl Recorder {
        fn boxed(label: &'static str, kind: CallbackKind, journal: &Journal) -> Box<dyn Callback> {
            Box::new(Self {
                label,
                kind,
                journal: Rc::clone(journal),
                fail_before_train: false,
                fail_epoch: false,
            })
        }

        fn record(&self, event: &str) {
            let ctx = current_context().map(|c| c.id());
            self.journal.borrow_mut().push(format!("{}.{}@{}", self.label, event, describe(ctx)));
        }
    }

    thread_local! {
        static PRIMARY_ID: RefCell<Option<GraphId>> = const { RefCell::new(None) };
    }

    fn describe(ctx: Option<GraphId>) -> &'static str {
        match ctx {
            None => "none",
            Some(id) if PRIMARY_ID.with(|p| *p.borrow() == Some(id)) => "primary",
            Some(_) => "secondary",
        }
    }

    impl Callback for Recorder {
        fn kind(&self) -> CallbackKind {
            self.kind
        }
        fn name(&self) -> &'static str {
            self.label
        }
        fn before_train(&mut self, _trainer: &dyn Trainer) -> anyhow::Result<()> {
            self.record("before_train");
            if self.fail_before_train {
                anyhow::bail!("{} setup failed", self.label);
            }
            Ok(())
        }
        fn after_train(&mut self) -> anyhow::Result<()> {
            self.record("after_train");
            Ok(())
        }
        fn trigger_step(&mut self) -> anyhow::Result<()> {
            self.record("step");
            Ok(())
        }
        fn trigger_epoch(&mut self) -> anyhow::Result<()> {
            self.record("epoch");
            if self.fail_epoch {
                anyhow::bail!("{} failed", self.label);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingModel {
        builds: RefCell<usize>,
    }

    impl Model for CountingModel {
        fn input_vars(&self, graph: &mut Graph) -> anyhow::Result<Vec<NodeId>> {
            Ok(vec![graph.placeholder("x", vec![2])?])
        }
        fn build_cost(
            &self,
            graph: &mut Graph,
            inputs: &[NodeId],
            _is_training: bool,
        ) -> anyhow::Result<NodeId> {
            *self.builds.borrow_mut() += 1;
            let w = graph.variable("w", vec![0.0, 0.0], true)?;
            Ok(graph.op("cost", "dot", vec![inputs[0], w])?)
        }
    }

    struct StubTrainer {
        model: CountingModel,
        primary: Arc<ExecutionContext>,
    }

    impl StubTrainer {
        fn new() -> Self {
            let primary = ExecutionContext::new(Graph::new());
            PRIMARY_ID.with(|p| *p.borrow_mut() = Some(primary.id()));
            Self {
                model: CountingModel::default(),
                primary,
            }
        }
    }

    impl Trainer for StubTrainer {
        fn model(&self) -> &dyn Model {
            &self.model
        }
        fn context(&self) -> Arc<ExecutionContext> {
            Arc::clone(&self.primary)
        }
    }

    fn write_checkpoint(dir: &std::path::Path, w: Vec<f64>) {
        let mut graph = Graph::new();
        graph.global_step().unwrap();
        graph.variable("w", vec![0.0, 0.0], true).unwrap();
        let ctx = ExecutionContext::new(graph);
        ctx.session().assign("w", w).unwrap();
        let path = dir.join("model-1.json");
        Saver::new(ctx.graph()).save(ctx.session(), &path).unwrap();
        update_checkpoint_state(dir, &path, 0).unwrap();
    }

    fn events(journal: &Journal) -> Vec<String> {
        journal.borrow().clone()
    }

    #[test]
    fn test_before_train_routes_by_kind_in_order() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let trainer = StubTrainer::new();
        let mut group = Callbacks::new(
            vec![
                Recorder::boxed("A", CallbackKind::Train, &journal),
                Recorder::boxed("B", CallbackKind::Test, &journal),
                Recorder::boxed("C", CallbackKind::Train, &journal),
            ],
            CheckpointDir::new(temp.path()),
        );

        let _primary = trainer.primary.enter();
        group.before_train(&trainer).unwrap();

        assert_eq!(
            events(&journal),
            vec!["A.before_train@primary", "B.before_train@secondary", "C.before_train@primary"]
        );
        assert!(group.test_context().is_active());
        assert_eq!(current_context().map(|c| c.id()), Some(trainer.primary.id()));
    }

    #[test]
    fn test_before_train_error_stops_and_restores_context() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let trainer = StubTrainer::new();
        let failing: Box<dyn Callback> = Box::new(Recorder {
            label: "B",
            kind: CallbackKind::Test,
            journal: Rc::clone(&journal),
            fail_before_train: true,
            fail_epoch: false,
        });
        let mut group = Callbacks::new(
            vec![
                Recorder::boxed("A", CallbackKind::Train, &journal),
                failing,
                Recorder::boxed("C", CallbackKind::Train, &journal),
            ],
            CheckpointDir::new(temp.path()),
        );

        let _primary = trainer.primary.enter();
        let err = group.before_train(&trainer).unwrap_err();

        assert_eq!(err.to_string(), "B setup failed");
        assert!(matches!(err, CallbackError::External(_)));
        assert_eq!(events(&journal), vec!["A.before_train@primary", "B.before_train@secondary"]);
        assert_eq!(current_context().map(|c| c.id()), Some(trainer.primary.id()));
    }

    #[test]
    fn test_trigger_step_skips_test_callbacks() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let mut group = Callbacks::new(
            vec![
                Recorder::boxed("T1", CallbackKind::Test, &journal),
                Recorder::boxed("A", CallbackKind::Train, &journal),
                Recorder::boxed("T2", CallbackKind::Test, &journal),
                Recorder::boxed("B", CallbackKind::Train, &journal),
            ],
            CheckpointDir::new(temp.path()),
        );

        group.trigger_step().unwrap();
        assert_eq!(events(&journal), vec!["A.step@none", "B.step@none"]);
    }

    #[test]
    fn test_secondary_context_built_once() {
        let temp = TempDir::new().unwrap();
        write_checkpoint(temp.path(), vec![1.0, 1.0]);
        let journal = Journal::default();
        let trainer = StubTrainer::new();
        let mut group = Callbacks::new(
            vec![
                Recorder::boxed("T1", CallbackKind::Test, &journal),
                Recorder::boxed("T2", CallbackKind::Test, &journal),
            ],
            CheckpointDir::new(temp.path()),
        );

        group.before_train(&trainer).unwrap();
        for _ in 0..3 {
            group.trigger_epoch().unwrap();
        }
        group.before_train(&trainer).unwrap();

        assert_eq!(*trainer.model.builds.borrow(), 1);
    }

    #[test]
    fn test_trigger_epoch_restores_before_first_test_callback() {
        let temp = TempDir::new().unwrap();
        write_checkpoint(temp.path(), vec![3.0, 4.0]);
        let journal = Journal::default();
        let trainer = StubTrainer::new();
        let mut group = Callbacks::new(
            vec![
                Recorder::boxed("A", CallbackKind::Train, &journal),
                Recorder::boxed("T", CallbackKind::Test, &journal),
            ],
            CheckpointDir::new(temp.path()),
        );

        group.before_train(&trainer).unwrap();
        journal.borrow_mut().clear();
        group.trigger_epoch().unwrap();

        assert_eq!(events(&journal), vec!["A.epoch@none", "T.epoch@secondary"]);
        let secondary = group.test_context().context().unwrap();
        assert_eq!(secondary.session().value("w").unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_each_epoch_trigger_restores_latest_checkpoint() {
        let temp = TempDir::new().unwrap();
        write_checkpoint(temp.path(), vec![1.0, 1.0]);
        let journal = Journal::default();
        let trainer = StubTrainer::new();
        let mut group =
            Callbacks::new(
                vec![Recorder::boxed("T", CallbackKind::Test, &journal)],
                CheckpointDir::new(temp.path()),
            );

        group.before_train(&trainer).unwrap();
        group.trigger_epoch().unwrap();
        write_checkpoint(temp.path(), vec![2.0, 2.0]);
        group.trigger_epoch().unwrap();

        let secondary = group.test_context().context().unwrap();
        assert_eq!(secondary.session().value("w").unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_missing_checkpoint_stops_before_test_callback() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let trainer = StubTrainer::new();
        let mut group = Callbacks::new(
            vec![
                Recorder::boxed("A", CallbackKind::Train, &journal),
                Recorder::boxed("T", CallbackKind::Test, &journal),
            ],
            CheckpointDir::new(temp.path()),
        );

        group.before_train(&trainer).unwrap();
        journal.borrow_mut().clear();
        let err = group.trigger_epoch().unwrap_err();

        assert!(matches!(err, CallbackError::MissingCheckpoint { .. }));
        assert_eq!(events(&journal), vec!["A.epoch@none"]);
    }

    struct CountingLocator {
        inner: CheckpointDir,
        lookups: Rc<Cell<usize>>,
    }

    impl CheckpointLocator for CountingLocator {
        fn location(&self) -> &std::path::Path {
            self.inner.location()
        }
        fn latest_checkpoint(&self) -> Result<Option<std::path::PathBuf>> {
            self.lookups.set(self.lookups.get() + 1);
            self.inner.latest_checkpoint()
        }
    }

    #[test]
    fn test_one_restore_per_epoch_trigger() {
        let temp = TempDir::new().unwrap();
        write_checkpoint(temp.path(), vec![1.0, 2.0]);
        let journal = Journal::default();
        let lookups = Rc::new(Cell::new(0));
        let trainer = StubTrainer::new();
        let mut group = Callbacks::new(
            vec![
                Recorder::boxed("T1", CallbackKind::Test, &journal),
                Recorder::boxed("A", CallbackKind::Train, &journal),
                Recorder::boxed("T2", CallbackKind::Test, &journal),
            ],
            CountingLocator {
                inner: CheckpointDir::new(temp.path()),
                lookups: Rc::clone(&lookups),
            },
        );

        group.before_train(&trainer).unwrap();
        assert_eq!(lookups.get(), 0);
        for epoch in 1..=3 {
            group.trigger_epoch().unwrap();
            assert_eq!(lookups.get(), epoch);
        }
    }

    #[test]
    fn test_no_test_callbacks_never_touch_checkpoints() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let mut group =
            Callbacks::new(
                vec![Recorder::boxed("A", CallbackKind::Train, &journal)],
                CheckpointDir::new(temp.path()),
            );

        // No checkpoint exists, so any restore attempt would fail.
        group.trigger_epoch().unwrap();
        assert!(!group.test_context().is_active());
    }

    #[test]
    fn test_callback_error_propagates_and_restores_context() {
        let temp = TempDir::new().unwrap();
        write_checkpoint(temp.path(), vec![0.0, 0.0]);
        let journal = Journal::default();
        let trainer = StubTrainer::new();
        let failing: Box<dyn Callback> = Box::new(Recorder {
            label: "T",
            kind: CallbackKind::Test,
            journal: Rc::clone(&journal),
            fail_before_train: false,
            fail_epoch: true,
        });
        let mut group = Callbacks::new(
            vec![failing, Recorder::boxed("A", CallbackKind::Train, &journal)],
            CheckpointDir::new(temp.path()),
        );

        group.before_train(&trainer).unwrap();
        journal.borrow_mut().clear();
        let err = group.trigger_epoch().unwrap_err();

        assert_eq!(err.to_string(), "T failed");
        assert!(matches!(err, CallbackError::External(_)));
        assert_eq!(events(&journal), vec!["T.epoch@secondary"]);
        assert!(current_context().is_none());
    }

    #[test]
    fn test_after_train_does_not_enter_secondary_context() {
        // Known gap: unlike before_train and trigger_epoch, after_train leaves
        // test callbacks in the caller's context.
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let trainer = StubTrainer::new();
        let mut group = Callbacks::new(
            vec![
                Recorder::boxed("A", CallbackKind::Train, &journal),
                Recorder::boxed("T", CallbackKind::Test, &journal),
            ],
            CheckpointDir::new(temp.path()),
        );

        group.before_train(&trainer).unwrap();
        journal.borrow_mut().clear();
        let _primary = trainer.primary.enter();
        group.after_train().unwrap();

        assert_eq!(events(&journal), vec!["A.after_train@primary", "T.after_train@primary"]);
    }
}
