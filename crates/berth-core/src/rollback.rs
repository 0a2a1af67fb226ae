use crate::engine::Engine;
use crate::lifecycle::{validate_transition, CreationPhase};
use crate::CoreError;
use berth_store::{FileLock, RollbackStep, WalOpKind};
use tracing::{debug, warn};

/// Compensation stack of one lifecycle operation.
///
/// Each side effect pushes the step that undoes it, in memory and in the
/// write-ahead log. Dropping the stack without `commit` applies the steps in
/// reverse; a crash before either leaves them for journal recovery.
///
/// The stack holds the engine's operations lock in shared mode for its whole
/// life, which keeps another process's startup recovery off its journal entry.
pub(crate) struct Rollback<'a> {
    engine: &'a Engine,
    _operations: FileLock,
    kind: WalOpKind,
    target: String,
    op_id: String,
    steps: Vec<RollbackStep>,
    phase: CreationPhase,
    finished: bool,
}

impl<'a> Rollback<'a> {
    pub(crate) fn begin(
        engine: &'a Engine,
        kind: WalOpKind,
        target: &str,
    ) -> Result<Self, CoreError> {
        let operations = FileLock::acquire_shared(&engine.operations_lock())?;
        let op_id = engine.wal.begin(kind, target)?;
        Ok(Self {
            engine,
            _operations: operations,
            kind,
            target: target.to_owned(),
            op_id,
            steps: Vec::new(),
            phase: CreationPhase::Pending,
            finished: false,
        })
    }

    pub(crate) fn push(&mut self, step: RollbackStep) -> Result<(), CoreError> {
        self.steps.push(step.clone());
        self.engine.wal.add_rollback_step(&self.op_id, step)?;
        Ok(())
    }

    pub(crate) fn advance(&mut self, to: CreationPhase) -> Result<(), CoreError> {
        validate_transition(self.phase, to)?;
        debug!("{} of '{}': {} -> {to}", self.kind, self.target, self.phase);
        self.phase = to;
        Ok(())
    }

    pub(crate) fn commit(mut self) -> Result<(), CoreError> {
        self.advance(CreationPhase::Committed)?;
        self.finished = true;
        self.engine.wal.commit(&self.op_id)?;
        Ok(())
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !self.steps.is_empty() {
            warn!(
                "{} of '{}' failed while {}; rolling back {} step(s)",
                self.kind,
                self.target,
                self.phase,
                self.steps.len()
            );
        }
        for step in self.steps.drain(..).rev() {
            self.engine.undo(&step);
        }
        if let Err(e) = self.engine.wal.commit(&self.op_id) {
            warn!("failed to clear journal entry {}: {e}", self.op_id);
        }
    }
}
