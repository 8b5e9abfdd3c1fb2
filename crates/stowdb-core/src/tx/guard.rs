use crate::error::{Error, ErrorOrigin};
use std::panic::{AssertUnwindSafe, catch_unwind};

type Rollback = Box<dyn FnOnce() + Send>;

///
/// CommitApplyGuard
///
/// Guard for one participant's store-apply phase.
///
/// - Rollback closures are best-effort, in-process cleanup only.
/// - Dropping the guard before `finish` undoes recorded writes in reverse.
/// - `finish` hands the closures over as an `UndoLog`, kept until the whole
///   transaction has committed, so a later failing participant can still undo
///   this one.
///

pub(crate) struct CommitApplyGuard {
    phase: &'static str,
    finished: bool,
    rollbacks: Vec<Rollback>,
}

impl CommitApplyGuard {
    pub(crate) const fn new(phase: &'static str) -> Self {
        Self {
            phase,
            finished: false,
            rollbacks: Vec::new(),
        }
    }

    pub(crate) fn record_rollback(&mut self, rollback: impl FnOnce() + Send + 'static) {
        self.rollbacks.push(Box::new(rollback));
    }

    pub(crate) fn finish(mut self) -> Result<UndoLog, Error> {
        if self.finished {
            return Err(Error::invariant(
                ErrorOrigin::Transaction,
                format!(
                    "commit apply guard invariant violated: finish called twice ({})",
                    self.phase
                ),
            ));
        }

        self.finished = true;
        Ok(UndoLog {
            rollbacks: std::mem::take(&mut self.rollbacks),
        })
    }
}

impl Drop for CommitApplyGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(phase = self.phase, "commit apply aborted; undoing applied writes");
            run_best_effort(&mut self.rollbacks);
        }
    }
}

///
/// UndoLog
/// Rollback closures of an applied (but not yet final) commit phase.
///

#[derive(Default)]
pub(crate) struct UndoLog {
    rollbacks: Vec<Rollback>,
}

impl UndoLog {
    pub(crate) fn run(mut self) {
        run_best_effort(&mut self.rollbacks);
    }

    pub(crate) fn append(&mut self, mut other: Self) {
        self.rollbacks.append(&mut other.rollbacks);
    }
}

/// Report a failed undo step. Undo continues with the remaining steps.
pub(crate) fn undo_step<T>(step: &'static str, entity: &str, result: Result<T, Error>) {
    if let Err(err) = result {
        tracing::warn!(step, entity, error = %err, "undo step failed");
    }
}

// reverse order mirrors write application; never unwind past this boundary
fn run_best_effort(rollbacks: &mut Vec<Rollback>) {
    while let Some(rollback) = rollbacks.pop() {
        if catch_unwind(AssertUnwindSafe(rollback)).is_err() {
            tracing::warn!("undo step panicked");
        }
    }
}

///
/// TESTS
///
