//! Realization guard
//!
//! A symbolic value can be turned into a concrete one in two ways:
//!
//! - **User realization** (`SymInt::value()` and friends). The path commits to a
//!   concrete value, which is a decision like any branch: the path tree records
//!   "is it this value?" and later paths explore the alternatives in model order.
//! - **Host realization** (hashing, `Display`/`Debug`, value export, anything
//!   inside [`host_scope`]). These read the current model without touching the
//!   tree and are never counted as draws.
//!
//! Keeping the second kind read-only is what makes logging or printing a value
//! inside a property safe: it cannot change which paths get explored.

use crate::choice::ChoiceValue;
use crate::data::Abort;
use crate::datatree::DecisionSignature;
use crate::session::{digest, ExecutionState};
use crate::solver::{eval_term, EngineError, EvalError, Pred, Term};
use std::cell::Cell;

thread_local! {
    static HOST_SCOPE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current code runs on behalf of the host.
pub fn in_host_scope() -> bool {
    HOST_SCOPE_DEPTH.with(|depth| depth.get() > 0)
}

/// RAII marker for host-internal code. While one is alive, proxy comparisons and
/// realizations are answered from model snapshots.
#[derive(Debug)]
pub struct RealizationGuard {
    _private: (),
}

impl RealizationGuard {
    pub fn enter() -> Self {
        HOST_SCOPE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self { _private: () }
    }
}

impl Drop for RealizationGuard {
    fn drop(&mut self) {
        HOST_SCOPE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `f` as host code.
pub fn host_scope<R>(f: impl FnOnce() -> R) -> R {
    let _guard = RealizationGuard::enter();
    f()
}

impl ExecutionState {
    /// Commit the path to a concrete value for `term`.
    ///
    /// Each round asks "is `term` identical to its value in the current model?".
    /// The first path takes "yes"; later paths take "no" and move on to the next
    /// model value, so a finite domain is enumerated one leaf at a time.
    pub(crate) fn realize(&mut self, term: &Term) -> Result<ChoiceValue, Abort> {
        if term.is_ground() {
            return eval_term(term, &Default::default()).map_err(realization_error);
        }
        let signature = DecisionSignature::Realize(digest(term));
        loop {
            let decided = self.decide(signature, |model| {
                let value = eval_term(term, model).map_err(realization_error)?;
                let same = Pred::Identical(term.clone(), value);
                Ok(vec![same.clone(), same.negate()])
            })?;
            match decided.pred {
                Pred::Identical(_, value) if decided.outcome == 0 => return Ok(value),
                _ if decided.outcome == 0 => {
                    return Err(self.note(Abort::EngineInternal(EngineError::Internal(
                        "realization decision without a value".into(),
                    ))))
                }
                _ => {}
            }
        }
    }
}

fn realization_error(err: EvalError) -> Abort {
    match err {
        // the same arithmetic would overflow on a concrete replay
        EvalError::Overflow => Abort::Undecided("arithmetic overflow while realizing a value".into()),
        other => Abort::EngineInternal(EngineError::Internal(format!("cannot realize value: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::{Constraints, IntegerConstraints};
    use crate::data::DrawRequest;
    use crate::session::{ExecutionSession, PathLimits};
    use crate::solver::EnumerativeEngine;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn state() -> Rc<RefCell<ExecutionState>> {
        let limits = PathLimits {
            per_path_timeout: Duration::from_secs(5),
            model_check_timeout: Duration::from_secs(5),
            max_path_depth: 64,
        };
        Rc::new(RefCell::new(ExecutionState::new(Box::new(EnumerativeEngine::new()), limits, 3)))
    }

    #[test]
    fn test_host_scope_nests() {
        assert!(!in_host_scope());
        host_scope(|| {
            assert!(in_host_scope());
            let inner = RealizationGuard::enter();
            assert!(in_host_scope());
            drop(inner);
            assert!(in_host_scope());
        });
        assert!(!in_host_scope());
    }

    #[test]
    fn test_realizations_enumerate_a_small_domain() {
        let shared = state();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let session = ExecutionSession::start(&shared).unwrap();
            let request = DrawRequest::new(Constraints::Integer(IntegerConstraints::bounded(0, 2)));
            let x = crate::translator::translate(&mut shared.borrow_mut(), request).unwrap();
            seen.push(shared.borrow_mut().realize(&x).unwrap());
            let record = session.finish().unwrap();
            shared.borrow_mut().tree.conclude(record.cursor);
        }
        assert_eq!(
            seen,
            vec![ChoiceValue::Integer(0), ChoiceValue::Integer(1), ChoiceValue::Integer(2)]
        );
        assert!(shared.borrow().tree.is_verified());
    }

    #[test]
    fn test_snapshots_leave_the_tree_alone() {
        let shared = state();
        let _session = ExecutionSession::start(&shared).unwrap();
        let request = DrawRequest::new(Constraints::Integer(IntegerConstraints::bounded(0, 9)));
        let x = crate::translator::translate(&mut shared.borrow_mut(), request).unwrap();
        let size = shared.borrow().tree.len();
        for _ in 0..5 {
            shared.borrow().snapshot(&x).unwrap();
        }
        assert_eq!(shared.borrow().tree.len(), size);
        assert_eq!(shared.borrow().snapshot_count(), 5);
    }
}
