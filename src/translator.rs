//! Value draw translator
//!
//! Turns a host draw request into a solver variable whose domain is exactly the
//! set of values a native draw could return. The domain itself lives in the
//! [`Constraints`](crate::choice::Constraints) handed to the engine, so integer
//! ranges, choice indices, string alphabets and sizes, byte sizes, boolean
//! probabilities and the sign-aware float bounds are all enforced by the same
//! `choice_permitted` predicate the native providers satisfy.
//!
//! Each non-forced draw adds one single-outcome edge to the path, keyed on the
//! draw's signature. Forced draws return their value and leave the tree alone.

use crate::choice::ChoiceType;
use crate::data::{Abort, DrawRequest};
use crate::datatree::DecisionSignature;
use crate::session::ExecutionState;
use crate::solver::{Pred, Term};

/// Name prefix of the solver variable for each draw kind.
pub fn name_prefix(kind: ChoiceType) -> &'static str {
    match kind {
        ChoiceType::Integer => "int",
        ChoiceType::Boolean => "bool",
        ChoiceType::Float => "float",
        ChoiceType::String => "str",
        ChoiceType::Bytes => "bytes",
        ChoiceType::Choice => "choice",
    }
}

/// Service one draw on the active path. Returns the term standing for the drawn
/// value: a fresh variable, or a constant for forced draws.
pub(crate) fn translate(state: &mut ExecutionState, request: DrawRequest) -> Result<Term, Abort> {
    match translate_inner(state, request) {
        Ok(term) => Ok(term),
        Err(abort) => Err(state.note(abort)),
    }
}

fn translate_inner(state: &mut ExecutionState, request: DrawRequest) -> Result<Term, Abort> {
    if let Err(err) = request.validate() {
        return Err(Abort::Unsatisfiable(err.to_string()));
    }

    if let Some(value) = request.forced.clone() {
        let term = Term::Const(value);
        state.record_draw(request, term.clone())?;
        return Ok(term);
    }

    state.decide(DecisionSignature::Draw(request.signature()), |_| Ok(vec![Pred::Const(true)]))?;
    let name = state.fresh_name(name_prefix(request.kind))?;
    let var = state.declare(&name, &request)?;
    state.extend_model(var)?;
    log::trace!("drew {} as {}", request.kind, name);

    let term = Term::Var(var);
    state.record_draw(request, term.clone())?;
    Ok(term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::{
        choice_permitted, BooleanConstraints, ChoiceValue, Constraints, FloatConstraints, IntegerConstraints,
    };
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
    fn test_concretized_draws_satisfy_their_constraints() {
        let shared = state();
        let session = ExecutionSession::start(&shared).unwrap();
        let domains = vec![
            Constraints::Integer(IntegerConstraints::new(Some(-5), Some(-2), Some(0))),
            Constraints::Float(FloatConstraints::bounded(0.0, 1.0)),
            Constraints::Float(FloatConstraints::bounded(-1.0, -0.0)),
            Constraints::Boolean(BooleanConstraints::with_probability(1.0)),
        ];
        for constraints in &domains {
            translate(&mut shared.borrow_mut(), DrawRequest::new(constraints.clone())).unwrap();
        }
        let record = session.finish().unwrap();
        let values = record.realized_draws().unwrap();
        for (value, constraints) in values.iter().zip(&domains) {
            assert!(choice_permitted(value, constraints), "{} violates {:?}", value, constraints);
        }
        assert_eq!(values[0], ChoiceValue::Integer(-2));
        assert_eq!(values[3], ChoiceValue::Boolean(true));
    }

    #[test]
    fn test_forced_draw_adds_no_edge() {
        let shared = state();
        let _session = ExecutionSession::start(&shared).unwrap();
        let before = shared.borrow().tree.len();
        let request = DrawRequest::forced(
            Constraints::Boolean(BooleanConstraints::new()),
            ChoiceValue::Boolean(false),
        );
        let term = translate(&mut shared.borrow_mut(), request).unwrap();
        assert_eq!(term, Term::Const(ChoiceValue::Boolean(false)));
        assert_eq!(shared.borrow().tree.len(), before);
        assert_eq!(shared.borrow().draw_count(), 1);
    }

    #[test]
    fn test_empty_domain_is_unsatisfiable() {
        let shared = state();
        let _session = ExecutionSession::start(&shared).unwrap();
        let request = DrawRequest::new(Constraints::Integer(IntegerConstraints::bounded(3, 1)));
        let err = translate(&mut shared.borrow_mut(), request).unwrap_err();
        assert!(matches!(err, Abort::Unsatisfiable(_)));
    }

    #[test]
    fn test_name_prefixes() {
        assert_eq!(name_prefix(ChoiceType::Integer), "int");
        assert_eq!(name_prefix(ChoiceType::Choice), "choice");
    }
}
