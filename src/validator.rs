//! Concrete validator
//!
//! A failure found on a symbolic path is only a suspicion: the solver model may
//! differ from real execution (float rounding, unmodelled operations). Before a
//! failure is reported, the property is re-run with every draw replaced by its
//! realized value through a [`ReplayProvider`]. Only a failure that shows up on
//! every replay is real.

use crate::choice::ChoiceValue;
use crate::data::{Abort, DrawBudget};
use crate::providers::{run_property, Property, ReplayProvider};
use crate::verdict::{classify, Classification, Counterexample, FailureOrigin, RawOutcome};
use std::any::Any;

/// Result of replaying a path concretely.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Every replay failed.
    Reproduced(Counterexample),
    /// Every replay passed.
    AllPassed,
    /// Replays diverged from the recorded draws or disagreed with each other.
    Nondeterministic(String),
}

#[derive(Debug, Clone)]
pub struct ConcreteValidator {
    replays: usize,
    budget: DrawBudget,
}

enum ReplayOutcome {
    Pass,
    Fail(FailureOrigin),
    Diverged(String),
}

impl ConcreteValidator {
    pub fn new(replays: usize, budget: DrawBudget) -> Self {
        Self {
            replays: replays.max(1),
            budget,
        }
    }

    pub fn replays(&self) -> usize {
        self.replays
    }

    /// Replay `property` on `draws`. A host interrupt raised by the property is
    /// returned as the untouched unwind payload.
    pub fn replay(
        &self,
        property: &mut Property<'_>,
        draws: &[ChoiceValue],
    ) -> Result<Validation, Box<dyn Any + Send>> {
        let mut first_failure: Option<FailureOrigin> = None;
        let mut passes = 0;

        for attempt in 0..self.replays {
            match self.replay_once(property, draws)? {
                ReplayOutcome::Diverged(reason) => {
                    log::debug!("replay {} diverged: {}", attempt, reason);
                    return Ok(Validation::Nondeterministic(reason));
                }
                ReplayOutcome::Pass => passes += 1,
                ReplayOutcome::Fail(origin) => match &first_failure {
                    Some(first) if *first != origin => {
                        return Ok(Validation::Nondeterministic(format!(
                            "replays failed differently: {} then {}",
                            first, origin
                        )));
                    }
                    Some(_) => {}
                    None => first_failure = Some(origin),
                },
            }
        }

        Ok(match first_failure {
            Some(origin) if passes == 0 => Validation::Reproduced(Counterexample {
                draws: draws.to_vec(),
                origin,
            }),
            Some(_) => Validation::Nondeterministic(format!(
                "{} of {} replays passed",
                passes, self.replays
            )),
            None => Validation::AllPassed,
        })
    }

    fn replay_once(
        &self,
        property: &mut Property<'_>,
        draws: &[ChoiceValue],
    ) -> Result<ReplayOutcome, Box<dyn Any + Send>> {
        let mut provider = ReplayProvider::new(draws.to_vec(), self.budget);
        let outcome = run_property(&mut provider, property)?;

        if let RawOutcome::Aborted(abort) = &outcome {
            return Ok(ReplayOutcome::Diverged(match abort {
                Abort::Nondeterminism(reason) => reason.clone(),
                other => format!("replay aborted: {}", other),
            }));
        }
        if provider.remaining() > 0 {
            return Ok(ReplayOutcome::Diverged(format!(
                "replay left {} recorded draws unused",
                provider.remaining()
            )));
        }

        Ok(match classify(&outcome, None) {
            Classification::SuspectedFailure(origin) => ReplayOutcome::Fail(origin),
            _ => ReplayOutcome::Pass,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{interrupt, Interrupt, TestCase};
    use crate::verdict::FailureKind;
    use std::cell::Cell;

    fn validator() -> ConcreteValidator {
        ConcreteValidator::new(2, DrawBudget::default())
    }

    #[test]
    fn test_consistent_failure_is_reproduced() {
        let result = validator()
            .replay(&mut |tc: &mut TestCase<'_>| tc.draw_integer(0, 9).value() != 7, &[ChoiceValue::Integer(7)])
            .unwrap();
        match result {
            Validation::Reproduced(example) => {
                assert_eq!(example.draws, vec![ChoiceValue::Integer(7)]);
                assert_eq!(example.origin.kind, FailureKind::ReturnedFalse);
            }
            other => panic!("expected a reproduced failure, got {:?}", other),
        }
    }

    #[test]
    fn test_passing_replay_is_an_artifact() {
        let result = validator()
            .replay(&mut |tc: &mut TestCase<'_>| tc.draw_integer(0, 9).value() != 7, &[ChoiceValue::Integer(3)])
            .unwrap();
        assert_eq!(result, Validation::AllPassed);
    }

    #[test]
    fn test_flaky_property_is_nondeterministic() {
        let calls = Cell::new(0);
        let result = validator()
            .replay(
                &mut |tc: &mut TestCase<'_>| {
                    tc.draw_integer(0, 9);
                    calls.set(calls.get() + 1);
                    calls.get() % 2 == 0
                },
                &[ChoiceValue::Integer(1)],
            )
            .unwrap();
        assert!(matches!(result, Validation::Nondeterministic(_)));
    }

    #[test]
    fn test_diverging_draws_are_nondeterministic() {
        let result = validator()
            .replay(
                &mut |tc: &mut TestCase<'_>| {
                    tc.draw_integer(0, 9);
                    tc.draw_integer(0, 9);
                    false
                },
                &[ChoiceValue::Integer(1)],
            )
            .unwrap();
        assert!(matches!(result, Validation::Nondeterministic(_)));

        let result = validator()
            .replay(&mut |_: &mut TestCase<'_>| false, &[ChoiceValue::Integer(1)])
            .unwrap();
        assert!(matches!(result, Validation::Nondeterministic(_)));
    }

    #[test]
    fn test_failures_with_different_origins_are_nondeterministic() {
        let calls = Cell::new(0);
        let result = validator()
            .replay(
                &mut |tc: &mut TestCase<'_>| {
                    tc.draw_integer(0, 9);
                    calls.set(calls.get() + 1);
                    if calls.get() == 2 {
                        panic!("second replay");
                    }
                    false
                },
                &[ChoiceValue::Integer(1)],
            )
            .unwrap();
        assert!(matches!(result, Validation::Nondeterministic(_)));
    }

    #[test]
    fn test_interrupt_passes_through() {
        let payload = validator()
            .replay(&mut |_: &mut TestCase<'_>| -> bool { interrupt("stop") }, &[])
            .unwrap_err();
        let interrupt = payload.downcast::<Interrupt>().unwrap();
        assert_eq!(interrupt.reason, "stop");
    }
}
