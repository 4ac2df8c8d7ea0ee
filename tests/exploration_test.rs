//! # Path Exploration Test Suite
//!
//! Exercises the symbolic provider one iteration at a time: finite domains are
//! enumerated leaf by leaf and then verified, failures are only reported after a
//! concrete replay, and engine conditions (timeouts, nondeterminism, nested
//! sessions, host interrupts) never turn into a failing verdict.

use conjecture_symbolic::solver::{Pred, SolveResult, UnknownReason, VarId};
use conjecture_symbolic::{
    host_scope, interrupt, session_active, BridgeError, CannotProceedScope, ChoiceType, ChoiceValue, Constraints,
    DiscardReason, EngineError, EnumerativeEngine, ExplorationRunner, Interrupt, MemorySink, PrimitiveProvider,
    ProviderConfig, RunResult, RunnerConfig, SymbolicEngine, SymbolicProvider, TestCase, Verdict,
};
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use test_log::test;

fn provider() -> SymbolicProvider {
    SymbolicProvider::new(ProviderConfig::default()).unwrap()
}

fn runner(provider: SymbolicProvider) -> ExplorationRunner {
    ExplorationRunner::with_provider(RunnerConfig::default(), Box::new(provider))
}

#[test]
fn test_small_integer_domain_is_enumerated_then_verified() {
    let mut provider = provider();
    let seen = RefCell::new(Vec::new());
    let mut verdicts = Vec::new();

    loop {
        match provider.run_test_case(&mut |tc: &mut TestCase<'_>| {
            seen.borrow_mut().push(tc.draw_integer(0, 9).value());
            true
        }) {
            Ok(verdict) => verdicts.push(verdict),
            Err(err) => {
                assert_eq!(err, BridgeError::CannotProceed(CannotProceedScope::Verified));
                break;
            }
        }
        assert!(verdicts.len() <= 10, "explored more paths than the domain has values");
    }

    assert_eq!(verdicts.len(), 10);
    assert_eq!(verdicts.last(), Some(&Verdict::Verified));
    assert!(verdicts[..9].iter().all(|v| *v == Verdict::Passed));

    let mut values = seen.into_inner();
    values.sort();
    assert_eq!(values, (0..10).collect::<Vec<i128>>());
}

#[test]
fn test_failure_at_seven_is_reported_and_never_verified() {
    let mut runner = runner(provider());
    let result = runner.run(|tc| tc.draw_integer(0, 9).value() != 7).unwrap();

    match result {
        RunResult::Failed(example) => assert_eq!(example.draws, vec![ChoiceValue::Integer(7)]),
        other => panic!("expected a failure at 7, got {:?}", other),
    }
    assert_eq!(runner.stats.passed, 7);
}

#[test]
fn test_comparison_finds_the_failing_branch_directly() {
    let mut provider = provider();
    let verdict = provider
        .run_test_case(&mut |tc: &mut TestCase<'_>| tc.draw_integer(0, 9) != 7i128)
        .unwrap();
    match verdict {
        Verdict::Failed(example) => {
            assert_eq!(example.draws, vec![ChoiceValue::Integer(7)]);
            assert!(example.to_string().contains('7'));
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    assert_ne!(
        provider.exploration_status(),
        conjecture_symbolic::ExplorationStatus::Verified
    );
}

#[test]
fn test_timed_out_path_is_retried() {
    let config = ProviderConfig {
        per_path_timeout: Duration::from_millis(50),
        ..ProviderConfig::default()
    };
    let mut runner = runner(SymbolicProvider::new(config).unwrap());
    let calls = Cell::new(0);

    let result = runner
        .run(|tc| {
            let x = tc.draw_integer(0, 1);
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                std::thread::sleep(Duration::from_millis(80));
            }
            x > 0i128 || x == 0i128
        })
        .unwrap();

    assert_eq!(runner.stats.timeouts, 1);
    assert_eq!(result, RunResult::Verified);
}

#[test]
fn test_nested_session_is_rejected_and_leaves_the_inner_tree_alone() {
    let mut outer = provider();
    let mut inner = provider();
    let probe = inner.probe();
    let mut nested = None;

    let verdict = outer.run_test_case(&mut |tc: &mut TestCase<'_>| {
        let x = tc.draw_integer(0, 3);
        nested = Some(inner.run_test_case(&mut |_: &mut TestCase<'_>| true));
        x >= 0i128
    });

    assert!(verdict.is_ok());
    assert_eq!(nested, Some(Err(BridgeError::NestedSession)));
    assert_eq!(probe.tree_size(), 1);
    assert!(!probe.is_active());
    assert!(!session_active());
}

#[test]
fn test_host_realizations_leave_the_tree_unchanged() {
    let mut provider = provider();
    let probe = provider.probe();
    let observed = RefCell::new(None);

    provider
        .run_test_case(&mut |tc: &mut TestCase<'_>| {
            let x = tc.draw_integer(0, 100);
            let s = tc.draw_string(Default::default());
            let before = (probe.tree_size(), probe.snapshot_count());
            let rendered = format!("{} {:?}", x, s);
            let realized = host_scope(|| x.value());
            let after = (probe.tree_size(), probe.snapshot_count());
            *observed.borrow_mut() = Some((before, after, rendered, realized));
            true
        })
        .unwrap();

    let ((size_before, snaps_before), (size_after, snaps_after), rendered, realized) =
        observed.into_inner().unwrap();
    assert_eq!(size_before, size_after);
    assert!(snaps_after >= snaps_before + 3);
    assert!(rendered.starts_with(&realized.to_string()));
}

#[test]
fn test_flaky_failure_is_never_reported() {
    let mut runner = runner(provider());
    let calls = Cell::new(0);

    let result = runner
        .run(|tc| {
            tc.draw_integer(0, 9);
            calls.set(calls.get() + 1);
            calls.get() % 2 == 0
        })
        .unwrap();

    assert!(!matches!(result, RunResult::Failed(_)));
    assert!(runner.stats.nondeterministic > 0);
}

#[test]
fn test_path_that_changes_between_runs_is_nondeterministic() {
    let mut runner = runner(provider());
    let calls = Cell::new(0);

    let result = runner
        .run(|tc| {
            let x = tc.draw_integer(0, 9);
            calls.set(calls.get() + 1);
            let taken = if calls.get() % 2 == 1 { x < 5i128 } else { x > 5i128 };
            taken || !taken
        })
        .unwrap();

    assert!(!matches!(result, RunResult::Failed(_)));
    assert!(runner.stats.nondeterministic > 0);
}

#[test]
fn test_failure_that_does_not_replay_is_a_model_artifact() {
    let mut runner = runner(provider());

    let result = runner
        .run(|tc| {
            tc.draw_integer(0, 3);
            tc.provider_name() != "symbolic"
        })
        .unwrap();

    assert_eq!(result, RunResult::Inconclusive(Some(DiscardReason::ModelArtifact)));
    assert_eq!(runner.stats.model_artifacts, ProviderConfig::default().max_path_retries);

    // the next property starts from a fresh tree
    assert_eq!(runner.run(|_| true).unwrap(), RunResult::Verified);
    assert_eq!(runner.stats.passed, 1);
    assert_eq!(runner.stats.discarded(), 0);
}

#[test]
fn test_unsatisfiable_draw_is_reported_as_unsatisfiable() {
    let mut runner = runner(provider());
    let err = runner.check(|tc| tc.draw_integer(9, 0) > 3i128).unwrap_err();
    assert_eq!(err, BridgeError::Unsatisfiable);
}

#[test]
fn test_overrun_is_never_verified() {
    let config = ProviderConfig {
        max_expansion_depth: 1,
        ..ProviderConfig::default()
    };
    let mut runner = runner(SymbolicProvider::new(config).unwrap());

    let result = runner
        .run(|tc| {
            let budget = tc.budget();
            let outer = tc.draw_vec(budget, |tc, inner| tc.draw_vec(inner, |tc, _| tc.draw_boolean(0.5).value()));
            outer.len() < 100
        })
        .unwrap();

    assert_ne!(result, RunResult::Verified);
    assert!(runner.stats.overruns > 0);
}

#[test]
fn test_interrupt_propagates_and_path_is_retried() {
    let mut provider = provider();
    let calls = Cell::new(0);

    let unwound = catch_unwind(AssertUnwindSafe(|| {
        provider.run_test_case(&mut |tc: &mut TestCase<'_>| {
            tc.draw_boolean(0.5);
            calls.set(calls.get() + 1);
            interrupt("keyboard interrupt")
        })
    }));
    let payload = unwound.unwrap_err();
    assert_eq!(payload.downcast::<Interrupt>().unwrap().reason, "keyboard interrupt");
    assert!(!session_active());

    let verdict = provider
        .run_test_case(&mut |tc: &mut TestCase<'_>| {
            tc.draw_boolean(0.5);
            true
        })
        .unwrap();
    assert_eq!(verdict, Verdict::Verified);
}

#[test]
fn test_observations_are_recorded_per_iteration() {
    let mut provider = provider();
    let sink = MemorySink::new();
    provider.set_observer(Box::new(sink.clone()));
    let mut runner = runner(provider);

    let result = runner.run(|tc| tc.draw_boolean(0.5).value() || true).unwrap();

    assert_eq!(result, RunResult::Verified);
    let observations = sink.observations();
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[0].verdict, "passed");
    assert_eq!(observations[1].verdict, "verified");
    assert_eq!(observations[0].backend, "enumerative");
    assert_eq!(observations[1].iteration, 2);
}

#[test]
fn test_proxies_outlive_their_session() {
    let mut provider = provider();
    let kept = RefCell::new(None);

    provider
        .run_test_case(&mut |tc: &mut TestCase<'_>| {
            let x = tc.draw_integer(5, 9);
            let taken = x > 6i128;
            *kept.borrow_mut() = Some(x);
            taken || !taken
        })
        .unwrap();

    let x = kept.into_inner().unwrap();
    assert!(x.value() > 6);
    assert_eq!(x.snapshot().unwrap(), ChoiceValue::Integer(x.value()));
    assert!(!provider.probe().is_active());
}

#[test]
fn test_overflowing_branch_is_undecided_not_unsatisfiable() {
    let property = |tc: &mut TestCase<'_>| {
        let x = tc.draw_integer(0, 3);
        if x < 2i128 {
            true
        } else {
            x * i128::MAX > 0i128
        }
    };

    let mut symbolic = runner(provider());
    let result = symbolic.run(property).unwrap();
    assert_eq!(result, RunResult::Passed);
    assert_eq!(symbolic.stats.passed, 1);
    assert_eq!(symbolic.stats.undecided, 1);
    assert_eq!(symbolic.stats.unsatisfiable, 0);

    // concretely the multiplication overflows for every x >= 2
    let config = RunnerConfig {
        backend: "random".into(),
        seed: 5,
        ..RunnerConfig::default()
    };
    let mut random = ExplorationRunner::new(config).unwrap();
    match random.run(property).unwrap() {
        RunResult::Failed(example) => assert!(example.draws[0].as_integer().unwrap() >= 2),
        other => panic!("expected the overflow to fail concretely, got {:?}", other),
    }
}

/// Enumerative engine that never claims a proof.
#[derive(Debug, Default)]
struct NoProofEngine(EnumerativeEngine);

impl SymbolicEngine for NoProofEngine {
    fn name(&self) -> &'static str {
        "no-proof"
    }

    fn reset(&mut self) {
        self.0.reset();
    }

    fn set_limits(&mut self, deadline: Instant, model_check_timeout: Duration) {
        self.0.set_limits(deadline, model_check_timeout);
    }

    fn new_symbolic(&mut self, name: &str, kind: ChoiceType, constraints: &Constraints) -> Result<VarId, EngineError> {
        self.0.new_symbolic(name, kind, constraints)
    }

    fn assert(&mut self, pred: Pred) -> Result<(), EngineError> {
        self.0.assert(pred)
    }

    fn check_satisfiable(&mut self, extra: Option<&Pred>) -> Result<SolveResult, EngineError> {
        Ok(match self.0.check_satisfiable(extra)? {
            SolveResult::Unsat => SolveResult::Unknown(UnknownReason::Incomplete),
            other => other,
        })
    }

    fn variable_count(&self) -> usize {
        self.0.variable_count()
    }
}

#[test]
fn test_unknown_answers_never_verify() {
    let provider = SymbolicProvider::with_engine(ProviderConfig::default(), Box::new(NoProofEngine::default())).unwrap();
    let mut runner = runner(provider);

    let result = runner.run(|tc| tc.draw_integer(0, 9) < 20i128).unwrap();

    assert_eq!(result, RunResult::Passed);
    assert_eq!(runner.stats.passed, 1);
    assert_eq!(runner.stats.unsatisfiable, 0);
}
