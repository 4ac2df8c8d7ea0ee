//! Provider system
//!
//! A provider answers the draws of a property. Three are bundled:
//!
//! - [`SymbolicProvider`] answers every draw with a solver variable and steers
//!   each iteration down an unexplored path of its [`PathTree`](crate::datatree::PathTree).
//! - [`RandomProvider`] samples concrete values from a seeded `ChaCha8Rng`.
//! - [`ReplayProvider`] hands back a fixed list of recorded values. The concrete
//!   validator uses it to re-run suspected failures.
//!
//! Providers are created by name through the [`ProviderRegistry`]. The global
//! registry knows `"random"` and `"symbolic"`.

use crate::choice::{
    BooleanConstraints, BytesConstraints, ChoiceConstraints, ChoiceType, ChoiceValue, Constraints, FloatConstraints,
    IntegerConstraints, StringConstraints,
};
use crate::config::ProviderConfig;
use crate::data::{Abort, DrawBudget, DrawRequest, Interrupt, TestCase};
use crate::errors::{BridgeError, CannotProceedScope};
use crate::observability::{IterationObservation, LogSink, ObservationSink};
use crate::realization::host_scope;
use crate::session::{ExecutionSession, ExecutionState, ExplorationProbe, PathRecord};
use crate::solver::{EngineError, EnumerativeEngine, SymbolicEngine};
use crate::symbolic::{SymBool, SymBytes, SymFloat, SymInt, SymStr, Value};
use crate::validator::{ConcreteValidator, Validation};
use crate::verdict::{
    classify, panic_message, Classification, Counterexample, DiscardReason, FailureOrigin, RawOutcome, Verdict,
};
use once_cell::sync::Lazy;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Name of the symbolic backend in the registry.
pub const SYMBOLIC_BACKEND: &str = "symbolic";

/// Name of the native random backend in the registry.
pub const RANDOM_BACKEND: &str = "random";

/// A property under test. Returns `false` (or panics) on failure.
pub type Property<'p> = dyn FnMut(&mut TestCase<'_>) -> bool + 'p;

/// Lifetime management for providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderLifetime {
    /// Provider lives for the duration of a single test case
    TestCase,
    /// Provider lives for the duration of a test run
    TestRun,
}

/// Where an exploration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorationStatus {
    /// Unexplored paths remain.
    Open,
    /// Every path was covered without a budget cutting any of them short.
    Verified,
    /// Every path was covered, but some were truncated.
    Exhausted,
    /// The remaining paths all hit their retry limit.
    Stalled,
}

/// Abstract provider trait for generation backends
pub trait PrimitiveProvider: std::fmt::Debug {
    /// Registry name of the backend.
    fn name(&self) -> &'static str;

    fn lifetime(&self) -> ProviderLifetime;

    /// Answer one draw.
    fn draw(&mut self, request: DrawRequest) -> Result<Value, Abort>;

    fn draw_integer(&mut self, constraints: IntegerConstraints, forced: Option<i128>) -> Result<SymInt, Abort> {
        let constraints = Constraints::Integer(constraints);
        self.draw(request(constraints, forced.map(ChoiceValue::Integer)))?.into_int()
    }

    fn draw_boolean(&mut self, constraints: BooleanConstraints, forced: Option<bool>) -> Result<SymBool, Abort> {
        let constraints = Constraints::Boolean(constraints);
        self.draw(request(constraints, forced.map(ChoiceValue::Boolean)))?.into_bool()
    }

    fn draw_float(&mut self, constraints: FloatConstraints, forced: Option<f64>) -> Result<SymFloat, Abort> {
        let constraints = Constraints::Float(constraints);
        self.draw(request(constraints, forced.map(ChoiceValue::Float)))?.into_float()
    }

    fn draw_string(&mut self, constraints: StringConstraints, forced: Option<String>) -> Result<SymStr, Abort> {
        let constraints = Constraints::String(constraints);
        self.draw(request(constraints, forced.map(ChoiceValue::String)))?.into_string()
    }

    fn draw_bytes(&mut self, constraints: BytesConstraints, forced: Option<Vec<u8>>) -> Result<SymBytes, Abort> {
        let constraints = Constraints::Bytes(constraints);
        self.draw(request(constraints, forced.map(ChoiceValue::Bytes)))?.into_bytes()
    }

    /// Index into `constraints.count` options.
    fn draw_choice(&mut self, constraints: ChoiceConstraints, forced: Option<usize>) -> Result<SymInt, Abort> {
        let constraints = Constraints::Choice(constraints);
        self.draw(request(constraints, forced.map(|i| ChoiceValue::Integer(i as i128))))?
            .into_int()
    }

    /// Root budget for recursive and repeated draws.
    fn draw_budget(&self) -> DrawBudget {
        DrawBudget::default()
    }

    /// Forget what was learned about the previous property. Called before a
    /// runner explores a new one.
    fn reset(&mut self) {}

    fn start_session(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn end_session(&mut self) {}

    /// Run one iteration of `property`.
    fn run_test_case(&mut self, property: &mut Property<'_>) -> Result<Verdict, BridgeError>;

    /// Concrete form of a value, for reporting and storage. Never changes what
    /// gets explored.
    fn export_value(&self, value: &Value) -> Result<ChoiceValue, EngineError> {
        value.snapshot()
    }

    fn set_observer(&mut self, _sink: Box<dyn ObservationSink>) {}

    fn exploration_status(&self) -> ExplorationStatus {
        ExplorationStatus::Open
    }
}

fn request(constraints: Constraints, forced: Option<ChoiceValue>) -> DrawRequest {
    match forced {
        Some(value) => DrawRequest::forced(constraints, value),
        None => DrawRequest::new(constraints),
    }
}

/// Whole milliseconds in `elapsed`, saturating.
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Run `property` once against `provider`, turning unwinds into outcomes.
/// A host [`Interrupt`] comes back as the untouched payload.
pub(crate) fn run_property(
    provider: &mut dyn PrimitiveProvider,
    property: &mut Property<'_>,
) -> Result<RawOutcome, Box<dyn Any + Send>> {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut test_case = TestCase::new(provider);
        property(&mut test_case)
    }));
    match result {
        Ok(passed) => Ok(RawOutcome::Returned(passed)),
        Err(payload) if payload.is::<Interrupt>() => Err(payload),
        Err(payload) => match payload.downcast::<Abort>() {
            Ok(abort) => Ok(RawOutcome::Aborted(*abort)),
            // the message may format symbolic values, render it from the model
            Err(payload) => Ok(RawOutcome::Panicked(host_scope(|| panic_message(payload.as_ref())))),
        },
    }
}

/// Iteration for providers without exploration state: any abort is a discard.
/// The caller fills in the draws of a failure.
fn run_concrete(provider: &mut dyn PrimitiveProvider, property: &mut Property<'_>) -> Result<Verdict, BridgeError> {
    provider.start_session()?;
    let outcome = run_property(provider, property);
    provider.end_session();
    let outcome = outcome.unwrap_or_else(|payload| resume_unwind(payload));
    let verdict = match classify(&outcome, None) {
        Classification::Internal(err) => Verdict::InternalError(err),
        Classification::Discard(reason) => Verdict::Discarded(reason),
        Classification::Pass => Verdict::Passed,
        Classification::SuspectedFailure(origin) => Verdict::Failed(Counterexample {
            draws: Vec::new(),
            origin,
        }),
    };
    verdict.into_result()
}

/// Counters kept by the symbolic provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub iterations: u64,
    pub passed: u64,
    pub failed: u64,
    pub internal_errors: u64,
    pub discarded: HashMap<DiscardReason, u64>,
}

impl ProviderStats {
    fn record(&mut self, verdict: &Verdict) {
        self.iterations += 1;
        match verdict {
            Verdict::Passed | Verdict::Verified => self.passed += 1,
            Verdict::Failed(_) => self.failed += 1,
            Verdict::InternalError(_) => self.internal_errors += 1,
            Verdict::Discarded(reason) => *self.discarded.entry(*reason).or_insert(0) += 1,
        }
    }

    pub fn discarded(&self, reason: DiscardReason) -> u64 {
        self.discarded.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_discarded(&self) -> u64 {
        self.discarded.values().sum()
    }
}

/// Provider backed by a symbolic engine. Every iteration explores one path of
/// the provider's tree. The tree belongs to one property; call
/// [`PrimitiveProvider::reset`] before exploring another.
pub struct SymbolicProvider {
    config: ProviderConfig,
    state: Rc<RefCell<ExecutionState>>,
    session: Option<ExecutionSession>,
    validator: ConcreteValidator,
    observer: Option<Box<dyn ObservationSink>>,
    stats: ProviderStats,
}

impl std::fmt::Debug for SymbolicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolicProvider")
            .field("config", &self.config)
            .field("active", &self.session.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl SymbolicProvider {
    /// Provider over the bundled enumerative engine.
    pub fn new(config: ProviderConfig) -> Result<Self, BridgeError> {
        Self::with_engine(config, Box::new(EnumerativeEngine::new()))
    }

    pub fn with_engine(config: ProviderConfig, engine: Box<dyn SymbolicEngine>) -> Result<Self, BridgeError> {
        config.validate()?;
        let state = ExecutionState::new(engine, config.path_limits(), config.max_path_retries);
        let observer: Option<Box<dyn ObservationSink>> = if config.report_observations {
            Some(Box::new(LogSink))
        } else {
            None
        };
        Ok(Self {
            validator: ConcreteValidator::new(config.concrete_replays, config.draw_budget()),
            state: Rc::new(RefCell::new(state)),
            session: None,
            observer,
            stats: ProviderStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    /// Read-only view of the exploration, safe to use inside a property.
    pub fn probe(&self) -> ExplorationProbe {
        ExplorationProbe::new(&self.state)
    }

    fn finish_session(&mut self) -> Option<PathRecord> {
        self.session.take().and_then(ExecutionSession::finish)
    }

    fn validate_failure(
        &self,
        property: &mut Property<'_>,
        record: &PathRecord,
        origin: FailureOrigin,
    ) -> Result<Verdict, Box<dyn Any + Send>> {
        let draws = match record.realized_draws() {
            Ok(draws) => draws,
            Err(err) => return Ok(Verdict::InternalError(err)),
        };
        log::debug!("path {} failed symbolically ({}), replaying", record.label, origin);
        Ok(match self.validator.replay(property, &draws)? {
            Validation::Reproduced(example) => Verdict::Failed(example),
            Validation::AllPassed => {
                log::info!("failure on path {} did not reproduce concretely", record.label);
                Verdict::Discarded(DiscardReason::ModelArtifact)
            }
            Validation::Nondeterministic(reason) => {
                log::warn!("property is nondeterministic on path {}: {}", record.label, reason);
                Verdict::Discarded(DiscardReason::Nondeterminism)
            }
        })
    }

    fn validate_pass(&self, property: &mut Property<'_>, record: &PathRecord) -> Result<Verdict, Box<dyn Any + Send>> {
        let draws = match record.realized_draws() {
            Ok(draws) => draws,
            Err(err) => return Ok(Verdict::InternalError(err)),
        };
        Ok(match self.validator.replay(property, &draws)? {
            Validation::Reproduced(example) => Verdict::Failed(example),
            Validation::AllPassed => Verdict::Passed,
            Validation::Nondeterministic(reason) => {
                log::warn!("property is nondeterministic on path {}: {}", record.label, reason);
                Verdict::Discarded(DiscardReason::Nondeterminism)
            }
        })
    }

    /// Record how the path ended in the tree.
    fn settle_path(&mut self, record: &PathRecord, verdict: &Verdict) {
        let mut state = self.state.borrow_mut();
        let tree = &mut state.tree;
        match verdict {
            Verdict::Passed | Verdict::Failed(_) | Verdict::Verified => tree.conclude(record.cursor),
            Verdict::Discarded(DiscardReason::UnsatisfiablePath) => tree.mark_unsatisfiable(record.cursor),
            Verdict::Discarded(DiscardReason::Overrun) => tree.truncate(record.cursor),
            Verdict::Discarded(_) | Verdict::InternalError(_) => tree.abandon(record.cursor),
        }
    }

    fn observe(&mut self, record: &PathRecord, verdict: &Verdict, started: Instant) {
        let observer = match self.observer.as_mut() {
            Some(observer) => observer,
            None => return,
        };
        let state = self.state.borrow();
        let observation = IterationObservation {
            iteration: self.stats.iterations,
            backend: state.engine_name().to_string(),
            path: record.label.clone(),
            depth: record.depth,
            draws: record.draws.len(),
            verdict: verdict.kind().to_string(),
            discard_reason: verdict.discard_reason().map(|reason| reason.to_string()),
            elapsed_ms: millis(started.elapsed()),
            tree_nodes: 0,
            exhausted_nodes: 0,
            stalled_nodes: 0,
        }
        .with_tree(&state.tree_stats());
        observer.observe(&observation);
    }

    /// Verdict for a path that ended without a property result, e.g. when the
    /// host drove the draws itself and closed the session.
    fn verdict_without_result(raised: Option<&Abort>) -> Verdict {
        match classify(&RawOutcome::Returned(true), raised) {
            Classification::Internal(err) => Verdict::InternalError(err),
            Classification::Discard(reason) => Verdict::Discarded(reason),
            _ => Verdict::Passed,
        }
    }
}

impl PrimitiveProvider for SymbolicProvider {
    fn name(&self) -> &'static str {
        SYMBOLIC_BACKEND
    }

    fn lifetime(&self) -> ProviderLifetime {
        ProviderLifetime::TestRun
    }

    fn draw(&mut self, request: DrawRequest) -> Result<Value, Abort> {
        let link = match &self.session {
            Some(session) => session.link(),
            None => {
                return Err(Abort::EngineInternal(EngineError::Internal(
                    "symbolic draw outside a session".into(),
                )))
            }
        };
        let kind = request.kind;
        let term = match self.state.try_borrow_mut() {
            Ok(mut state) => crate::translator::translate(&mut state, request),
            Err(_) => Err(Abort::EngineInternal(EngineError::Internal("execution state is busy".into()))),
        }?;
        Ok(Value::from_term(kind, term, &link))
    }

    fn draw_budget(&self) -> DrawBudget {
        self.config.draw_budget()
    }

    fn reset(&mut self) {
        self.session = None;
        self.state.borrow_mut().reset_tree(self.config.max_path_retries);
        self.stats = ProviderStats::default();
    }

    fn start_session(&mut self) -> Result<(), BridgeError> {
        match self.exploration_status() {
            ExplorationStatus::Open => {}
            ExplorationStatus::Verified => return Err(BridgeError::CannotProceed(CannotProceedScope::Verified)),
            ExplorationStatus::Exhausted | ExplorationStatus::Stalled => {
                return Err(BridgeError::CannotProceed(CannotProceedScope::Exhausted))
            }
        }
        if self.session.is_some() {
            return Err(BridgeError::NestedSession);
        }
        self.session = Some(ExecutionSession::start(&self.state)?);
        Ok(())
    }

    fn end_session(&mut self) {
        if let Some(record) = self.finish_session() {
            let verdict = Self::verdict_without_result(record.raised.as_ref());
            self.settle_path(&record, &verdict);
        }
    }

    fn run_test_case(&mut self, property: &mut Property<'_>) -> Result<Verdict, BridgeError> {
        self.start_session()?;
        let started = Instant::now();
        let outcome = run_property(self, property);
        let record = match self.finish_session() {
            Some(record) => record,
            None => {
                return Err(BridgeError::EngineInternal(EngineError::Internal(
                    "session ended without a path record".into(),
                )))
            }
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                // interrupted paths stay eligible for a retry
                self.state.borrow_mut().tree.abandon(record.cursor);
                resume_unwind(payload)
            }
        };

        let classified = classify(&outcome, record.raised.as_ref());
        let validated = match classified {
            Classification::Internal(err) => Ok(Verdict::InternalError(err)),
            Classification::Discard(reason) => Ok(Verdict::Discarded(reason)),
            Classification::SuspectedFailure(origin) => self.validate_failure(property, &record, origin),
            Classification::Pass if self.config.validate_passes => self.validate_pass(property, &record),
            Classification::Pass => Ok(Verdict::Passed),
        };
        let mut verdict = match validated {
            Ok(verdict) => verdict,
            Err(payload) => {
                self.state.borrow_mut().tree.abandon(record.cursor);
                resume_unwind(payload)
            }
        };

        self.settle_path(&record, &verdict);
        if verdict == Verdict::Passed && self.state.borrow().tree.is_verified() {
            verdict = Verdict::Verified;
        }
        self.stats.record(&verdict);
        log::debug!("path {} -> {}", record.label, verdict.kind());
        self.observe(&record, &verdict, started);
        verdict.into_result()
    }

    fn set_observer(&mut self, sink: Box<dyn ObservationSink>) {
        self.observer = Some(sink);
    }

    fn exploration_status(&self) -> ExplorationStatus {
        let state = match self.state.try_borrow() {
            Ok(state) => state,
            Err(_) => return ExplorationStatus::Open,
        };
        if state.tree.is_verified() {
            ExplorationStatus::Verified
        } else if state.tree.is_exhausted() {
            ExplorationStatus::Exhausted
        } else if !state.tree.can_proceed() {
            ExplorationStatus::Stalled
        } else {
            ExplorationStatus::Open
        }
    }
}

/// Hands back recorded values in order. Draws that do not match the recording
/// raise nondeterminism.
#[derive(Debug)]
pub struct ReplayProvider {
    values: VecDeque<ChoiceValue>,
    consumed: Vec<ChoiceValue>,
    budget: DrawBudget,
}

impl ReplayProvider {
    pub fn new(values: Vec<ChoiceValue>, budget: DrawBudget) -> Self {
        Self {
            values: values.into(),
            consumed: Vec::new(),
            budget,
        }
    }

    /// Recorded values not consumed yet.
    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

impl PrimitiveProvider for ReplayProvider {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn lifetime(&self) -> ProviderLifetime {
        ProviderLifetime::TestCase
    }

    fn draw(&mut self, request: DrawRequest) -> Result<Value, Abort> {
        let value = self
            .values
            .pop_front()
            .ok_or_else(|| Abort::Nondeterminism("replay ran out of recorded draws".into()))?;
        let expected = match request.kind {
            ChoiceType::Choice => ChoiceType::Integer,
            other => other,
        };
        if crate::choice::choice_type_of(&value) != expected {
            return Err(Abort::Nondeterminism(format!(
                "replay expected a {} draw, the recording has {}",
                request.kind, value
            )));
        }
        if let Some(forced) = &request.forced {
            if !crate::choice::choice_equal(forced, &value) {
                return Err(Abort::Nondeterminism(format!(
                    "forced draw {} does not match recorded {}",
                    forced, value
                )));
            }
        }
        self.consumed.push(value.clone());
        Ok(Value::from_choice(value))
    }

    fn draw_budget(&self) -> DrawBudget {
        self.budget
    }

    fn run_test_case(&mut self, property: &mut Property<'_>) -> Result<Verdict, BridgeError> {
        let consumed = self.consumed.len();
        run_concrete(self, property).map(|verdict| match verdict {
            Verdict::Failed(mut example) => {
                example.draws = self.consumed[consumed..].to_vec();
                Verdict::Failed(example)
            }
            other => other,
        })
    }
}

/// Native sampling from a seeded `ChaCha8Rng`.
#[derive(Debug)]
pub struct RandomProvider {
    rng: ChaCha8Rng,
    budget: DrawBudget,
    history: Vec<ChoiceValue>,
}

/// Values tried first for unbounded floats.
const FLOAT_SPECIALS: [f64; 8] = [0.0, -0.0, 1.0, -1.0, f64::INFINITY, f64::NEG_INFINITY, f64::MAX, f64::MIN_POSITIVE];

impl RandomProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            budget: DrawBudget::default(),
            history: Vec::new(),
        }
    }

    pub fn with_budget(mut self, budget: DrawBudget) -> Self {
        self.budget = budget;
        self
    }

    fn integer(&mut self, constraints: &IntegerConstraints) -> i128 {
        const SPREAD: i128 = 1 << 16;
        let target = constraints.shrinking_target();
        let min = constraints.min_value.unwrap_or_else(|| target.saturating_sub(SPREAD));
        let max = constraints.max_value.unwrap_or_else(|| target.saturating_add(SPREAD));
        if min >= max {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }

    fn float(&mut self, constraints: &FloatConstraints) -> f64 {
        if constraints.allow_nan && self.rng.gen_bool(0.05) {
            return f64::NAN;
        }
        let raw = if self.rng.gen_bool(0.2) {
            let bounds = [constraints.min_value, constraints.max_value];
            if self.rng.gen_bool(0.5) {
                bounds[self.rng.gen_range(0..bounds.len())]
            } else {
                FLOAT_SPECIALS[self.rng.gen_range(0..FLOAT_SPECIALS.len())]
            }
        } else if constraints.min_value.is_finite() && constraints.max_value.is_finite() {
            let unit: f64 = self.rng.gen();
            constraints.min_value + (constraints.max_value - constraints.min_value) * unit
        } else {
            let magnitude = 2f64.powi(self.rng.gen_range(-20..64)) * self.rng.gen::<f64>();
            if self.rng.gen_bool(0.5) {
                magnitude
            } else {
                -magnitude
            }
        };
        constraints.clamp(raw)
    }

    fn size(&mut self, min_size: usize, max_size: usize) -> usize {
        let cap = max_size.min(min_size.saturating_add(16));
        if min_size >= cap {
            min_size
        } else {
            self.rng.gen_range(min_size..=cap)
        }
    }

    fn string(&mut self, constraints: &StringConstraints) -> Result<String, Abort> {
        let intervals: Vec<(u32, u32)> = constraints
            .intervals
            .intervals
            .iter()
            .copied()
            .filter(|(start, end)| start <= end)
            .collect();
        let fallback = constraints.intervals.leading_chars(1).first().copied();
        let size = if intervals.is_empty() {
            constraints.min_size
        } else {
            self.size(constraints.min_size, constraints.max_size)
        };
        let mut out = String::with_capacity(size);
        for _ in 0..size {
            let (start, end) = intervals[self.rng.gen_range(0..intervals.len())];
            let c = char::from_u32(self.rng.gen_range(start..=end))
                .or(fallback)
                .ok_or_else(|| Abort::Unsatisfiable("alphabet has no valid characters".into()))?;
            out.push(c);
        }
        Ok(out)
    }

    fn bytes(&mut self, constraints: &BytesConstraints) -> Vec<u8> {
        let mut bytes = vec![0u8; self.size(constraints.min_size, constraints.max_size)];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }
}

impl PrimitiveProvider for RandomProvider {
    fn name(&self) -> &'static str {
        RANDOM_BACKEND
    }

    fn lifetime(&self) -> ProviderLifetime {
        ProviderLifetime::TestRun
    }

    fn draw(&mut self, request: DrawRequest) -> Result<Value, Abort> {
        request
            .validate()
            .map_err(|err| Abort::Unsatisfiable(err.to_string()))?;
        if let Some(value) = request.forced {
            self.history.push(value.clone());
            return Ok(Value::from_choice(value));
        }
        let value = match &request.constraints {
            Constraints::Integer(c) => ChoiceValue::Integer(self.integer(c)),
            Constraints::Boolean(c) => ChoiceValue::Boolean(match c.p {
                p if p <= 0.0 => false,
                p if p >= 1.0 => true,
                p => self.rng.gen_bool(p),
            }),
            Constraints::Float(c) => ChoiceValue::Float(self.float(c)),
            Constraints::String(c) => ChoiceValue::String(self.string(c)?),
            Constraints::Bytes(c) => ChoiceValue::Bytes(self.bytes(c)),
            Constraints::Choice(c) => ChoiceValue::Integer(self.rng.gen_range(0..c.count) as i128),
        };
        self.history.push(value.clone());
        Ok(Value::from_choice(value))
    }

    fn draw_budget(&self) -> DrawBudget {
        self.budget
    }

    fn start_session(&mut self) -> Result<(), BridgeError> {
        self.history.clear();
        Ok(())
    }

    fn run_test_case(&mut self, property: &mut Property<'_>) -> Result<Verdict, BridgeError> {
        run_concrete(self, property).map(|verdict| match verdict {
            Verdict::Failed(mut example) => {
                example.draws = self.history.clone();
                Verdict::Failed(example)
            }
            other => other,
        })
    }
}

type ProviderFactory = Box<dyn Fn(&ProviderConfig, u64) -> Result<Box<dyn PrimitiveProvider>, BridgeError> + Send + Sync>;

/// Registry of provider backends by name
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_providers())
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry with the built-in backends.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(RANDOM_BACKEND, |config, seed| {
            Ok(Box::new(RandomProvider::new(seed).with_budget(config.draw_budget())))
        });
        registry.register(SYMBOLIC_BACKEND, symbolic_factory);
        registry
    }

    /// Register a backend, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ProviderConfig, u64) -> Result<Box<dyn PrimitiveProvider>, BridgeError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str, config: &ProviderConfig, seed: u64) -> Result<Box<dyn PrimitiveProvider>, BridgeError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| BridgeError::UnknownBackend(name.to_string()))?;
        factory(config, seed)
    }

    /// Registered names, sorted.
    pub fn available_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

fn symbolic_factory(config: &ProviderConfig, _seed: u64) -> Result<Box<dyn PrimitiveProvider>, BridgeError> {
    Ok(Box::new(SymbolicProvider::new(config.clone())?))
}

static PROVIDER_REGISTRY: Lazy<Mutex<ProviderRegistry>> = Lazy::new(|| Mutex::new(ProviderRegistry::new()));

/// The global provider registry.
pub fn provider_registry() -> MutexGuard<'static, ProviderRegistry> {
    PROVIDER_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Make the symbolic backend available under [`SYMBOLIC_BACKEND`]. Hosts call
/// this once at setup; repeated calls are harmless.
pub fn register_symbolic_backend() {
    let mut registry = provider_registry();
    if !registry.contains(SYMBOLIC_BACKEND) {
        registry.register(SYMBOLIC_BACKEND, symbolic_factory);
        log::info!("registered the {} provider backend", SYMBOLIC_BACKEND);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::{choice_permitted, IntervalSet};

    fn domains() -> Vec<Constraints> {
        vec![
            Constraints::Integer(IntegerConstraints::bounded(-3, 3)),
            Constraints::Integer(IntegerConstraints::unbounded()),
            Constraints::Boolean(BooleanConstraints::with_probability(0.3)),
            Constraints::Float(FloatConstraints::bounded(-0.0, 0.0)),
            Constraints::Float(FloatConstraints::bounded(1.0, 2.0)),
            Constraints::Float(FloatConstraints::default()),
            Constraints::String(StringConstraints::new(IntervalSet::from_string("abc"), Some(1), Some(4))),
            Constraints::Bytes(BytesConstraints::new(Some(2), Some(5))),
            Constraints::Choice(ChoiceConstraints::new(3)),
        ]
    }

    #[test]
    fn test_random_draws_satisfy_their_constraints() {
        let mut provider = RandomProvider::new(7);
        for _ in 0..200 {
            for constraints in domains() {
                let value = provider.draw(DrawRequest::new(constraints.clone())).unwrap();
                let concrete = provider.export_value(&value).unwrap();
                assert!(
                    choice_permitted(&concrete, &constraints),
                    "{} violates {:?}",
                    concrete,
                    constraints
                );
            }
        }
    }

    #[test]
    fn test_random_provider_is_deterministic_per_seed() {
        let mut a = RandomProvider::new(11);
        let mut b = RandomProvider::new(11);
        for _ in 0..20 {
            let x = a.draw_integer(IntegerConstraints::bounded(0, 1000), None).unwrap().value();
            let y = b.draw_integer(IntegerConstraints::bounded(0, 1000), None).unwrap().value();
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_forced_draws_return_the_forced_value() {
        let mut provider = RandomProvider::new(0);
        let b = provider.draw_boolean(BooleanConstraints::new(), Some(false)).unwrap();
        assert!(!b.value());
        let s = provider
            .draw_string(StringConstraints::default(), Some("xyz".to_string()))
            .unwrap();
        assert_eq!(s.value(), "xyz");
    }

    #[test]
    fn test_replay_checks_kinds_and_length() {
        let mut provider = ReplayProvider::new(vec![ChoiceValue::Integer(2)], DrawBudget::default());
        assert!(matches!(
            provider.draw(DrawRequest::new(Constraints::Boolean(BooleanConstraints::new()))),
            Err(Abort::Nondeterminism(_))
        ));

        let mut provider = ReplayProvider::new(vec![ChoiceValue::Integer(2)], DrawBudget::default());
        let index = provider.draw_choice(ChoiceConstraints::new(3), None).unwrap();
        assert_eq!(index.value(), 2);
        assert_eq!(provider.remaining(), 0);
        assert!(provider.draw_choice(ChoiceConstraints::new(3), None).is_err());
    }

    #[test]
    fn test_registry_creates_builtin_backends() {
        let registry = ProviderRegistry::new();
        assert_eq!(registry.available_providers(), vec!["random".to_string(), "symbolic".to_string()]);
        let provider = registry.create("symbolic", &ProviderConfig::default(), 0).unwrap();
        assert_eq!(provider.name(), "symbolic");
        assert_eq!(provider.lifetime(), ProviderLifetime::TestRun);
        let err = registry.create("crosshair", &ProviderConfig::default(), 0).unwrap_err();
        assert_eq!(err, BridgeError::UnknownBackend("crosshair".into()));
    }

    #[test]
    fn test_registry_rejects_invalid_config() {
        let config = ProviderConfig {
            concrete_replays: 0,
            ..ProviderConfig::default()
        };
        let err = ProviderRegistry::new().create("symbolic", &config, 0).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_global_registration_is_idempotent() {
        register_symbolic_backend();
        register_symbolic_backend();
        assert!(provider_registry().contains(SYMBOLIC_BACKEND));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_symbolic_draw_outside_session_is_internal_error() {
        let mut provider = SymbolicProvider::new(ProviderConfig::default()).unwrap();
        let err = provider
            .draw(DrawRequest::new(Constraints::Integer(IntegerConstraints::bounded(0, 1))))
            .unwrap_err();
        assert!(matches!(err, Abort::EngineInternal(_)));
    }

    #[test]
    fn test_manual_session_concludes_the_path() {
        let mut provider = SymbolicProvider::new(ProviderConfig::default()).unwrap();
        for expected in [true, false] {
            provider.start_session().unwrap();
            let b = provider.draw_boolean(BooleanConstraints::new(), None).unwrap();
            assert_eq!(b.value(), expected);
            provider.end_session();
        }
        assert_eq!(provider.exploration_status(), ExplorationStatus::Verified);
        assert_eq!(
            provider.start_session(),
            Err(BridgeError::CannotProceed(CannotProceedScope::Verified))
        );
    }
}
