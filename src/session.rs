//! Execution sessions
//!
//! An [`ExecutionSession`] is bound to one in-flight invocation of a property. It
//! owns the path cursor, the draw log and the current model, all stored in the
//! provider's [`ExecutionState`]. Proxies handed to the property keep a
//! [`SessionLink`] back to that state; once the session ends the link is closed
//! and the proxies degrade to the final model snapshot.
//!
//! Only one session may be active per thread. Starting a second one while the
//! first is running (for example a property that itself runs a symbolic test)
//! fails with [`BridgeError::NestedSession`] before any state is touched.
//!
//! Every decision along a path goes through [`ExecutionState::decide`]: it checks
//! the recorded signature, asks the solver which outcomes are feasible on first
//! visit, lets the [`PathTree`] pick an outcome, and asserts the outcome's
//! constraint.

use crate::data::{Abort, DrawRequest};
use crate::datatree::{Decision, DecisionSignature, Feasibility, NodeId, PathTree, TreeStats};
use crate::errors::BridgeError;
use crate::solver::{eval_pred, eval_term, EngineError, Model, Pred, SolveResult, SymbolicEngine, Term, UnknownReason, VarId};
use crate::choice::ChoiceValue;
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

thread_local! {
    static SESSION_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Whether a symbolic session is running on this thread.
pub fn session_active() -> bool {
    SESSION_ACTIVE.with(|active| active.get())
}

/// Single-owner token for the thread's session slot. Released on drop,
/// including during unwinding.
#[derive(Debug)]
pub(crate) struct SessionGuard {
    _not_send: PhantomData<*const ()>,
}

impl SessionGuard {
    pub(crate) fn acquire() -> Result<Self, BridgeError> {
        SESSION_ACTIVE.with(|active| {
            if active.replace(true) {
                Err(BridgeError::NestedSession)
            } else {
                Ok(Self { _not_send: PhantomData })
            }
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        SESSION_ACTIVE.with(|active| active.set(false));
    }
}

/// Limits applied to every path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PathLimits {
    pub per_path_timeout: Duration,
    pub model_check_timeout: Duration,
    pub max_path_depth: usize,
}

/// One draw as issued during a path.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub request: DrawRequest,
    pub term: Term,
}

/// What is left of a path once its session has ended.
#[derive(Debug, Clone)]
pub struct PathRecord {
    /// Node where the path stopped.
    pub cursor: NodeId,
    pub depth: usize,
    pub model: Model,
    pub draws: Vec<DrawRecord>,
    /// The most important engine condition raised along the path.
    pub raised: Option<Abort>,
    pub label: String,
}

impl PathRecord {
    /// Concrete value of every draw under the final model.
    pub fn realized_draws(&self) -> Result<Vec<ChoiceValue>, EngineError> {
        self.draws
            .iter()
            .map(|draw| {
                eval_term(&draw.term, &self.model)
                    .map_err(|e| EngineError::Internal(format!("cannot realize draw {:?}: {}", draw.term, e)))
            })
            .collect()
    }
}

#[derive(Debug)]
struct ActivePath {
    cursor: NodeId,
    depth: usize,
    model: Model,
    deadline: Instant,
    draws: Vec<DrawRecord>,
    fresh_names: usize,
    raised: Option<Abort>,
}

/// Result of a decision: the outcome index and the constraint it asserted.
#[derive(Debug, Clone)]
pub(crate) struct Decided {
    pub outcome: usize,
    pub pred: Pred,
}

/// Exploration state owned by one symbolic provider and shared with the
/// proxies of its current session.
#[derive(Debug)]
pub(crate) struct ExecutionState {
    engine: Box<dyn SymbolicEngine>,
    pub(crate) tree: PathTree,
    limits: PathLimits,
    path: Option<ActivePath>,
    snapshots: Cell<u64>,
}

impl ExecutionState {
    pub(crate) fn new(engine: Box<dyn SymbolicEngine>, limits: PathLimits, max_retries: u32) -> Self {
        Self {
            engine,
            tree: PathTree::new(max_retries),
            limits,
            path: None,
            snapshots: Cell::new(0),
        }
    }

    pub(crate) fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.path.is_some()
    }

    /// Number of realizations served from model snapshots.
    pub(crate) fn snapshot_count(&self) -> u64 {
        self.snapshots.get()
    }

    pub(crate) fn draw_count(&self) -> usize {
        self.path.as_ref().map_or(0, |path| path.draws.len())
    }

    pub(crate) fn reset_tree(&mut self, max_retries: u32) {
        self.tree = PathTree::new(max_retries);
    }

    fn begin_path(&mut self, started: Instant) {
        let deadline = started + self.limits.per_path_timeout;
        self.engine.reset();
        self.engine.set_limits(deadline, self.limits.model_check_timeout);
        self.tree.enter(PathTree::ROOT);
        self.path = Some(ActivePath {
            cursor: PathTree::ROOT,
            depth: 0,
            model: Model::new(),
            deadline,
            draws: Vec::new(),
            fresh_names: 0,
            raised: None,
        });
    }

    fn end_path(&mut self) -> Option<PathRecord> {
        let mut path = self.path.take()?;
        if path.raised.is_none() && self.tree.node(path.cursor).decision.is_some() {
            // an earlier run made a decision here, this one stopped instead
            path.raised = Some(Abort::Nondeterminism("path ended before a previously recorded decision".into()));
        }
        Some(PathRecord {
            label: self.tree.path_label(path.cursor),
            cursor: path.cursor,
            depth: path.depth,
            model: path.model,
            draws: path.draws,
            raised: path.raised,
        })
    }

    /// Record an engine condition, keeping the most important one.
    pub(crate) fn note(&mut self, abort: Abort) -> Abort {
        if let Some(path) = self.path.as_mut() {
            let replace = match &path.raised {
                Some(previous) => abort.precedence() < previous.precedence(),
                None => true,
            };
            if replace {
                log::debug!("path raised: {}", abort);
                path.raised = Some(abort.clone());
            }
        }
        abort
    }

    fn active(&mut self) -> Result<&mut ActivePath, Abort> {
        self.path
            .as_mut()
            .ok_or_else(|| Abort::EngineInternal(EngineError::Internal("no active execution path".into())))
    }

    /// Fresh solver name for a draw, e.g. `int_01`.
    pub(crate) fn fresh_name(&mut self, prefix: &str) -> Result<String, Abort> {
        let path = self.active()?;
        path.fresh_names += 1;
        Ok(format!("{}_{:02}", prefix, path.fresh_names))
    }

    pub(crate) fn declare(&mut self, name: &str, request: &DrawRequest) -> Result<VarId, Abort> {
        Ok(self.engine.new_symbolic(name, request.kind, &request.constraints)?)
    }

    pub(crate) fn record_draw(&mut self, request: DrawRequest, term: Term) -> Result<(), Abort> {
        self.active()?.draws.push(DrawRecord { request, term });
        Ok(())
    }

    /// Make sure the current model assigns `var`.
    pub(crate) fn extend_model(&mut self, var: VarId) -> Result<(), Abort> {
        let path = self.path.as_mut().ok_or_else(|| Abort::EngineInternal(EngineError::Internal("no active execution path".into())))?;
        if path.model.get(var).is_some() {
            return Ok(());
        }
        match self.engine.check_satisfiable(None)? {
            SolveResult::Sat(model) => {
                path.model = model;
                Ok(())
            }
            SolveResult::Unsat => Err(Abort::Unsatisfiable(format!("no value satisfies the domain of {}", var))),
            SolveResult::Unknown(UnknownReason::Timeout) => Err(Abort::PathTimeout),
            SolveResult::Unknown(UnknownReason::Incomplete) => {
                Err(Abort::Undecided(format!("no candidate found for {}", var)))
            }
        }
    }

    /// Take one decision at the cursor and advance the path.
    ///
    /// `build` produces the outcome constraints on first visit; later visits reuse
    /// the recorded ones, so values captured from the model stay stable.
    pub(crate) fn decide<F>(&mut self, signature: DecisionSignature, build: F) -> Result<Decided, Abort>
    where
        F: FnOnce(&Model) -> Result<Vec<Pred>, Abort>,
    {
        match self.decide_inner(signature, build) {
            Ok(decided) => Ok(decided),
            Err(abort) => Err(self.note(abort)),
        }
    }

    fn decide_inner<F>(&mut self, signature: DecisionSignature, build: F) -> Result<Decided, Abort>
    where
        F: FnOnce(&Model) -> Result<Vec<Pred>, Abort>,
    {
        let path = self.path.as_mut().ok_or_else(|| Abort::EngineInternal(EngineError::Internal("no active execution path".into())))?;
        if let Some(raised) = &path.raised {
            return Err(raised.clone());
        }
        if Instant::now() >= path.deadline {
            return Err(Abort::PathTimeout);
        }
        if path.depth >= self.limits.max_path_depth {
            return Err(Abort::Overrun);
        }

        let node = path.cursor;
        match &self.tree.node(node).decision {
            Some(recorded) if recorded.signature != signature => {
                return Err(Abort::Nondeterminism(format!(
                    "expected {} at depth {}, got {}",
                    recorded.signature, path.depth, signature
                )));
            }
            Some(_) => {}
            None => {
                let outcomes = build(&path.model)?;
                let mut feasibility = Vec::with_capacity(outcomes.len());
                for pred in &outcomes {
                    feasibility.push(probe(self.engine.as_mut(), &path.model, pred)?);
                }
                self.tree.record_decision(node, Decision { signature, outcomes, feasibility });
            }
        }

        loop {
            let outcome = match self.tree.select(node) {
                Some(outcome) => outcome,
                None => return Err(no_selectable_outcome(&mut self.tree, node)),
            };
            let pred = match &self.tree.node(node).decision {
                Some(decision) => decision.outcomes[outcome].clone(),
                None => return Err(Abort::EngineInternal(EngineError::Internal("decision vanished".into()))),
            };

            if !holds(&pred, &path.model) {
                match self.engine.check_satisfiable(Some(&pred))? {
                    SolveResult::Sat(model) => path.model = model,
                    SolveResult::Unsat => {
                        self.tree.set_feasibility(node, outcome, Feasibility::Infeasible);
                        continue;
                    }
                    SolveResult::Unknown(UnknownReason::Incomplete) => {
                        self.tree.set_feasibility(node, outcome, Feasibility::Undecided);
                        continue;
                    }
                    SolveResult::Unknown(UnknownReason::Timeout) => return Err(Abort::PathTimeout),
                }
            }

            self.engine.assert(pred.clone())?;
            let child = self.tree.child(node, outcome);
            self.tree.enter(child);
            path.cursor = child;
            path.depth += 1;
            return Ok(Decided { outcome, pred });
        }
    }

    /// Branch on a symbolic condition. Returns which side the path takes.
    pub(crate) fn branch(&mut self, pred: Pred) -> Result<bool, Abort> {
        if pred.vars().is_empty() {
            return eval_pred(&pred, &Model::new())
                .map_err(|e| Abort::EngineInternal(EngineError::Internal(e.to_string())));
        }
        let signature = DecisionSignature::Branch(digest(&pred));
        let decided = self.decide(signature, move |_| {
            let negated = pred.clone().negate();
            Ok(vec![pred, negated])
        })?;
        Ok(decided.outcome == 0)
    }

    /// Read-only evaluation in the current model.
    pub(crate) fn snapshot(&self, term: &Term) -> Result<ChoiceValue, EngineError> {
        self.snapshots.set(self.snapshots.get() + 1);
        match &self.path {
            Some(path) => self.engine.realize(term, &path.model),
            None => Err(EngineError::Internal("no active execution path".into())),
        }
    }

    pub(crate) fn snapshot_pred(&self, pred: &Pred) -> Result<bool, EngineError> {
        self.snapshots.set(self.snapshots.get() + 1);
        match &self.path {
            Some(path) => eval_pred(pred, &path.model).map_err(|e| EngineError::Internal(e.to_string())),
            None => Err(EngineError::Internal("no active execution path".into())),
        }
    }

    pub(crate) fn current_model(&self) -> Option<&Model> {
        self.path.as_ref().map(|path| &path.model)
    }

    pub(crate) fn tree_stats(&self) -> TreeStats {
        self.tree.stats()
    }
}

fn holds(pred: &Pred, model: &Model) -> bool {
    eval_pred(pred, model).unwrap_or(false)
}

fn probe(engine: &mut dyn SymbolicEngine, model: &Model, pred: &Pred) -> Result<Feasibility, Abort> {
    if holds(pred, model) {
        return Ok(Feasibility::Feasible);
    }
    Ok(match engine.check_satisfiable(Some(pred))? {
        SolveResult::Sat(_) => Feasibility::Feasible,
        SolveResult::Unsat => Feasibility::Infeasible,
        SolveResult::Unknown(UnknownReason::Incomplete) => Feasibility::Undecided,
        SolveResult::Unknown(UnknownReason::Timeout) => return Err(Abort::PathTimeout),
    })
}

fn no_selectable_outcome(tree: &mut PathTree, node: NodeId) -> Abort {
    let all_infeasible = tree
        .node(node)
        .decision
        .as_ref()
        .map_or(false, |decision| decision.feasibility.iter().all(|f| *f == Feasibility::Infeasible));
    if all_infeasible {
        Abort::Unsatisfiable("every outcome of the decision is infeasible".into())
    } else {
        tree.settle(node);
        Abort::Undecided("no outcome of the decision can be explored".into())
    }
}

/// SHA-256 over the debug rendering of a decision's subject.
pub(crate) fn digest<T: std::fmt::Debug>(subject: &T) -> [u8; 32] {
    Sha256::digest(format!("{:?}", subject).as_bytes()).into()
}

/// Connection from a proxy back to the session that created it.
#[derive(Debug)]
pub(crate) struct SessionLink {
    state: Weak<RefCell<ExecutionState>>,
    closed: RefCell<Option<Model>>,
}

impl SessionLink {
    fn new(state: Weak<RefCell<ExecutionState>>) -> Self {
        Self {
            state,
            closed: RefCell::new(None),
        }
    }

    /// The execution state, while the session is still running.
    pub(crate) fn live(&self) -> Option<Rc<RefCell<ExecutionState>>> {
        if self.closed.borrow().is_some() {
            return None;
        }
        self.state.upgrade()
    }

    fn close(&self, model: Model) {
        *self.closed.borrow_mut() = Some(model);
    }

    /// Value of `term` under the current model, or the final one once closed.
    pub(crate) fn snapshot(&self, term: &Term) -> Result<ChoiceValue, EngineError> {
        if let Some(model) = self.closed.borrow().as_ref() {
            return eval_term(term, model).map_err(|e| EngineError::Internal(e.to_string()));
        }
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| EngineError::Internal("execution state dropped".into()))?;
        let state = state
            .try_borrow()
            .map_err(|_| EngineError::Internal("execution state is busy".into()))?;
        state.snapshot(term)
    }

    pub(crate) fn snapshot_pred(&self, pred: &Pred) -> Result<bool, EngineError> {
        if let Some(model) = self.closed.borrow().as_ref() {
            return eval_pred(pred, model).map_err(|e| EngineError::Internal(e.to_string()));
        }
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| EngineError::Internal("execution state dropped".into()))?;
        let state = state
            .try_borrow()
            .map_err(|_| EngineError::Internal("execution state is busy".into()))?;
        state.snapshot_pred(pred)
    }
}

/// A running invocation of a property under the symbolic provider.
#[derive(Debug)]
pub struct ExecutionSession {
    state: Rc<RefCell<ExecutionState>>,
    link: Rc<SessionLink>,
    started: Instant,
    _guard: SessionGuard,
}

impl ExecutionSession {
    /// Claim the thread's session slot and start a new path at the root.
    pub(crate) fn start(state: &Rc<RefCell<ExecutionState>>) -> Result<Self, BridgeError> {
        let guard = SessionGuard::acquire()?;
        let started = Instant::now();
        state
            .try_borrow_mut()
            .map_err(|_| BridgeError::NestedSession)?
            .begin_path(started);
        Ok(Self {
            state: Rc::clone(state),
            link: Rc::new(SessionLink::new(Rc::downgrade(state))),
            started,
            _guard: guard,
        })
    }

    pub(crate) fn link(&self) -> Rc<SessionLink> {
        Rc::clone(&self.link)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// End the path and detach every proxy from the live state.
    pub(crate) fn finish(mut self) -> Option<PathRecord> {
        self.close()
    }

    fn close(&mut self) -> Option<PathRecord> {
        if self.link.closed.borrow().is_some() {
            return None;
        }
        let record = self.state.try_borrow_mut().ok()?.end_path();
        let model = record.as_ref().map(|r| r.model.clone()).unwrap_or_default();
        self.link.close(model);
        record
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read-only view of a provider's exploration, usable from inside a property.
#[derive(Debug, Clone)]
pub struct ExplorationProbe {
    state: Weak<RefCell<ExecutionState>>,
}

impl ExplorationProbe {
    pub(crate) fn new(state: &Rc<RefCell<ExecutionState>>) -> Self {
        Self {
            state: Rc::downgrade(state),
        }
    }

    fn with<R: Default>(&self, f: impl FnOnce(&ExecutionState) -> R) -> R {
        match self.state.upgrade() {
            Some(state) => match state.try_borrow() {
                Ok(state) => f(&state),
                Err(_) => R::default(),
            },
            None => R::default(),
        }
    }

    /// Number of nodes in the exploration tree.
    pub fn tree_size(&self) -> usize {
        self.with(|state| state.tree.len())
    }

    pub fn tree_stats(&self) -> TreeStats {
        self.with(|state| state.tree_stats())
    }

    /// Realizations answered from snapshots so far.
    pub fn snapshot_count(&self) -> u64 {
        self.with(|state| state.snapshot_count())
    }

    /// Draws issued on the current path.
    pub fn draw_count(&self) -> usize {
        self.with(|state| state.draw_count())
    }

    /// Size of the current model, zero outside a session.
    pub fn model_size(&self) -> usize {
        self.with(|state| state.current_model().map_or(0, |m| m.len()))
    }

    pub fn is_active(&self) -> bool {
        self.with(|state| state.is_active())
    }
}
