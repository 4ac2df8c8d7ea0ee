//! Symbolic engine interface
//!
//! The bridge consumes a solver-backed engine through [`SymbolicEngine`]. The
//! engine owns variable declarations and the accumulated path constraints; the
//! bridge owns the path tree and decides which constraints get asserted.
//!
//! The term language in [`expr`] is deliberately tiny. It only has to express
//! what the proxies in `crate::symbolic` can build: comparisons, a little integer
//! and float arithmetic, lengths, and identity checks used for realization.
//!
//! [`EnumerativeEngine`] is the bundled reference backend. Any other solver can
//! be plugged in by implementing the trait.

pub mod enumerative;
pub mod expr;

pub use self::enumerative::{EnumerativeEngine, GlobalConstants};
pub use self::expr::{eval_pred, eval_term, CmpOp, EvalError, Pred, Term};

use crate::choice::{ChoiceType, ChoiceValue, Constraints};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Handle of a declared solver variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub u32);

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Assignment of concrete values to variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    values: BTreeMap<VarId, ChoiceValue>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: VarId) -> Option<&ChoiceValue> {
        self.values.get(&var)
    }

    pub fn insert(&mut self, var: VarId, value: ChoiceValue) {
        self.values.insert(var, value);
    }

    pub fn remove(&mut self, var: VarId) -> Option<ChoiceValue> {
        self.values.remove(&var)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VarId, &ChoiceValue)> {
        self.values.iter()
    }
}

/// Why the solver could not decide a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownReason {
    /// The model-check or path deadline expired.
    Timeout,
    /// The search gave up without covering the whole domain.
    Incomplete,
}

/// The result of a satisfiability check.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveResult {
    Sat(Model),
    Unsat,
    Unknown(UnknownReason),
}

impl SolveResult {
    pub fn is_sat(&self) -> bool {
        matches!(self, SolveResult::Sat(_))
    }
}

/// Failures inside the engine itself. These are never user failures and are
/// propagated to the host unmodified.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("unknown solver variable {0}")]
    UnknownVariable(VarId),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("internal engine failure: {0}")]
    Internal(String),
}

/// Solver-backed engine consumed by the bridge.
pub trait SymbolicEngine: std::fmt::Debug {
    /// Backend name for logs and observations.
    fn name(&self) -> &'static str;

    /// Forget all variables and constraints. Called at every session start.
    fn reset(&mut self);

    /// Per-path deadline plus the budget for a single model check.
    fn set_limits(&mut self, deadline: Instant, model_check_timeout: Duration);

    /// Declare a fresh variable whose domain is exactly `constraints`.
    fn new_symbolic(&mut self, name: &str, kind: ChoiceType, constraints: &Constraints) -> Result<VarId, EngineError>;

    /// Add a constraint to the current path.
    fn assert(&mut self, pred: Pred) -> Result<(), EngineError>;

    /// Check the current path, optionally conjoined with `extra`, without
    /// asserting `extra`.
    fn check_satisfiable(&mut self, extra: Option<&Pred>) -> Result<SolveResult, EngineError>;

    /// Evaluate a term in a model snapshot. Read-only.
    fn realize(&self, term: &Term, model: &Model) -> Result<ChoiceValue, EngineError> {
        eval_term(term, model).map_err(|e| EngineError::Internal(format!("cannot realize {:?}: {}", term, e)))
    }

    /// Number of variables declared since the last reset.
    fn variable_count(&self) -> usize;
}
