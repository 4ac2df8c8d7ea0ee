//! Error types surfaced to the host.
//!
//! Only [`BridgeError::UserFailure`] describes a bug in the code under test, and
//! it is only produced after the failure was reproduced concretely. Engine-side
//! conditions each have their own variant so that a host never mistakes a solver
//! problem for a failing property. [`BridgeError::EngineInternal`] carries the
//! engine's own error unmodified.

use crate::solver::EngineError;
use crate::verdict::Counterexample;
use thiserror::Error;

/// Why a provider cannot produce further test cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannotProceedScope {
    /// Every path was covered; no failure exists.
    Verified,
    /// Exploration ended without a proof (timeouts, retries or truncation).
    Exhausted,
}

impl std::fmt::Display for CannotProceedScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CannotProceedScope::Verified => write!(f, "verified"),
            CannotProceedScope::Exhausted => write!(f, "exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("property failed: {0}")]
    UserFailure(Counterexample),
    #[error("no satisfiable path was found")]
    Unsatisfiable,
    #[error("every explored path exceeded its deadline")]
    PathTimeout,
    #[error("property behaved nondeterministically")]
    Nondeterminism,
    #[error("symbolic engine failure: {0}")]
    EngineInternal(#[from] EngineError),
    #[error("a symbolic session is already active on this thread")]
    NestedSession,
    #[error("invalid configuration: {0}")]
    Configuration(#[from] crate::config::ConfigError),
    #[error("provider cannot proceed: {0}")]
    CannotProceed(CannotProceedScope),
    #[error("unknown provider backend {0:?}")]
    UnknownBackend(String),
}
