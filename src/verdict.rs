//! Verdict classifier
//!
//! After every iteration the raw outcome of the property (returned a boolean or
//! panicked) and the engine conditions raised along the path are folded into a
//! single classification, with this precedence:
//!
//! 1. internal engine fault,
//! 2. unsatisfiable path,
//! 3. nondeterminism, then path timeout, budget overrun and undecided solver
//!    answers,
//! 4. user failure (a suspected failure still has to be reproduced concretely),
//! 5. normal pass.
//!
//! Engine conditions win over whatever the property did afterwards, so a
//! property that catches an abort and then fails is still discarded.

use crate::choice::ChoiceValue;
use crate::data::Abort;
use crate::errors::BridgeError;
use crate::solver::EngineError;
use serde::Serialize;
use std::fmt;

/// How the property signalled failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    ReturnedFalse,
    Panicked,
}

/// Where a failure came from. Two failures with the same origin are the same
/// bug as far as the validator is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FailureOrigin {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureOrigin {
    pub fn returned_false() -> Self {
        Self {
            kind: FailureKind::ReturnedFalse,
            message: "property returned false".to_string(),
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Panicked,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::ReturnedFalse => write!(f, "{}", self.message),
            FailureKind::Panicked => write!(f, "panicked: {}", self.message),
        }
    }
}

/// A reproduced failure: the concrete draws and the failure they cause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counterexample {
    pub draws: Vec<ChoiceValue>,
    pub origin: FailureOrigin,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with draws [", self.origin)?;
        for (i, draw) in self.draws.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", draw)?;
        }
        write!(f, "]")
    }
}

/// Why an iteration produced no usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiscardReason {
    UnsatisfiablePath,
    Nondeterminism,
    PathTimeout,
    /// Failed symbolically but passed every concrete replay.
    ModelArtifact,
    /// Cut off by the depth or collection budget.
    Overrun,
    /// The solver could neither find a model nor prove there is none.
    Undecided,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscardReason::UnsatisfiablePath => "unsatisfiable_path",
            DiscardReason::Nondeterminism => "nondeterminism",
            DiscardReason::PathTimeout => "path_timeout",
            DiscardReason::ModelArtifact => "model_artifact",
            DiscardReason::Overrun => "overrun",
            DiscardReason::Undecided => "undecided",
        };
        f.write_str(name)
    }
}

/// The outcome of one iteration, consumed by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Passed,
    Failed(Counterexample),
    Discarded(DiscardReason),
    InternalError(EngineError),
    /// The whole path space is covered and no failure exists.
    Verified,
}

impl Verdict {
    pub fn kind(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed(_) => "failed",
            Verdict::Discarded(_) => "discarded",
            Verdict::InternalError(_) => "internal_error",
            Verdict::Verified => "verified",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Verdict::Failed(_))
    }

    pub fn discard_reason(&self) -> Option<DiscardReason> {
        match self {
            Verdict::Discarded(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Engine faults leave the bridge as errors, unmodified.
    pub fn into_result(self) -> Result<Verdict, BridgeError> {
        match self {
            Verdict::InternalError(err) => Err(BridgeError::EngineInternal(err)),
            other => Ok(other),
        }
    }
}

/// What the property itself did.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    Returned(bool),
    Aborted(Abort),
    /// Panic message, rendered concretely.
    Panicked(String),
}

/// First-pass classification, before concrete validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Internal(EngineError),
    Discard(DiscardReason),
    SuspectedFailure(FailureOrigin),
    Pass,
}

/// Fold the raw outcome and the conditions raised on the path into a
/// classification.
pub fn classify(outcome: &RawOutcome, raised: Option<&Abort>) -> Classification {
    let abort = match (outcome, raised) {
        (RawOutcome::Aborted(a), Some(r)) => Some(if a.precedence() <= r.precedence() { a } else { r }),
        (RawOutcome::Aborted(a), None) => Some(a),
        (_, raised) => raised,
    };

    if let Some(abort) = abort {
        return match abort {
            Abort::EngineInternal(err) => Classification::Internal(err.clone()),
            Abort::Unsatisfiable(_) => Classification::Discard(DiscardReason::UnsatisfiablePath),
            Abort::Nondeterminism(_) => Classification::Discard(DiscardReason::Nondeterminism),
            Abort::PathTimeout => Classification::Discard(DiscardReason::PathTimeout),
            Abort::Overrun => Classification::Discard(DiscardReason::Overrun),
            Abort::Undecided(_) => Classification::Discard(DiscardReason::Undecided),
        };
    }

    match outcome {
        RawOutcome::Returned(true) => Classification::Pass,
        RawOutcome::Returned(false) => Classification::SuspectedFailure(FailureOrigin::returned_false()),
        RawOutcome::Panicked(message) => Classification::SuspectedFailure(FailureOrigin::panicked(message.clone())),
        RawOutcome::Aborted(_) => Classification::Pass,
    }
}

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
