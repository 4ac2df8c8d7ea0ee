//! # Draw requests and the test case handed to properties
//!
//! A property receives a [`TestCase`] and pulls every input out of it through
//! typed draws. Each draw becomes a [`DrawRequest`] that is forwarded to the active
//! [`PrimitiveProvider`]; the provider answers with a [`Value`] proxy.
//!
//! ## Control flow
//!
//! Engine conditions discovered while the property is running (unsatisfiable
//! paths, deadlines, nondeterminism, budget overruns, engine faults) cannot be
//! returned through user code. They are raised as an [`Abort`] payload with
//! [`std::panic::resume_unwind`], which skips the panic hook, and are classified by
//! payload type once control is back at the session boundary. Host interrupts use
//! the separate [`Interrupt`] payload, which is never classified and is re-raised
//! verbatim.
//!
//! ## Draw signatures
//!
//! The exploration tree keys draw edges on a [`DrawSignature`]: the draw kind plus
//! a SHA-256 digest of the constraints. The drawn value never takes part, so the
//! same draw site produces the same edge regardless of the model chosen for it.

use crate::choice::{
    choice_permitted, BooleanConstraints, BytesConstraints, ChoiceConstraints, ChoiceType, ChoiceValue, Constraints,
    FloatConstraints, IntegerConstraints, StringConstraints,
};
use crate::providers::PrimitiveProvider;
use crate::solver::EngineError;
use crate::symbolic::{SymBool, SymBytes, SymFloat, SymInt, SymStr, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors in the parameters of a draw request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    #[error("invalid range: min_value > max_value")]
    InvalidRange,
    #[error("probability must be between 0.0 and 1.0")]
    InvalidProbability,
    #[error("cannot draw a non-empty string from an empty alphabet")]
    EmptyAlphabet,
    #[error("invalid float bounds: {0}")]
    InvalidFloatBounds(String),
    #[error("choice over zero options")]
    EmptyChoice,
    #[error("forced value {0} is not permitted by the draw constraints")]
    ForcedNotPermitted(String),
    #[error("forced value has kind {found}, draw expects {expected}")]
    TypeMismatch { expected: ChoiceType, found: ChoiceType },
}

/// A single typed draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRequest {
    pub kind: ChoiceType,
    pub constraints: Constraints,
    pub forced: Option<ChoiceValue>,
}

impl DrawRequest {
    pub fn new(constraints: Constraints) -> Self {
        Self {
            kind: constraints.choice_type(),
            constraints,
            forced: None,
        }
    }

    pub fn forced(constraints: Constraints, value: ChoiceValue) -> Self {
        Self {
            forced: Some(value),
            ..Self::new(constraints)
        }
    }

    pub fn signature(&self) -> DrawSignature {
        DrawSignature::of(&self.constraints)
    }

    /// Reject requests whose domain is empty or whose forced value falls outside
    /// the domain.
    pub fn validate(&self) -> Result<(), DrawError> {
        match &self.constraints {
            Constraints::Integer(c) => {
                if !c.is_satisfiable() {
                    return Err(DrawError::InvalidRange);
                }
            }
            Constraints::Boolean(c) => {
                if !(0.0..=1.0).contains(&c.p) {
                    return Err(DrawError::InvalidProbability);
                }
            }
            Constraints::Float(c) => {
                if c.min_value.is_nan() || c.max_value.is_nan() {
                    return Err(DrawError::InvalidFloatBounds("bounds must not be NaN".into()));
                }
                if !crate::choice::sign_aware_lte(c.min_value, c.max_value) {
                    return Err(DrawError::InvalidFloatBounds(format!("{:?} > {:?}", c.min_value, c.max_value)));
                }
                if !(c.smallest_nonzero_magnitude > 0.0) {
                    return Err(DrawError::InvalidFloatBounds("smallest_nonzero_magnitude must be positive".into()));
                }
            }
            Constraints::String(c) => {
                if c.min_size > c.max_size {
                    return Err(DrawError::InvalidRange);
                }
                if !c.is_satisfiable() {
                    return Err(DrawError::EmptyAlphabet);
                }
            }
            Constraints::Bytes(c) => {
                if c.min_size > c.max_size {
                    return Err(DrawError::InvalidRange);
                }
            }
            Constraints::Choice(c) => {
                if c.count == 0 {
                    return Err(DrawError::EmptyChoice);
                }
            }
        }

        if let Some(value) = &self.forced {
            let found = crate::choice::choice_type_of(value);
            let expected = match self.kind {
                ChoiceType::Choice => ChoiceType::Integer,
                other => other,
            };
            if found != expected {
                return Err(DrawError::TypeMismatch { expected: self.kind, found });
            }
            if !choice_permitted(value, &self.constraints) {
                return Err(DrawError::ForcedNotPermitted(value.to_string()));
            }
        }
        Ok(())
    }
}

/// Identity of a draw site: kind plus constraint digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawSignature {
    pub kind: ChoiceType,
    pub digest: [u8; 32],
}

impl DrawSignature {
    pub fn of(constraints: &Constraints) -> Self {
        let mut hasher = Sha256::new();
        digest_constraints(constraints, &mut hasher);
        Self {
            kind: constraints.choice_type(),
            digest: hasher.finalize().into(),
        }
    }
}

impl std::fmt::Display for DrawSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.kind)?;
        for byte in &self.digest[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// Floats are hashed by bit pattern so that infinities, NaN and signed zeros all
// stay distinct.
fn digest_constraints(constraints: &Constraints, hasher: &mut Sha256) {
    fn opt_i128(hasher: &mut Sha256, value: Option<i128>) {
        match value {
            Some(v) => {
                hasher.update([1]);
                hasher.update(v.to_le_bytes());
            }
            None => hasher.update([0]),
        }
    }

    match constraints {
        Constraints::Integer(c) => {
            hasher.update(b"integer");
            opt_i128(hasher, c.min_value);
            opt_i128(hasher, c.max_value);
            opt_i128(hasher, c.shrink_towards);
        }
        Constraints::Boolean(c) => {
            hasher.update(b"boolean");
            hasher.update(c.p.to_bits().to_le_bytes());
        }
        Constraints::Float(c) => {
            hasher.update(b"float");
            hasher.update(c.min_value.to_bits().to_le_bytes());
            hasher.update(c.max_value.to_bits().to_le_bytes());
            hasher.update([c.allow_nan as u8]);
            hasher.update(c.smallest_nonzero_magnitude.to_bits().to_le_bytes());
        }
        Constraints::String(c) => {
            hasher.update(b"string");
            for (start, end) in &c.intervals.intervals {
                hasher.update(start.to_le_bytes());
                hasher.update(end.to_le_bytes());
            }
            hasher.update((c.min_size as u64).to_le_bytes());
            hasher.update((c.max_size as u64).to_le_bytes());
        }
        Constraints::Bytes(c) => {
            hasher.update(b"bytes");
            hasher.update((c.min_size as u64).to_le_bytes());
            hasher.update((c.max_size as u64).to_le_bytes());
        }
        Constraints::Choice(c) => {
            hasher.update(b"choice");
            hasher.update((c.count as u64).to_le_bytes());
        }
    }
}

/// Engine conditions that end the current path. Raised through unwinding so
/// that user code in between cannot swallow them silently.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Abort {
    #[error("path is unsatisfiable: {0}")]
    Unsatisfiable(String),
    #[error("path deadline exceeded")]
    PathTimeout,
    #[error("nondeterministic execution: {0}")]
    Nondeterminism(String),
    #[error("draw budget exhausted")]
    Overrun,
    #[error("solver could not decide the path: {0}")]
    Undecided(String),
    #[error(transparent)]
    EngineInternal(#[from] EngineError),
}

impl Abort {
    /// Lower is more important. When several conditions were raised on one
    /// path the most important one determines the verdict.
    pub fn precedence(&self) -> u8 {
        match self {
            Abort::EngineInternal(_) => 0,
            Abort::Unsatisfiable(_) => 1,
            Abort::Nondeterminism(_) => 2,
            Abort::PathTimeout => 3,
            Abort::Overrun => 4,
            Abort::Undecided(_) => 5,
        }
    }

    /// Unwind out of user code carrying this condition.
    pub fn raise(self) -> ! {
        std::panic::resume_unwind(Box::new(self))
    }
}

/// Host interrupt (the equivalent of a keyboard interrupt). Passes through the
/// bridge untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    pub reason: String,
}

/// Interrupt the running property.
pub fn interrupt(reason: impl Into<String>) -> ! {
    std::panic::resume_unwind(Box::new(Interrupt { reason: reason.into() }))
}

/// Bound on recursive and repeated draws, passed by value into nested
/// generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBudget {
    /// Remaining nesting levels.
    pub depth: usize,
    /// Maximum number of elements in one collection.
    pub max_elements: usize,
}

impl Default for DrawBudget {
    fn default() -> Self {
        Self {
            depth: 8,
            max_elements: 64,
        }
    }
}

impl DrawBudget {
    pub fn new(depth: usize, max_elements: usize) -> Self {
        Self { depth, max_elements }
    }

    /// Budget for one level down, or `None` when nesting is exhausted.
    pub fn descend(self) -> Option<Self> {
        self.depth.checked_sub(1).map(|depth| Self { depth, ..self })
    }
}

/// What a property sees. Every draw is forwarded to the provider running the
/// test case.
pub struct TestCase<'a> {
    provider: &'a mut dyn PrimitiveProvider,
    draws: usize,
}

impl std::fmt::Debug for TestCase<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("provider", &self.provider.name())
            .field("draws", &self.draws)
            .finish()
    }
}

impl<'a> TestCase<'a> {
    pub fn new(provider: &'a mut dyn PrimitiveProvider) -> Self {
        Self { provider, draws: 0 }
    }

    /// Number of draws issued so far.
    pub fn draw_count(&self) -> usize {
        self.draws
    }

    /// Name of the provider serving the draws.
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Root budget for collections.
    pub fn budget(&self) -> DrawBudget {
        self.provider.draw_budget()
    }

    /// Issue a raw draw request.
    pub fn draw(&mut self, request: DrawRequest) -> Value {
        self.draws += 1;
        settle(self.provider.draw(request))
    }

    pub fn draw_integer(&mut self, min_value: i128, max_value: i128) -> SymInt {
        self.draw_integer_with(IntegerConstraints::bounded(min_value, max_value))
    }

    pub fn draw_integer_with(&mut self, constraints: IntegerConstraints) -> SymInt {
        self.draws += 1;
        settle(self.provider.draw_integer(constraints, None))
    }

    pub fn draw_float(&mut self, constraints: FloatConstraints) -> SymFloat {
        self.draws += 1;
        settle(self.provider.draw_float(constraints, None))
    }

    pub fn draw_boolean(&mut self, p: f64) -> SymBool {
        self.draws += 1;
        settle(self.provider.draw_boolean(BooleanConstraints::with_probability(p), None))
    }

    /// A boolean draw pinned to `value`. Adds no exploration edge.
    pub fn draw_forced_boolean(&mut self, p: f64, value: bool) -> SymBool {
        self.draws += 1;
        settle(self.provider.draw_boolean(BooleanConstraints::with_probability(p), Some(value)))
    }

    pub fn draw_string(&mut self, constraints: StringConstraints) -> SymStr {
        self.draws += 1;
        settle(self.provider.draw_string(constraints, None))
    }

    pub fn draw_bytes(&mut self, constraints: BytesConstraints) -> SymBytes {
        self.draws += 1;
        settle(self.provider.draw_bytes(constraints, None))
    }

    /// Index into `count` options.
    pub fn draw_choice(&mut self, count: usize) -> SymInt {
        self.draws += 1;
        settle(self.provider.draw_choice(ChoiceConstraints::new(count), None))
    }

    /// Draw a collection by asking "one more?" before every element. The
    /// element generator receives the budget for the next nesting level.
    /// Exhausting the nesting depth terminates the path as an overrun.
    pub fn draw_vec<T, F>(&mut self, budget: DrawBudget, mut element: F) -> Vec<T>
    where
        F: FnMut(&mut TestCase<'a>, DrawBudget) -> T,
    {
        let inner = match budget.descend() {
            Some(inner) => inner,
            None => Abort::Overrun.raise(),
        };
        let mut out = Vec::new();
        loop {
            let more = if out.len() >= budget.max_elements {
                self.draw_forced_boolean(0.5, false)
            } else {
                self.draw_boolean(0.5)
            };
            if !more.value() {
                break;
            }
            out.push(element(self, inner));
        }
        out
    }
}

fn settle<T>(drawn: Result<T, Abort>) -> T {
    drawn.unwrap_or_else(|abort| abort.raise())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::IntervalSet;

    #[test]
    fn test_signature_ignores_forced_value_but_not_constraints() {
        let a = DrawRequest::new(Constraints::Integer(IntegerConstraints::bounded(0, 9)));
        let b = DrawRequest::forced(Constraints::Integer(IntegerConstraints::bounded(0, 9)), ChoiceValue::Integer(3));
        let c = DrawRequest::new(Constraints::Integer(IntegerConstraints::bounded(0, 10)));
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn test_signature_distinguishes_signed_zero_bounds() {
        let positive = DrawSignature::of(&Constraints::Float(FloatConstraints::bounded(0.0, 1.0)));
        let negative = DrawSignature::of(&Constraints::Float(FloatConstraints::bounded(-0.0, 1.0)));
        assert_ne!(positive, negative);
    }

    #[test]
    fn test_signature_distinguishes_kinds() {
        let choice = DrawSignature::of(&Constraints::Choice(ChoiceConstraints::new(10)));
        let int = DrawSignature::of(&Constraints::Integer(IntegerConstraints::bounded(0, 9)));
        assert_ne!(choice, int);
        assert!(choice.to_string().starts_with("choice:"));
    }

    #[test]
    fn test_validate_rejects_empty_domains() {
        let inverted = DrawRequest::new(Constraints::Integer(IntegerConstraints::bounded(5, 1)));
        assert_eq!(inverted.validate(), Err(DrawError::InvalidRange));

        let empty_alphabet = DrawRequest::new(Constraints::String(StringConstraints::new(
            IntervalSet::from_ranges(&[]),
            Some(1),
            Some(3),
        )));
        assert_eq!(empty_alphabet.validate(), Err(DrawError::EmptyAlphabet));

        let zero_options = DrawRequest::new(Constraints::Choice(ChoiceConstraints::new(0)));
        assert_eq!(zero_options.validate(), Err(DrawError::EmptyChoice));
    }

    #[test]
    fn test_validate_checks_forced_values() {
        let ok = DrawRequest::forced(
            Constraints::Boolean(BooleanConstraints::with_probability(0.5)),
            ChoiceValue::Boolean(true),
        );
        assert!(ok.validate().is_ok());

        let outside = DrawRequest::forced(
            Constraints::Integer(IntegerConstraints::bounded(0, 3)),
            ChoiceValue::Integer(4),
        );
        assert!(matches!(outside.validate(), Err(DrawError::ForcedNotPermitted(_))));

        let wrong_kind = DrawRequest::forced(
            Constraints::Integer(IntegerConstraints::bounded(0, 3)),
            ChoiceValue::Float(1.0),
        );
        assert!(matches!(wrong_kind.validate(), Err(DrawError::TypeMismatch { .. })));
    }

    #[test]
    fn test_abort_precedence_puts_engine_faults_first() {
        let internal = Abort::EngineInternal(EngineError::Internal("boom".into()));
        assert!(internal.precedence() < Abort::Unsatisfiable(String::new()).precedence());
        assert!(Abort::Unsatisfiable(String::new()).precedence() < Abort::Nondeterminism(String::new()).precedence());
        assert!(Abort::Nondeterminism(String::new()).precedence() < Abort::PathTimeout.precedence());
    }

    #[test]
    fn test_budget_descends_to_none() {
        let budget = DrawBudget::new(1, 4);
        let inner = budget.descend().unwrap();
        assert_eq!(inner.depth, 0);
        assert_eq!(inner.max_elements, 4);
        assert!(inner.descend().is_none());
    }
}
