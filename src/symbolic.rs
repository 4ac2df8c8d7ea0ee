//! Symbolic value proxies
//!
//! Draws served by the symbolic provider come back as proxies instead of plain
//! values. A proxy is either concrete (native providers, forced draws, constant
//! folding) or holds a solver [`Term`] plus a link to the session that drew it.
//!
//! Operations on proxies behave like the operations on the underlying Rust
//! types:
//!
//! - arithmetic builds a new term and never touches the exploration tree,
//! - comparisons return a plain `bool`, which forces a branch decision on the
//!   live path,
//! - `value()` commits the path to one concrete value (a user realization),
//! - `Display`, `Debug` and `Hash` read the current model without committing
//!   anything (host realizations).
//!
//! Once the session that created a proxy has ended, every operation answers from
//! the final model of that path.

use crate::choice::{ChoiceType, ChoiceValue};
use crate::data::Abort;
use crate::realization::{host_scope, in_host_scope};
use crate::session::SessionLink;
use crate::solver::{eval_pred, eval_term, CmpOp, EngineError, Model, Pred, Term};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Mul, Neg, Sub};
use std::rc::Rc;

#[derive(Clone)]
enum Handle {
    Concrete(ChoiceValue),
    Symbolic { term: Term, link: Rc<SessionLink> },
}

impl Handle {
    fn from_term(term: Term, link: &Rc<SessionLink>) -> Self {
        match term {
            Term::Const(value) => Handle::Concrete(value),
            term => Handle::Symbolic {
                term,
                link: Rc::clone(link),
            },
        }
    }

    fn term(&self) -> Term {
        match self {
            Handle::Concrete(value) => Term::Const(value.clone()),
            Handle::Symbolic { term, .. } => term.clone(),
        }
    }

    fn link(&self) -> Option<&Rc<SessionLink>> {
        match self {
            Handle::Concrete(_) => None,
            Handle::Symbolic { link, .. } => Some(link),
        }
    }

    fn is_symbolic(&self) -> bool {
        matches!(self, Handle::Symbolic { .. })
    }

    /// Build `op(self, other)`. Fully concrete operands are folded right away.
    fn combine(&self, other: &Handle, op: fn(Box<Term>, Box<Term>) -> Term) -> Handle {
        let term = op(Box::new(self.term()), Box::new(other.term()));
        match self.link().or_else(|| other.link()) {
            Some(link) => Handle::from_term(term, link),
            None => Handle::Concrete(fold(&term)),
        }
    }

    fn map(&self, op: fn(Box<Term>) -> Term) -> Handle {
        let term = op(Box::new(self.term()));
        match self.link() {
            Some(link) => Handle::from_term(term, link),
            None => Handle::Concrete(fold(&term)),
        }
    }

    /// Decide a condition over this handle and `other`.
    fn test(&self, other: Option<&Handle>, pred: Pred) -> bool {
        let link = self.link().or_else(|| other.and_then(Handle::link));
        truth(pred, link)
    }

    /// Commit to a concrete value.
    fn realize(&self) -> ChoiceValue {
        let (term, link) = match self {
            Handle::Concrete(value) => return value.clone(),
            Handle::Symbolic { term, link } => (term, link),
        };
        if !in_host_scope() {
            if let Some(state) = link.live() {
                let realized = match state.try_borrow_mut() {
                    Ok(mut state) => state.realize(term),
                    Err(_) => Err(busy()),
                };
                return realized.unwrap_or_else(|abort| abort.raise());
            }
        }
        link.snapshot(term)
            .unwrap_or_else(|err| Abort::EngineInternal(err).raise())
    }

    /// Read the current model without committing anything.
    fn snapshot(&self) -> Result<ChoiceValue, EngineError> {
        match self {
            Handle::Concrete(value) => Ok(value.clone()),
            Handle::Symbolic { term, link } => host_scope(|| link.snapshot(term)),
        }
    }
}

fn busy() -> Abort {
    Abort::EngineInternal(EngineError::Internal("execution state is busy".into()))
}

fn fold(term: &Term) -> ChoiceValue {
    match eval_term(term, &Model::new()) {
        Ok(value) => value,
        Err(err) => panic!("arithmetic on concrete values failed: {}", err),
    }
}

/// Turn a condition into a `bool`. On a live path this is a branch decision;
/// in host scope or after the session ended it is read from the model.
fn truth(pred: Pred, link: Option<&Rc<SessionLink>>) -> bool {
    let link = match link {
        Some(link) => link,
        None => {
            return eval_pred(&pred, &Model::new())
                .unwrap_or_else(|err| Abort::EngineInternal(EngineError::Internal(err.to_string())).raise())
        }
    };
    if !in_host_scope() {
        if let Some(state) = link.live() {
            let decided = match state.try_borrow_mut() {
                Ok(mut state) => state.branch(pred),
                Err(_) => Err(busy()),
            };
            return decided.unwrap_or_else(|abort| abort.raise());
        }
    }
    link.snapshot_pred(&pred)
        .unwrap_or_else(|err| Abort::EngineInternal(err).raise())
}

fn write_snapshot(f: &mut fmt::Formatter<'_>, handle: &Handle) -> fmt::Result {
    match handle.snapshot() {
        Ok(value) => write!(f, "{}", value),
        Err(_) => f.write_str("<unrealized>"),
    }
}

fn mismatch(expected: ChoiceType, found: &ChoiceValue) -> ! {
    Abort::EngineInternal(EngineError::Internal(format!(
        "expected a {} value, got {}",
        expected, found
    )))
    .raise()
}

macro_rules! proxy {
    ($name:ident, $kind:expr) => {
        #[derive(Clone)]
        pub struct $name {
            handle: Handle,
        }

        impl $name {
            fn wrap(handle: Handle) -> Self {
                Self { handle }
            }

            /// Whether the value is still an unrealized solver term.
            pub fn is_symbolic(&self) -> bool {
                self.handle.is_symbolic()
            }

            /// Value in the current model, without committing the path.
            pub fn snapshot(&self) -> Result<ChoiceValue, EngineError> {
                self.handle.snapshot()
            }

            pub fn kind(&self) -> ChoiceType {
                $kind
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_snapshot(f, &self.handle)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                write_snapshot(f, &self.handle)?;
                write!(f, ")")
            }
        }
    };
}

proxy!(SymInt, ChoiceType::Integer);
proxy!(SymFloat, ChoiceType::Float);
proxy!(SymBool, ChoiceType::Boolean);
proxy!(SymStr, ChoiceType::String);
proxy!(SymBytes, ChoiceType::Bytes);

impl SymInt {
    pub fn concrete(value: i128) -> Self {
        Self::wrap(Handle::Concrete(ChoiceValue::Integer(value)))
    }

    /// Commit the path to a concrete integer.
    pub fn value(&self) -> i128 {
        match self.handle.realize() {
            ChoiceValue::Integer(i) => i,
            other => mismatch(ChoiceType::Integer, &other),
        }
    }

    /// Convert to a float proxy sharing the same term.
    pub fn to_float(&self) -> SymFloat {
        let zero = Handle::Concrete(ChoiceValue::Float(0.0));
        SymFloat::wrap(self.handle.combine(&zero, Term::Add))
    }
}

impl SymFloat {
    pub fn concrete(value: f64) -> Self {
        Self::wrap(Handle::Concrete(ChoiceValue::Float(value)))
    }

    /// Commit the path to a concrete float.
    pub fn value(&self) -> f64 {
        match self.handle.realize() {
            ChoiceValue::Float(f) => f,
            other => mismatch(ChoiceType::Float, &other),
        }
    }

    pub fn is_nan(&self) -> bool {
        self.handle.test(None, Pred::IsNan(self.handle.term()))
    }

    pub fn is_finite(&self) -> bool {
        !self.is_nan() && *self > f64::NEG_INFINITY && *self < f64::INFINITY
    }
}

impl SymBool {
    pub fn concrete(value: bool) -> Self {
        Self::wrap(Handle::Concrete(ChoiceValue::Boolean(value)))
    }

    /// Which way the path goes on this boolean.
    pub fn value(&self) -> bool {
        self.handle.test(None, Pred::Truth(self.handle.term()))
    }
}

impl SymStr {
    pub fn concrete(value: impl Into<String>) -> Self {
        Self::wrap(Handle::Concrete(ChoiceValue::String(value.into())))
    }

    /// Commit the path to a concrete string.
    pub fn value(&self) -> String {
        match self.handle.realize() {
            ChoiceValue::String(s) => s,
            other => mismatch(ChoiceType::String, &other),
        }
    }

    /// Number of code points.
    pub fn len(&self) -> SymInt {
        SymInt::wrap(self.handle.map(Term::Len))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0i128
    }
}

impl SymBytes {
    pub fn concrete(value: impl Into<Vec<u8>>) -> Self {
        Self::wrap(Handle::Concrete(ChoiceValue::Bytes(value.into())))
    }

    /// Commit the path to a concrete byte string.
    pub fn value(&self) -> Vec<u8> {
        match self.handle.realize() {
            ChoiceValue::Bytes(b) => b,
            other => mismatch(ChoiceType::Bytes, &other),
        }
    }

    pub fn len(&self) -> SymInt {
        SymInt::wrap(self.handle.map(Term::Len))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0i128
    }
}

// Comparisons. `partial_cmp` may take two decisions, the operator methods one.
macro_rules! comparisons {
    ($proxy:ident, $prim:ty, $lift:expr) => {
        impl $proxy {
            fn compare(&self, op: CmpOp, other: &Handle) -> bool {
                self.handle
                    .test(Some(other), Pred::cmp(op, self.handle.term(), other.term()))
            }
        }

        impl PartialEq<$prim> for $proxy {
            fn eq(&self, other: &$prim) -> bool {
                self.compare(CmpOp::Eq, &Handle::Concrete($lift(other)))
            }
        }

        impl PartialEq for $proxy {
            fn eq(&self, other: &Self) -> bool {
                self.compare(CmpOp::Eq, &other.handle)
            }
        }

        impl PartialOrd<$prim> for $proxy {
            fn partial_cmp(&self, other: &$prim) -> Option<Ordering> {
                let other = Handle::Concrete($lift(other));
                ordering(self.compare(CmpOp::Eq, &other), || self.compare(CmpOp::Lt, &other), || {
                    self.compare(CmpOp::Gt, &other)
                })
            }
            fn lt(&self, other: &$prim) -> bool {
                self.compare(CmpOp::Lt, &Handle::Concrete($lift(other)))
            }
            fn le(&self, other: &$prim) -> bool {
                self.compare(CmpOp::Le, &Handle::Concrete($lift(other)))
            }
            fn gt(&self, other: &$prim) -> bool {
                self.compare(CmpOp::Gt, &Handle::Concrete($lift(other)))
            }
            fn ge(&self, other: &$prim) -> bool {
                self.compare(CmpOp::Ge, &Handle::Concrete($lift(other)))
            }
        }

        impl PartialOrd for $proxy {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                ordering(
                    self.compare(CmpOp::Eq, &other.handle),
                    || self.compare(CmpOp::Lt, &other.handle),
                    || self.compare(CmpOp::Gt, &other.handle),
                )
            }
            fn lt(&self, other: &Self) -> bool {
                self.compare(CmpOp::Lt, &other.handle)
            }
            fn le(&self, other: &Self) -> bool {
                self.compare(CmpOp::Le, &other.handle)
            }
            fn gt(&self, other: &Self) -> bool {
                self.compare(CmpOp::Gt, &other.handle)
            }
            fn ge(&self, other: &Self) -> bool {
                self.compare(CmpOp::Ge, &other.handle)
            }
        }
    };
}

fn ordering(equal: bool, less: impl FnOnce() -> bool, greater: impl FnOnce() -> bool) -> Option<Ordering> {
    if equal {
        Some(Ordering::Equal)
    } else if less() {
        Some(Ordering::Less)
    } else if greater() {
        Some(Ordering::Greater)
    } else {
        None
    }
}

comparisons!(SymInt, i128, |v: &i128| ChoiceValue::Integer(*v));
comparisons!(SymFloat, f64, |v: &f64| ChoiceValue::Float(*v));
comparisons!(SymStr, String, |v: &String| ChoiceValue::String(v.clone()));
comparisons!(SymBytes, Vec<u8>, |v: &Vec<u8>| ChoiceValue::Bytes(v.clone()));

impl PartialEq<bool> for SymBool {
    fn eq(&self, other: &bool) -> bool {
        self.value() == *other
    }
}

impl PartialEq<&str> for SymStr {
    fn eq(&self, other: &&str) -> bool {
        *self == other.to_string()
    }
}

impl PartialEq<&[u8]> for SymBytes {
    fn eq(&self, other: &&[u8]) -> bool {
        *self == other.to_vec()
    }
}

impl Eq for SymInt {}
impl Eq for SymStr {}

// Hashing realizes the value: values equal on the path must hash equal, and a
// snapshot of two unrealized terms may differ even when they are constrained
// to be equal.
impl Hash for SymInt {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state);
    }
}

impl Hash for SymStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state);
    }
}

macro_rules! arithmetic {
    ($proxy:ident, $prim:ty, $lift:expr) => {
        impl Add for $proxy {
            type Output = $proxy;
            fn add(self, rhs: $proxy) -> $proxy {
                $proxy::wrap(self.handle.combine(&rhs.handle, Term::Add))
            }
        }

        impl Sub for $proxy {
            type Output = $proxy;
            fn sub(self, rhs: $proxy) -> $proxy {
                $proxy::wrap(self.handle.combine(&rhs.handle, Term::Sub))
            }
        }

        impl Mul for $proxy {
            type Output = $proxy;
            fn mul(self, rhs: $proxy) -> $proxy {
                $proxy::wrap(self.handle.combine(&rhs.handle, Term::Mul))
            }
        }

        impl Add<$prim> for $proxy {
            type Output = $proxy;
            fn add(self, rhs: $prim) -> $proxy {
                $proxy::wrap(self.handle.combine(&Handle::Concrete($lift(rhs)), Term::Add))
            }
        }

        impl Sub<$prim> for $proxy {
            type Output = $proxy;
            fn sub(self, rhs: $prim) -> $proxy {
                $proxy::wrap(self.handle.combine(&Handle::Concrete($lift(rhs)), Term::Sub))
            }
        }

        impl Mul<$prim> for $proxy {
            type Output = $proxy;
            fn mul(self, rhs: $prim) -> $proxy {
                $proxy::wrap(self.handle.combine(&Handle::Concrete($lift(rhs)), Term::Mul))
            }
        }

        impl Neg for $proxy {
            type Output = $proxy;
            fn neg(self) -> $proxy {
                $proxy::wrap(self.handle.map(Term::Neg))
            }
        }
    };
}

arithmetic!(SymInt, i128, ChoiceValue::Integer);
arithmetic!(SymFloat, f64, ChoiceValue::Float);

/// A drawn value of any kind.
#[derive(Clone, Debug)]
pub enum Value {
    Integer(SymInt),
    Boolean(SymBool),
    Float(SymFloat),
    String(SymStr),
    Bytes(SymBytes),
}

impl Value {
    /// Proxy for `term`, drawn in the session behind `link`. Choice indices are
    /// integers.
    pub(crate) fn from_term(kind: ChoiceType, term: Term, link: &Rc<SessionLink>) -> Self {
        let handle = Handle::from_term(term, link);
        match kind {
            ChoiceType::Integer | ChoiceType::Choice => Value::Integer(SymInt::wrap(handle)),
            ChoiceType::Boolean => Value::Boolean(SymBool::wrap(handle)),
            ChoiceType::Float => Value::Float(SymFloat::wrap(handle)),
            ChoiceType::String => Value::String(SymStr::wrap(handle)),
            ChoiceType::Bytes => Value::Bytes(SymBytes::wrap(handle)),
        }
    }

    /// Concrete value, as returned by native providers.
    pub fn from_choice(value: ChoiceValue) -> Self {
        let kind = crate::choice::choice_type_of(&value);
        let handle = Handle::Concrete(value);
        match kind {
            ChoiceType::Integer | ChoiceType::Choice => Value::Integer(SymInt::wrap(handle)),
            ChoiceType::Boolean => Value::Boolean(SymBool::wrap(handle)),
            ChoiceType::Float => Value::Float(SymFloat::wrap(handle)),
            ChoiceType::String => Value::String(SymStr::wrap(handle)),
            ChoiceType::Bytes => Value::Bytes(SymBytes::wrap(handle)),
        }
    }

    pub fn kind(&self) -> ChoiceType {
        match self {
            Value::Integer(_) => ChoiceType::Integer,
            Value::Boolean(_) => ChoiceType::Boolean,
            Value::Float(_) => ChoiceType::Float,
            Value::String(_) => ChoiceType::String,
            Value::Bytes(_) => ChoiceType::Bytes,
        }
    }

    fn handle(&self) -> &Handle {
        match self {
            Value::Integer(v) => &v.handle,
            Value::Boolean(v) => &v.handle,
            Value::Float(v) => &v.handle,
            Value::String(v) => &v.handle,
            Value::Bytes(v) => &v.handle,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        self.handle().is_symbolic()
    }

    /// Host realization of the value. Never adds an exploration edge.
    pub fn snapshot(&self) -> Result<ChoiceValue, EngineError> {
        self.handle().snapshot()
    }

    pub fn into_int(self) -> Result<SymInt, Abort> {
        match self {
            Value::Integer(v) => Ok(v),
            other => Err(other.wrong_kind(ChoiceType::Integer)),
        }
    }

    pub fn into_bool(self) -> Result<SymBool, Abort> {
        match self {
            Value::Boolean(v) => Ok(v),
            other => Err(other.wrong_kind(ChoiceType::Boolean)),
        }
    }

    pub fn into_float(self) -> Result<SymFloat, Abort> {
        match self {
            Value::Float(v) => Ok(v),
            other => Err(other.wrong_kind(ChoiceType::Float)),
        }
    }

    pub fn into_string(self) -> Result<SymStr, Abort> {
        match self {
            Value::String(v) => Ok(v),
            other => Err(other.wrong_kind(ChoiceType::String)),
        }
    }

    pub fn into_bytes(self) -> Result<SymBytes, Abort> {
        match self {
            Value::Bytes(v) => Ok(v),
            other => Err(other.wrong_kind(ChoiceType::Bytes)),
        }
    }

    fn wrong_kind(&self, expected: ChoiceType) -> Abort {
        Abort::EngineInternal(EngineError::Internal(format!(
            "provider answered a {} draw with a {} value",
            expected,
            self.kind()
        )))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_snapshot(f, self.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concrete_arithmetic_folds() {
        let x = SymInt::concrete(40) + 2i128;
        assert!(!x.is_symbolic());
        assert_eq!(x.value(), 42);
        assert!(x == 42i128);
        assert!(x > 41i128);
        assert_eq!((-x).value(), -42);
    }

    #[test]
    fn test_concrete_float_comparisons_follow_ieee() {
        let nan = SymFloat::concrete(f64::NAN);
        assert!(nan.is_nan());
        assert!(!(nan == f64::NAN));
        assert_eq!(nan.partial_cmp(&1.0f64), None);
        assert!(SymFloat::concrete(-0.0) == 0.0f64);
        assert!(!SymFloat::concrete(f64::INFINITY).is_finite());
    }

    #[test]
    fn test_string_and_bytes_lengths() {
        let s = SymStr::concrete("héllo");
        assert_eq!(s.len().value(), 5);
        assert!(!s.is_empty());
        assert!(s == "héllo");
        assert!(SymBytes::concrete(Vec::new()).is_empty());
    }

    #[test]
    fn test_value_kinds_and_conversions() {
        let v = Value::from_choice(ChoiceValue::Boolean(true));
        assert_eq!(v.kind(), ChoiceType::Boolean);
        assert!(!v.is_symbolic());
        assert!(v.clone().into_int().is_err());
        assert!(v.into_bool().unwrap().value());
    }

    #[test]
    fn test_display_is_concrete() {
        assert_eq!(SymInt::concrete(7).to_string(), "7");
        assert_eq!(format!("{:?}", SymStr::concrete("ab")), "SymStr(\"ab\")");
    }

    #[test]
    fn test_equal_values_hash_equal() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        assert!(seen.insert(SymInt::concrete(3)));
        assert!(!seen.insert(SymInt::concrete(1) + 2i128));
        let mut words = HashSet::new();
        words.insert(SymStr::concrete("ab"));
        assert!(words.contains(&SymStr::concrete("ab")));
    }

    #[test]
    #[should_panic(expected = "arithmetic on concrete values failed")]
    fn test_concrete_overflow_panics() {
        let _ = SymInt::concrete(i128::MAX) + 1i128;
    }
}
