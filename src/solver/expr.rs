//! Terms and predicates over solver variables, with evaluation under a model.

use super::{Model, VarId};
use crate::choice::{choice_equal, ChoiceValue};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use thiserror::Error;

/// Comparison operators. Float comparisons follow IEEE 754: every operator but
/// `Ne` is false when either side is NaN, and `0.0 == -0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CmpOp::Ne, None) => true,
            (_, None) => false,
            (CmpOp::Eq, Some(o)) => o == Ordering::Equal,
            (CmpOp::Ne, Some(o)) => o != Ordering::Equal,
            (CmpOp::Lt, Some(o)) => o == Ordering::Less,
            (CmpOp::Le, Some(o)) => o != Ordering::Greater,
            (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
            (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var(VarId),
    Const(ChoiceValue),
    /// Code point length of a string or byte length of a byte sequence.
    Len(Box<Term>),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
    Neg(Box<Term>),
}

/// A boolean-valued expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Pred {
    Const(bool),
    /// The term evaluates to `Boolean(true)`.
    Truth(Term),
    Cmp(CmpOp, Term, Term),
    /// Identity in the sense of [`choice_equal`]: NaN is NaN, `-0.0` is not `0.0`.
    Identical(Term, ChoiceValue),
    IsNan(Term),
    Not(Box<Pred>),
    And(Vec<Pred>),
    Or(Vec<Pred>),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("variable {0} has no value in the model")]
    Unassigned(VarId),
    #[error("type mismatch in {0}")]
    TypeMismatch(&'static str),
    #[error("integer overflow")]
    Overflow,
}

impl Term {
    pub fn var(var: VarId) -> Self {
        Term::Var(var)
    }

    pub fn int(value: i128) -> Self {
        Term::Const(ChoiceValue::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Term::Const(ChoiceValue::Float(value))
    }

    /// Collect every variable referenced by the term.
    pub fn collect_vars(&self, out: &mut BTreeSet<VarId>) {
        match self {
            Term::Var(v) => {
                out.insert(*v);
            }
            Term::Const(_) => {}
            Term::Len(t) | Term::Neg(t) => t.collect_vars(out),
            Term::Add(a, b) | Term::Sub(a, b) | Term::Mul(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    /// Collect every constant, used by solvers to seed candidate values.
    pub fn collect_constants(&self, out: &mut Vec<ChoiceValue>) {
        match self {
            Term::Var(_) => {}
            Term::Const(c) => out.push(c.clone()),
            Term::Len(t) | Term::Neg(t) => t.collect_constants(out),
            Term::Add(a, b) | Term::Sub(a, b) | Term::Mul(a, b) => {
                a.collect_constants(out);
                b.collect_constants(out);
            }
        }
    }

    /// Whether the term mentions no variable at all.
    pub fn is_ground(&self) -> bool {
        let mut vars = BTreeSet::new();
        self.collect_vars(&mut vars);
        vars.is_empty()
    }

    /// The constant value if the term is a literal.
    pub fn as_const(&self) -> Option<&ChoiceValue> {
        match self {
            Term::Const(c) => Some(c),
            _ => None,
        }
    }
}

impl Pred {
    pub fn cmp(op: CmpOp, left: Term, right: Term) -> Self {
        Pred::Cmp(op, left, right)
    }

    pub fn negate(self) -> Self {
        match self {
            Pred::Const(b) => Pred::Const(!b),
            Pred::Not(inner) => *inner,
            Pred::Cmp(op, a, b) if !matches!(op, CmpOp::Eq | CmpOp::Ne) => {
                // ordering negation is unsound under NaN, keep it explicit
                Pred::Not(Box::new(Pred::Cmp(op, a, b)))
            }
            Pred::Cmp(op, a, b) => Pred::Cmp(op.negate(), a, b),
            other => Pred::Not(Box::new(other)),
        }
    }

    pub fn collect_vars(&self, out: &mut BTreeSet<VarId>) {
        match self {
            Pred::Const(_) => {}
            Pred::Truth(t) | Pred::IsNan(t) | Pred::Identical(t, _) => t.collect_vars(out),
            Pred::Cmp(_, a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Pred::Not(p) => p.collect_vars(out),
            Pred::And(ps) | Pred::Or(ps) => ps.iter().for_each(|p| p.collect_vars(out)),
        }
    }

    pub fn vars(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    pub fn mentions(&self, var: VarId) -> bool {
        self.vars().contains(&var)
    }

    pub fn collect_constants(&self, out: &mut Vec<ChoiceValue>) {
        match self {
            Pred::Const(_) => {}
            Pred::Truth(t) | Pred::IsNan(t) => t.collect_constants(out),
            Pred::Identical(t, c) => {
                t.collect_constants(out);
                out.push(c.clone());
            }
            Pred::Cmp(_, a, b) => {
                a.collect_constants(out);
                b.collect_constants(out);
            }
            Pred::Not(p) => p.collect_constants(out),
            Pred::And(ps) | Pred::Or(ps) => ps.iter().for_each(|p| p.collect_constants(out)),
        }
    }
}

/// Evaluate a term. Integer arithmetic is checked; mixing integers and floats
/// promotes to float.
pub fn eval_term(term: &Term, model: &Model) -> Result<ChoiceValue, EvalError> {
    match term {
        Term::Var(v) => model.get(*v).cloned().ok_or(EvalError::Unassigned(*v)),
        Term::Const(c) => Ok(c.clone()),
        Term::Len(inner) => match eval_term(inner, model)? {
            ChoiceValue::String(s) => Ok(ChoiceValue::Integer(s.chars().count() as i128)),
            ChoiceValue::Bytes(b) => Ok(ChoiceValue::Integer(b.len() as i128)),
            _ => Err(EvalError::TypeMismatch("len")),
        },
        Term::Neg(inner) => match eval_term(inner, model)? {
            ChoiceValue::Integer(i) => i.checked_neg().map(ChoiceValue::Integer).ok_or(EvalError::Overflow),
            ChoiceValue::Float(f) => Ok(ChoiceValue::Float(-f)),
            _ => Err(EvalError::TypeMismatch("neg")),
        },
        Term::Add(a, b) => arith(eval_term(a, model)?, eval_term(b, model)?, i128::checked_add, |x, y| x + y, "add"),
        Term::Sub(a, b) => arith(eval_term(a, model)?, eval_term(b, model)?, i128::checked_sub, |x, y| x - y, "sub"),
        Term::Mul(a, b) => arith(eval_term(a, model)?, eval_term(b, model)?, i128::checked_mul, |x, y| x * y, "mul"),
    }
}

fn arith(
    a: ChoiceValue,
    b: ChoiceValue,
    int_op: fn(i128, i128) -> Option<i128>,
    float_op: fn(f64, f64) -> f64,
    name: &'static str,
) -> Result<ChoiceValue, EvalError> {
    match (a, b) {
        (ChoiceValue::Integer(x), ChoiceValue::Integer(y)) => int_op(x, y).map(ChoiceValue::Integer).ok_or(EvalError::Overflow),
        (ChoiceValue::Float(x), ChoiceValue::Float(y)) => Ok(ChoiceValue::Float(float_op(x, y))),
        (ChoiceValue::Integer(x), ChoiceValue::Float(y)) => Ok(ChoiceValue::Float(float_op(x as f64, y))),
        (ChoiceValue::Float(x), ChoiceValue::Integer(y)) => Ok(ChoiceValue::Float(float_op(x, y as f64))),
        _ => Err(EvalError::TypeMismatch(name)),
    }
}

fn compare(a: &ChoiceValue, b: &ChoiceValue) -> Result<Option<Ordering>, EvalError> {
    Ok(match (a, b) {
        (ChoiceValue::Integer(x), ChoiceValue::Integer(y)) => Some(x.cmp(y)),
        (ChoiceValue::Float(x), ChoiceValue::Float(y)) => x.partial_cmp(y),
        (ChoiceValue::Integer(x), ChoiceValue::Float(y)) => (*x as f64).partial_cmp(y),
        (ChoiceValue::Float(x), ChoiceValue::Integer(y)) => x.partial_cmp(&(*y as f64)),
        (ChoiceValue::Boolean(x), ChoiceValue::Boolean(y)) => Some(x.cmp(y)),
        (ChoiceValue::String(x), ChoiceValue::String(y)) => Some(x.cmp(y)),
        (ChoiceValue::Bytes(x), ChoiceValue::Bytes(y)) => Some(x.cmp(y)),
        _ => return Err(EvalError::TypeMismatch("compare")),
    })
}

/// Evaluate a predicate.
pub fn eval_pred(pred: &Pred, model: &Model) -> Result<bool, EvalError> {
    match pred {
        Pred::Const(b) => Ok(*b),
        Pred::Truth(t) => match eval_term(t, model)? {
            ChoiceValue::Boolean(b) => Ok(b),
            _ => Err(EvalError::TypeMismatch("truth")),
        },
        Pred::Cmp(op, a, b) => {
            let ordering = compare(&eval_term(a, model)?, &eval_term(b, model)?)?;
            Ok(op.holds(ordering))
        }
        Pred::Identical(t, value) => Ok(choice_equal(&eval_term(t, model)?, value)),
        Pred::IsNan(t) => match eval_term(t, model)? {
            ChoiceValue::Float(f) => Ok(f.is_nan()),
            ChoiceValue::Integer(_) => Ok(false),
            _ => Err(EvalError::TypeMismatch("is_nan")),
        },
        Pred::Not(p) => eval_pred(p, model).map(|b| !b),
        Pred::And(ps) => {
            for p in ps {
                if !eval_pred(p, model)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Pred::Or(ps) => {
            for p in ps {
                if eval_pred(p, model)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with(values: &[(u32, ChoiceValue)]) -> Model {
        let mut model = Model::new();
        for (id, value) in values {
            model.insert(VarId(*id), value.clone());
        }
        model
    }

    #[test]
    fn test_integer_arithmetic_and_comparison() {
        let model = model_with(&[(0, ChoiceValue::Integer(9))]);
        let sum = Term::Add(Box::new(Term::var(VarId(0))), Box::new(Term::int(1)));
        assert!(eval_pred(&Pred::cmp(CmpOp::Eq, sum, Term::int(10)), &model).unwrap());
    }

    #[test]
    fn test_float_nan_comparisons_follow_ieee() {
        let model = model_with(&[(0, ChoiceValue::Float(f64::NAN))]);
        let x = Term::var(VarId(0));
        assert!(!eval_pred(&Pred::cmp(CmpOp::Eq, x.clone(), x.clone()), &model).unwrap());
        assert!(eval_pred(&Pred::cmp(CmpOp::Ne, x.clone(), Term::float(1.0)), &model).unwrap());
        assert!(!eval_pred(&Pred::cmp(CmpOp::Lt, x.clone(), Term::float(1.0)), &model).unwrap());
        assert!(!eval_pred(&Pred::cmp(CmpOp::Ge, x.clone(), Term::float(1.0)), &model).unwrap());
        assert!(eval_pred(&Pred::IsNan(x.clone()), &model).unwrap());
        assert!(eval_pred(&Pred::Identical(x, ChoiceValue::Float(f64::NAN)), &model).unwrap());
    }

    #[test]
    fn test_negating_ordering_stays_sound_under_nan() {
        let model = model_with(&[(0, ChoiceValue::Float(f64::NAN))]);
        let lt = Pred::cmp(CmpOp::Lt, Term::var(VarId(0)), Term::float(2.0));
        assert!(!eval_pred(&lt, &model).unwrap());
        assert!(eval_pred(&lt.negate(), &model).unwrap());
    }

    #[test]
    fn test_unassigned_variable_is_reported() {
        let err = eval_term(&Term::var(VarId(3)), &Model::new()).unwrap_err();
        assert_eq!(err, EvalError::Unassigned(VarId(3)));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let model = model_with(&[(0, ChoiceValue::Integer(i128::MAX))]);
        let sum = Term::Add(Box::new(Term::var(VarId(0))), Box::new(Term::int(1)));
        assert_eq!(eval_term(&sum, &model), Err(EvalError::Overflow));
    }

    #[test]
    fn test_string_length() {
        let model = model_with(&[(0, ChoiceValue::String("héllo".into()))]);
        let len = Term::Len(Box::new(Term::var(VarId(0))));
        assert_eq!(eval_term(&len, &model).unwrap(), ChoiceValue::Integer(5));
    }

    #[test]
    fn test_collect_vars_and_constants() {
        let pred = Pred::And(vec![
            Pred::cmp(CmpOp::Lt, Term::var(VarId(1)), Term::int(4)),
            Pred::Identical(Term::var(VarId(2)), ChoiceValue::Boolean(true)),
        ]);
        assert_eq!(pred.vars().into_iter().collect::<Vec<_>>(), vec![VarId(1), VarId(2)]);
        let mut constants = Vec::new();
        pred.collect_constants(&mut constants);
        assert_eq!(constants, vec![ChoiceValue::Integer(4), ChoiceValue::Boolean(true)]);
    }
}
