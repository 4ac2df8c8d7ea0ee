//! Value handling and utility functions for choices

use super::{ChoiceType, ChoiceValue, Constraints};

/// Check if two choice values are identical.
///
/// This is identity rather than IEEE equality: NaN equals NaN and `-0.0` differs
/// from `+0.0`. Realized draws are compared this way when checking that a replay
/// reproduced the same inputs.
pub fn choice_equal(a: &ChoiceValue, b: &ChoiceValue) -> bool {
    match (a, b) {
        (ChoiceValue::Integer(a), ChoiceValue::Integer(b)) => a == b,
        (ChoiceValue::Boolean(a), ChoiceValue::Boolean(b)) => a == b,
        (ChoiceValue::Float(a), ChoiceValue::Float(b)) => {
            if a.is_nan() || b.is_nan() {
                a.is_nan() && b.is_nan()
            } else {
                a.to_bits() == b.to_bits()
            }
        }
        (ChoiceValue::String(a), ChoiceValue::String(b)) => a == b,
        (ChoiceValue::Bytes(a), ChoiceValue::Bytes(b)) => a == b,
        _ => false,
    }
}

/// Check if a choice value is permitted under the given constraints.
///
/// This is the predicate a native draw satisfies by construction; every
/// concretized symbolic draw must satisfy it too.
pub fn choice_permitted(value: &ChoiceValue, constraints: &Constraints) -> bool {
    match (value, constraints) {
        (ChoiceValue::Integer(val), Constraints::Integer(c)) => c.is_valid(*val),
        (ChoiceValue::Integer(val), Constraints::Choice(c)) => c.validate(*val),
        (ChoiceValue::Boolean(val), Constraints::Boolean(c)) => c.permits(*val),
        (ChoiceValue::Float(val), Constraints::Float(c)) => c.validate(*val),
        (ChoiceValue::String(val), Constraints::String(c)) => c.validate(val),
        (ChoiceValue::Bytes(val), Constraints::Bytes(c)) => c.validate(val),
        _ => false,
    }
}

/// The choice type a concrete value belongs to. Choice indices report as integers.
pub fn choice_type_of(value: &ChoiceValue) -> ChoiceType {
    match value {
        ChoiceValue::Integer(_) => ChoiceType::Integer,
        ChoiceValue::Boolean(_) => ChoiceType::Boolean,
        ChoiceValue::Float(_) => ChoiceType::Float,
        ChoiceValue::String(_) => ChoiceType::String,
        ChoiceValue::Bytes(_) => ChoiceType::Bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::{
        BooleanConstraints, BytesConstraints, ChoiceConstraints, FloatConstraints, IntegerConstraints, IntervalSet,
        StringConstraints,
    };

    #[test]
    fn test_choice_equal_floats() {
        assert!(choice_equal(&ChoiceValue::Float(1.0), &ChoiceValue::Float(1.0)));
        assert!(choice_equal(&ChoiceValue::Float(f64::NAN), &ChoiceValue::Float(f64::NAN)));
        assert!(!choice_equal(&ChoiceValue::Float(0.0), &ChoiceValue::Float(-0.0)));
        assert!(!choice_equal(&ChoiceValue::Float(1.0), &ChoiceValue::Integer(1)));
    }

    #[test]
    fn test_choice_permitted_integer() {
        let constraints = Constraints::Integer(IntegerConstraints::bounded(0, 10));
        assert!(choice_permitted(&ChoiceValue::Integer(0), &constraints));
        assert!(choice_permitted(&ChoiceValue::Integer(10), &constraints));
        assert!(!choice_permitted(&ChoiceValue::Integer(-1), &constraints));
        assert!(!choice_permitted(&ChoiceValue::Integer(11), &constraints));
    }

    #[test]
    fn test_choice_permitted_choice_index() {
        let constraints = Constraints::Choice(ChoiceConstraints::new(3));
        assert!(choice_permitted(&ChoiceValue::Integer(2), &constraints));
        assert!(!choice_permitted(&ChoiceValue::Integer(3), &constraints));
        assert!(!choice_permitted(&ChoiceValue::Integer(-1), &constraints));
    }

    #[test]
    fn test_choice_permitted_boolean_edges() {
        let never = Constraints::Boolean(BooleanConstraints::with_probability(0.0));
        assert!(choice_permitted(&ChoiceValue::Boolean(false), &never));
        assert!(!choice_permitted(&ChoiceValue::Boolean(true), &never));
    }

    #[test]
    fn test_choice_permitted_float_signed_zero() {
        let constraints = Constraints::Float(FloatConstraints::bounded(0.0, 1.0));
        assert!(choice_permitted(&ChoiceValue::Float(0.0), &constraints));
        assert!(!choice_permitted(&ChoiceValue::Float(-0.0), &constraints));
        assert!(!choice_permitted(&ChoiceValue::Float(f64::NAN), &constraints));
    }

    #[test]
    fn test_choice_permitted_string_and_bytes() {
        let strings = Constraints::String(StringConstraints::new(IntervalSet::from_string("abc"), Some(1), Some(5)));
        assert!(choice_permitted(&ChoiceValue::String("abc".to_string()), &strings));
        assert!(!choice_permitted(&ChoiceValue::String(String::new()), &strings));
        assert!(!choice_permitted(&ChoiceValue::String("abcd".to_string()), &strings));

        let bytes = Constraints::Bytes(BytesConstraints::new(Some(2), Some(4)));
        assert!(choice_permitted(&ChoiceValue::Bytes(vec![1, 2]), &bytes));
        assert!(!choice_permitted(&ChoiceValue::Bytes(vec![1]), &bytes));
    }
}
