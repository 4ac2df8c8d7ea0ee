//! Choice system for the symbolic provider
//!
//! All values a property receives flow through strongly-typed choices with
//! associated constraints. The set of draw kinds is closed: adding a kind means
//! extending [`ChoiceType`] and [`Constraints`], and every `match` over them
//! (translator, solver candidates, native providers) is then checked by the
//! compiler.

pub mod constraints;
pub mod values;

pub use self::constraints::*;
pub use self::values::*;

use serde::{Deserialize, Serialize};

/// Choice types that can be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChoiceType {
    Integer,
    Boolean,
    Float,
    String,
    Bytes,
    /// Index into a fixed set of options.
    Choice,
}

impl std::fmt::Display for ChoiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChoiceType::Integer => write!(f, "integer"),
            ChoiceType::Boolean => write!(f, "boolean"),
            ChoiceType::Float => write!(f, "float"),
            ChoiceType::String => write!(f, "string"),
            ChoiceType::Bytes => write!(f, "bytes"),
            ChoiceType::Choice => write!(f, "choice"),
        }
    }
}

/// A fully realized value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChoiceValue {
    Integer(i128),
    Boolean(bool),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Eq for ChoiceValue {}

impl std::hash::Hash for ChoiceValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            ChoiceValue::Integer(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            ChoiceValue::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            ChoiceValue::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            ChoiceValue::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            ChoiceValue::Bytes(v) => {
                4u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl std::fmt::Display for ChoiceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChoiceValue::Integer(i) => write!(f, "{}", i),
            ChoiceValue::Boolean(b) => write!(f, "{}", b),
            ChoiceValue::Float(x) => write!(f, "{:?}", x),
            ChoiceValue::String(s) => write!(f, "{:?}", s),
            ChoiceValue::Bytes(b) => write!(f, "{:?}", b),
        }
    }
}

impl ChoiceValue {
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            ChoiceValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ChoiceValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ChoiceValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ChoiceValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ChoiceValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Constraints for different choice types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constraints {
    Integer(IntegerConstraints),
    Boolean(BooleanConstraints),
    Float(FloatConstraints),
    String(StringConstraints),
    Bytes(BytesConstraints),
    Choice(ChoiceConstraints),
}

impl Constraints {
    /// The draw kind these constraints belong to.
    pub fn choice_type(&self) -> ChoiceType {
        match self {
            Constraints::Integer(_) => ChoiceType::Integer,
            Constraints::Boolean(_) => ChoiceType::Boolean,
            Constraints::Float(_) => ChoiceType::Float,
            Constraints::String(_) => ChoiceType::String,
            Constraints::Bytes(_) => ChoiceType::Bytes,
            Constraints::Choice(_) => ChoiceType::Choice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_type_display() {
        assert_eq!(format!("{}", ChoiceType::Integer), "integer");
        assert_eq!(format!("{}", ChoiceType::Boolean), "boolean");
        assert_eq!(format!("{}", ChoiceType::Float), "float");
        assert_eq!(format!("{}", ChoiceType::String), "string");
        assert_eq!(format!("{}", ChoiceType::Bytes), "bytes");
        assert_eq!(format!("{}", ChoiceType::Choice), "choice");
    }

    #[test]
    fn test_constraints_report_their_kind() {
        assert_eq!(Constraints::Choice(ChoiceConstraints::new(4)).choice_type(), ChoiceType::Choice);
        assert_eq!(Constraints::Float(FloatConstraints::default()).choice_type(), ChoiceType::Float);
    }

    #[test]
    fn test_choice_value_display_is_concrete() {
        assert_eq!(ChoiceValue::Integer(7).to_string(), "7");
        assert_eq!(ChoiceValue::Float(0.05).to_string(), "0.05");
        assert_eq!(ChoiceValue::String("foo".into()).to_string(), "\"foo\"");
    }
}
