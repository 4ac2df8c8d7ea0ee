//! # Constraint System: Draw Domains Shared by Host and Solver
//!
//! Every draw request carries one of the constraint types defined here. The same
//! structures are read by two very different consumers:
//!
//! - the native providers, which sample a concrete value inside the domain, and
//! - the symbolic translator, which turns the domain into a solver variable.
//!
//! Both must agree on *exactly* which values are permitted, otherwise a concretized
//! symbolic draw could be distinguishable from a native one. The predicates in this
//! module (`is_valid`, `validate`, `permits`) are therefore the single source of
//! truth; the translator and the reference solver never re-implement them.
//!
//! ## Float semantics
//!
//! Float bounds are compared with [`sign_aware_lte`], so `min_value = 0.0` excludes
//! `-0.0` and `max_value = -0.0` excludes `+0.0`. Nonzero values with a magnitude
//! below `smallest_nonzero_magnitude` are rejected, zero itself is always allowed
//! when the bounds allow it.
//!
//! ## String semantics
//!
//! String sizes are measured in code points, not bytes. Characters must fall into
//! one of the inclusive code point ranges of the constraint's [`IntervalSet`].

use serde::{Deserialize, Serialize};

/// Default upper size bound for strings and byte sequences when none is given.
pub const COLLECTION_DEFAULT_MAX_SIZE: usize = 8192;

/// Largest valid Unicode scalar value.
pub const MAX_CODEPOINT: u32 = 0x10FFFF;

/// Smallest positive subnormal `f64`, the host's default nonzero magnitude floor.
pub const SMALLEST_SUBNORMAL: f64 = 5e-324;

/// Compare two floats treating `-0.0` as strictly smaller than `+0.0`.
///
/// For every other pair this is plain `<=`. NaN never compares.
pub fn sign_aware_lte(a: f64, b: f64) -> bool {
    if a == 0.0 && b == 0.0 {
        a.is_sign_negative() || b.is_sign_positive()
    } else {
        a <= b
    }
}

/// Integer constraint specification for bounded or unbounded integer draws.
///
/// `min_value` and `max_value` are inclusive. `shrink_towards` is the value the
/// host prefers when minimizing; the reference solver enumerates candidates
/// outward from it so that realized models are as small as the host would shrink
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegerConstraints {
    /// Optional minimum value (inclusive).
    pub min_value: Option<i128>,
    /// Optional maximum value (inclusive).
    pub max_value: Option<i128>,
    /// Preferred shrinking target, clamped into the bounds when used.
    pub shrink_towards: Option<i128>,
}

impl Default for IntegerConstraints {
    fn default() -> Self {
        Self {
            min_value: None,
            max_value: None,
            shrink_towards: Some(0),
        }
    }
}

impl IntegerConstraints {
    /// Creates integer constraints with explicit bounds and shrinking target.
    pub fn new(min_value: Option<i128>, max_value: Option<i128>, shrink_towards: Option<i128>) -> Self {
        Self {
            min_value,
            max_value,
            shrink_towards,
        }
    }

    /// Inclusive range `[min_value, max_value]` shrinking towards zero.
    pub fn bounded(min_value: i128, max_value: i128) -> Self {
        Self::new(Some(min_value), Some(max_value), Some(0))
    }

    /// No bounds at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Whether `value` lies inside the bounds.
    pub fn is_valid(&self, value: i128) -> bool {
        self.min_value.map_or(true, |min| value >= min) && self.max_value.map_or(true, |max| value <= max)
    }

    /// Whether at least one value satisfies the bounds.
    pub fn is_satisfiable(&self) -> bool {
        match (self.min_value, self.max_value) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        }
    }

    /// The shrinking target clamped into the permitted range.
    pub fn shrinking_target(&self) -> i128 {
        let mut target = self.shrink_towards.unwrap_or(0);
        if let Some(min) = self.min_value {
            target = target.max(min);
        }
        if let Some(max) = self.max_value {
            target = target.min(max);
        }
        target
    }

    /// Number of permitted values, or `None` for half-open and unbounded ranges.
    pub fn domain_size(&self) -> Option<u128> {
        match (self.min_value, self.max_value) {
            (Some(min), Some(max)) if min <= max => Some(max.abs_diff(min).saturating_add(1)),
            (Some(_), Some(_)) => Some(0),
            _ => None,
        }
    }
}

/// Boolean constraint: probability of drawing `true`.
///
/// `p = 0.0` only permits `false` and `p = 1.0` only permits `true`, mirroring the
/// host. Everything in between permits both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanConstraints {
    pub p: f64,
}

impl Eq for BooleanConstraints {}

impl std::hash::Hash for BooleanConstraints {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.p.to_bits().hash(state);
    }
}

impl Default for BooleanConstraints {
    fn default() -> Self {
        Self { p: 0.5 }
    }
}

impl BooleanConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probability(p: f64) -> Self {
        Self { p }
    }

    /// Whether `value` can be produced under this probability.
    pub fn permits(&self, value: bool) -> bool {
        if self.p <= 0.0 {
            !value
        } else if self.p >= 1.0 {
            value
        } else {
            true
        }
    }
}

/// Constraints for float draws.
///
/// Exclusive bounds are handled higher up by the host (it nudges the bound to the
/// adjacent float before issuing the draw), so both bounds here are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatConstraints {
    pub min_value: f64,
    pub max_value: f64,
    pub allow_nan: bool,
    pub smallest_nonzero_magnitude: f64,
}

impl Eq for FloatConstraints {}

impl std::hash::Hash for FloatConstraints {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.min_value.to_bits().hash(state);
        self.max_value.to_bits().hash(state);
        self.allow_nan.hash(state);
        self.smallest_nonzero_magnitude.to_bits().hash(state);
    }
}

impl Default for FloatConstraints {
    fn default() -> Self {
        Self {
            min_value: f64::NEG_INFINITY,
            max_value: f64::INFINITY,
            allow_nan: true,
            smallest_nonzero_magnitude: SMALLEST_SUBNORMAL,
        }
    }
}

impl FloatConstraints {
    /// Bounded range without NaN.
    pub fn bounded(min_value: f64, max_value: f64) -> Self {
        Self {
            min_value,
            max_value,
            allow_nan: false,
            ..Self::default()
        }
    }

    /// Create constraints with full control, rejecting parameter combinations the
    /// host would refuse to issue.
    pub fn with_smallest_nonzero_magnitude(
        min_value: Option<f64>,
        max_value: Option<f64>,
        allow_nan: bool,
        smallest_nonzero_magnitude: f64,
    ) -> Result<Self, String> {
        if !(smallest_nonzero_magnitude > 0.0) {
            return Err(format!(
                "smallest_nonzero_magnitude must be positive, got: {}",
                smallest_nonzero_magnitude
            ));
        }

        let min = min_value.unwrap_or(f64::NEG_INFINITY);
        let max = max_value.unwrap_or(f64::INFINITY);
        if min.is_nan() || max.is_nan() {
            return Err("float bounds must not be NaN".to_string());
        }
        if !sign_aware_lte(min, max) {
            return Err(format!("min_value {} must be <= max_value {}", min, max));
        }

        Ok(Self {
            min_value: min,
            max_value: max,
            allow_nan,
            smallest_nonzero_magnitude,
        })
    }

    /// Validate that a float value satisfies these constraints.
    pub fn validate(&self, value: f64) -> bool {
        if value.is_nan() {
            return self.allow_nan;
        }
        if !sign_aware_lte(self.min_value, value) || !sign_aware_lte(value, self.max_value) {
            return false;
        }
        value == 0.0 || value.abs() >= self.smallest_nonzero_magnitude
    }

    /// Clamp a value into the permitted set. Used by native providers whose raw
    /// sample falls outside the domain.
    pub fn clamp(&self, value: f64) -> f64 {
        if self.validate(value) {
            return value;
        }
        if value.is_nan() {
            return if self.min_value.is_finite() { self.min_value } else { self.max_value.min(0.0) };
        }

        let mut result = value.max(self.min_value).min(self.max_value);
        if result == 0.0 {
            // the sign of zero decides which bound it violates
            result = if sign_aware_lte(self.min_value, 0.0) { 0.0 } else { -0.0 };
            if !sign_aware_lte(self.min_value, result) {
                result = 0.0;
            }
            if !sign_aware_lte(result, self.max_value) {
                result = -0.0;
            }
        } else if result.abs() < self.smallest_nonzero_magnitude {
            result = self.smallest_nonzero_magnitude.copysign(result);
            result = result.max(self.min_value).min(self.max_value);
        }
        result
    }
}

/// Inclusive code point ranges describing a string alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalSet {
    pub intervals: Vec<(u32, u32)>,
}

impl IntervalSet {
    /// Alphabet made of the distinct characters of `s`, merged into ranges.
    pub fn from_string(s: &str) -> Self {
        let mut chars: Vec<u32> = s.chars().map(|c| c as u32).collect();
        chars.sort_unstable();
        chars.dedup();

        let mut intervals: Vec<(u32, u32)> = Vec::new();
        for c in chars {
            match intervals.last_mut() {
                Some((_, end)) if *end + 1 == c => *end = c,
                _ => intervals.push((c, c)),
            }
        }
        Self { intervals }
    }

    /// Printable ASCII.
    pub fn ascii() -> Self {
        Self {
            intervals: vec![(32, 126)],
        }
    }

    pub fn from_ranges(ranges: &[(u32, u32)]) -> Self {
        Self {
            intervals: ranges.to_vec(),
        }
    }

    pub fn all_characters() -> Self {
        Self {
            intervals: vec![(0, MAX_CODEPOINT)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether this is the unrestricted alphabet.
    pub fn is_unrestricted(&self) -> bool {
        self.intervals.as_slice() == [(0, MAX_CODEPOINT)]
    }

    pub fn contains(&self, codepoint: u32) -> bool {
        self.intervals.iter().any(|&(start, end)| codepoint >= start && codepoint <= end)
    }

    /// Number of code points covered (surrogates included, as in the host).
    pub fn size(&self) -> u64 {
        self.intervals
            .iter()
            .filter(|(start, end)| start <= end)
            .map(|&(start, end)| u64::from(end - start) + 1)
            .sum()
    }

    /// The first `limit` characters of the alphabet in code point order, skipping
    /// code points that are not valid `char`s.
    pub fn leading_chars(&self, limit: usize) -> Vec<char> {
        self.intervals
            .iter()
            .flat_map(|&(start, end)| start..=end)
            .filter_map(char::from_u32)
            .take(limit)
            .collect()
    }
}

impl Default for IntervalSet {
    fn default() -> Self {
        Self::all_characters()
    }
}

/// Constraints for string draws.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringConstraints {
    pub intervals: IntervalSet,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for StringConstraints {
    fn default() -> Self {
        Self {
            intervals: IntervalSet::default(),
            min_size: 0,
            max_size: COLLECTION_DEFAULT_MAX_SIZE,
        }
    }
}

impl StringConstraints {
    pub fn new(intervals: IntervalSet, min_size: Option<usize>, max_size: Option<usize>) -> Self {
        Self {
            intervals,
            min_size: min_size.unwrap_or(0),
            max_size: max_size.unwrap_or(COLLECTION_DEFAULT_MAX_SIZE),
        }
    }

    pub fn validate(&self, value: &str) -> bool {
        let size = value.chars().count();
        size >= self.min_size
            && size <= self.max_size
            && value.chars().all(|c| self.intervals.contains(c as u32))
    }

    pub fn is_satisfiable(&self) -> bool {
        self.min_size <= self.max_size && (self.min_size == 0 || !self.intervals.is_empty())
    }
}

/// Constraints for byte sequence draws.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BytesConstraints {
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for BytesConstraints {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: COLLECTION_DEFAULT_MAX_SIZE,
        }
    }
}

impl BytesConstraints {
    pub fn new(min_size: Option<usize>, max_size: Option<usize>) -> Self {
        Self {
            min_size: min_size.unwrap_or(0),
            max_size: max_size.unwrap_or(COLLECTION_DEFAULT_MAX_SIZE),
        }
    }

    /// Exactly `size` bytes, the shape of the host's `draw_bytes(size)`.
    pub fn fixed(size: usize) -> Self {
        Self {
            min_size: size,
            max_size: size,
        }
    }

    pub fn validate(&self, value: &[u8]) -> bool {
        value.len() >= self.min_size && value.len() <= self.max_size
    }
}

/// Choice of one element out of `count` options; the drawn value is its index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChoiceConstraints {
    pub count: usize,
}

impl ChoiceConstraints {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    pub fn validate(&self, index: i128) -> bool {
        index >= 0 && (index as u128) < self.count as u128
    }

    /// Index domain as integer constraints.
    pub fn as_integer(&self) -> IntegerConstraints {
        IntegerConstraints::new(Some(0), Some(self.count as i128 - 1), Some(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_aware_lte_orders_zeros() {
        assert!(sign_aware_lte(-0.0, 0.0));
        assert!(!sign_aware_lte(0.0, -0.0));
        assert!(sign_aware_lte(0.0, 0.0));
        assert!(sign_aware_lte(-0.0, -0.0));
        assert!(sign_aware_lte(-1.0, 2.0));
        assert!(!sign_aware_lte(f64::NAN, 1.0));
    }

    #[test]
    fn test_float_min_zero_excludes_negative_zero() {
        let constraints = FloatConstraints::bounded(0.0, 1.0);
        assert!(constraints.validate(0.0));
        assert!(!constraints.validate(-0.0));

        let negative = FloatConstraints::bounded(-1.0, -0.0);
        assert!(negative.validate(-0.0));
        assert!(!negative.validate(0.0));
    }

    #[test]
    fn test_float_smallest_nonzero_magnitude() {
        let mut constraints = FloatConstraints::bounded(-10.0, 10.0);
        constraints.smallest_nonzero_magnitude = 1.0;
        assert!(constraints.validate(0.0));
        assert!(constraints.validate(-1.0));
        assert!(!constraints.validate(0.5));
        assert!(!constraints.validate(-0.25));
    }

    #[test]
    fn test_float_clamp_lands_inside_domain() {
        let constraints = FloatConstraints::bounded(0.0, 1.0);
        for raw in [-0.0, -5.0, 7.0, 0.5, f64::NAN] {
            let clamped = constraints.clamp(raw);
            assert!(constraints.validate(clamped), "{} clamped to {}", raw, clamped);
        }
    }

    #[test]
    fn test_float_constructor_rejects_inverted_zero_bounds() {
        assert!(FloatConstraints::with_smallest_nonzero_magnitude(Some(0.0), Some(-0.0), false, 1.0).is_err());
        assert!(FloatConstraints::with_smallest_nonzero_magnitude(None, None, true, 0.0).is_err());
        assert!(FloatConstraints::with_smallest_nonzero_magnitude(Some(-0.0), Some(0.0), false, 1.0).is_ok());
    }

    #[test]
    fn test_integer_domain_and_target() {
        let constraints = IntegerConstraints::new(Some(5), Some(9), Some(0));
        assert_eq!(constraints.domain_size(), Some(5));
        assert_eq!(constraints.shrinking_target(), 5);
        assert!(constraints.is_valid(9));
        assert!(!constraints.is_valid(10));
        assert_eq!(IntegerConstraints::unbounded().domain_size(), None);
        assert_eq!(IntegerConstraints::bounded(3, 2).domain_size(), Some(0));
    }

    #[test]
    fn test_interval_set_merges_adjacent_characters() {
        let set = IntervalSet::from_string("cabxz");
        assert_eq!(set.intervals, vec![(97, 99), (120, 120), (122, 122)]);
        assert_eq!(set.size(), 5);
        assert_eq!(set.leading_chars(4), vec!['a', 'b', 'c', 'x']);
        assert!(IntervalSet::default().is_unrestricted());
    }

    #[test]
    fn test_string_size_counts_codepoints() {
        let constraints = StringConstraints::new(IntervalSet::all_characters(), Some(2), Some(2));
        assert!(constraints.validate("éé"));
        assert!(!constraints.validate("é"));
    }

    #[test]
    fn test_boolean_permits() {
        assert!(!BooleanConstraints::with_probability(0.0).permits(true));
        assert!(!BooleanConstraints::with_probability(1.0).permits(false));
        assert!(BooleanConstraints::new().permits(true));
    }
}
