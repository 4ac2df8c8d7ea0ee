//! Enumerative reference backend
//!
//! A bounded backtracking search over per-variable candidate lists. Candidates
//! are produced in a deterministic order:
//!
//! 1. outward from the host's shrinking target (`0, 1, -1, 2, ...` for integers,
//!    shortlex order for strings and bytes),
//! 2. constants mentioned by constraints on the variable, with their neighbours,
//! 3. a pool of edge-case constants (powers of two, type limits, NaN, ...).
//!
//! A finite domain that fits in the candidate budget is enumerated completely, in
//! which case a failed search proves unsatisfiability. Otherwise a failed search
//! reports [`UnknownReason::Incomplete`], which the bridge must never treat as
//! proof.

use super::expr::{eval_pred, EvalError, Pred, Term};
use super::{EngineError, Model, SolveResult, SymbolicEngine, UnknownReason, VarId};
use crate::choice::{choice_permitted, ChoiceType, ChoiceValue, Constraints, FloatConstraints, IntegerConstraints};
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

/// Default number of candidates tried per variable.
pub const DEFAULT_MAX_CANDIDATES: usize = 256;

/// Steps between two deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 64;

/// Edge-case constants appended to every candidate list.
#[derive(Debug, Clone)]
pub struct GlobalConstants {
    pub integers: Vec<i128>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    pub bytes: Vec<Vec<u8>>,
}

impl Default for GlobalConstants {
    fn default() -> Self {
        Self {
            integers: vec![
                0, 1, -1, 2, -2, 4, 8, 16, 32, 64, 100, 128, 255, 256, 1000, 1024, -128, -256, -1024,
                i8::MIN as i128, i8::MAX as i128,
                i16::MIN as i128, i16::MAX as i128,
                i32::MIN as i128, i32::MAX as i128,
                i64::MIN as i128, i64::MAX as i128,
            ],
            floats: vec![
                0.0, -0.0, 1.0, -1.0, 0.5, -0.5, 2.0, -2.0, 10.0, -10.0,
                f64::INFINITY, f64::NEG_INFINITY, f64::NAN,
                f64::MAX, f64::MIN, f64::MIN_POSITIVE, f64::EPSILON,
                1.0 / 3.0,
            ],
            strings: vec![String::new(), " ".into(), "a".into(), "\n".into(), "\0".into()],
            bytes: vec![vec![], vec![0], vec![255]],
        }
    }
}

#[derive(Debug, Clone)]
struct VarDecl {
    name: String,
    kind: ChoiceType,
    constraints: Constraints,
}

/// Reference [`SymbolicEngine`] backed by bounded enumeration.
#[derive(Debug)]
pub struct EnumerativeEngine {
    vars: Vec<VarDecl>,
    path: Vec<Pred>,
    deadline: Option<Instant>,
    model_check_timeout: Duration,
    max_candidates: usize,
    pool: GlobalConstants,
    /// Total number of satisfiability checks since construction.
    pub checks: u64,
}

impl Default for EnumerativeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EnumerativeEngine {
    pub fn new() -> Self {
        Self {
            vars: Vec::new(),
            path: Vec::new(),
            deadline: None,
            model_check_timeout: Duration::from_millis(1250),
            max_candidates: DEFAULT_MAX_CANDIDATES,
            pool: GlobalConstants::default(),
            checks: 0,
        }
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }

    /// Name given to a variable at declaration.
    pub fn variable_name(&self, var: VarId) -> Option<&str> {
        self.vars.get(var.0 as usize).map(|decl| decl.name.as_str())
    }

    /// Draw kind a variable was declared with.
    pub fn variable_kind(&self, var: VarId) -> Option<ChoiceType> {
        self.vars.get(var.0 as usize).map(|decl| decl.kind)
    }

    /// Path constraints asserted since the last reset.
    pub fn path_constraints(&self) -> &[Pred] {
        &self.path
    }

    fn decl(&self, var: VarId) -> Result<&VarDecl, EngineError> {
        self.vars.get(var.0 as usize).ok_or(EngineError::UnknownVariable(var))
    }

    /// Candidate values for `var` and whether they cover its whole domain.
    fn candidates(&self, var: VarId, preds: &[&Pred]) -> (Vec<ChoiceValue>, bool) {
        let decl = &self.vars[var.0 as usize];
        let mut constants = Vec::new();
        for pred in preds.iter().filter(|p| p.mentions(var)) {
            pred.collect_constants(&mut constants);
        }

        let mut out = CandidateList::new(self.max_candidates, &decl.constraints);
        let complete = match &decl.constraints {
            Constraints::Integer(c) => self.integer_candidates(c, &constants, &mut out),
            Constraints::Choice(c) => self.integer_candidates(&c.as_integer(), &constants, &mut out),
            Constraints::Boolean(_) => {
                out.push(ChoiceValue::Boolean(false));
                out.push(ChoiceValue::Boolean(true));
                true
            }
            Constraints::Float(c) => {
                self.float_candidates(c, &constants, &mut out);
                false
            }
            Constraints::String(c) => {
                let alphabet = c.intervals.leading_chars(64);
                let size = c.intervals.size();
                let complete = sequence_space(size, c.min_size, c.max_size).map_or(false, |n| n <= self.max_candidates as u128);
                for constant in &constants {
                    if let ChoiceValue::String(_) = constant {
                        out.push(constant.clone());
                    }
                }
                let lengths = if complete { (c.min_size..=c.max_size).collect() } else { lengths_of_interest(c.min_size, c.max_size, &constants) };
                shortlex(&alphabet, &lengths, complete, &mut out, |chars| ChoiceValue::String(chars.iter().collect()));
                for s in &self.pool.strings {
                    out.push(ChoiceValue::String(s.clone()));
                }
                complete && alphabet.len() as u64 == size
            }
            Constraints::Bytes(c) => {
                let alphabet: Vec<u8> = (0..=255u8).collect();
                let complete = sequence_space(256, c.min_size, c.max_size).map_or(false, |n| n <= self.max_candidates as u128);
                for constant in &constants {
                    if let ChoiceValue::Bytes(_) = constant {
                        out.push(constant.clone());
                    }
                }
                let lengths = if complete { (c.min_size..=c.max_size).collect() } else { lengths_of_interest(c.min_size, c.max_size, &constants) };
                shortlex(&alphabet, &lengths, complete, &mut out, |bytes| ChoiceValue::Bytes(bytes.to_vec()));
                for b in &self.pool.bytes {
                    out.push(ChoiceValue::Bytes(b.clone()));
                }
                complete
            }
        };
        (out.into_values(), complete)
    }

    fn integer_candidates(&self, c: &IntegerConstraints, constants: &[ChoiceValue], out: &mut CandidateList) -> bool {
        let target = c.shrinking_target();
        if let Some(size) = c.domain_size() {
            if size <= self.max_candidates as u128 {
                for value in outward(target).take(size as usize * 2 + 1) {
                    out.push(ChoiceValue::Integer(value));
                }
                return true;
            }
        }

        out.push(ChoiceValue::Integer(target));
        for constant in constants {
            let base = match constant {
                ChoiceValue::Integer(i) => *i,
                ChoiceValue::Float(f) if f.is_finite() && f.abs() < 1e30 => f.round() as i128,
                _ => continue,
            };
            for delta in [0, -1, 1] {
                if let Some(v) = base.checked_add(delta) {
                    out.push(ChoiceValue::Integer(v));
                }
            }
        }
        for bound in [c.min_value, c.max_value].into_iter().flatten() {
            out.push(ChoiceValue::Integer(bound));
        }
        for &value in &self.pool.integers {
            out.push(ChoiceValue::Integer(value));
        }
        for value in outward(target) {
            if out.is_full() {
                break;
            }
            out.push(ChoiceValue::Integer(value));
        }
        false
    }

    fn float_candidates(&self, c: &FloatConstraints, constants: &[ChoiceValue], out: &mut CandidateList) {
        out.push(ChoiceValue::Float(0.0));
        out.push(ChoiceValue::Float(-0.0));
        for constant in constants {
            let base = match constant {
                ChoiceValue::Float(f) => *f,
                ChoiceValue::Integer(i) => *i as f64,
                _ => continue,
            };
            out.push(ChoiceValue::Float(base));
            out.push(ChoiceValue::Float(next_float(base, false)));
            out.push(ChoiceValue::Float(next_float(base, true)));
        }
        for bound in [c.min_value, c.max_value] {
            out.push(ChoiceValue::Float(bound));
            out.push(ChoiceValue::Float(next_float(bound, true)));
            out.push(ChoiceValue::Float(next_float(bound, false)));
        }
        if c.min_value.is_finite() && c.max_value.is_finite() {
            out.push(ChoiceValue::Float(c.min_value / 2.0 + c.max_value / 2.0));
        }
        out.push(ChoiceValue::Float(c.smallest_nonzero_magnitude));
        out.push(ChoiceValue::Float(-c.smallest_nonzero_magnitude));
        for &value in &self.pool.floats {
            out.push(ChoiceValue::Float(value));
        }
    }

    fn deadline_for_check(&self) -> Instant {
        let check_deadline = Instant::now() + self.model_check_timeout;
        match self.deadline {
            Some(path_deadline) if path_deadline < check_deadline => path_deadline,
            _ => check_deadline,
        }
    }
}

impl SymbolicEngine for EnumerativeEngine {
    fn name(&self) -> &'static str {
        "enumerative"
    }

    fn reset(&mut self) {
        self.vars.clear();
        self.path.clear();
        self.deadline = None;
    }

    fn set_limits(&mut self, deadline: Instant, model_check_timeout: Duration) {
        self.deadline = Some(deadline);
        self.model_check_timeout = model_check_timeout;
    }

    fn new_symbolic(&mut self, name: &str, kind: ChoiceType, constraints: &Constraints) -> Result<VarId, EngineError> {
        let id = u32::try_from(self.vars.len()).map_err(|_| EngineError::Internal("too many variables".into()))?;
        self.vars.push(VarDecl {
            name: name.to_string(),
            kind,
            constraints: constraints.clone(),
        });
        Ok(VarId(id))
    }

    fn assert(&mut self, pred: Pred) -> Result<(), EngineError> {
        for var in pred.vars() {
            self.decl(var)?;
        }
        self.path.push(pred);
        Ok(())
    }

    fn check_satisfiable(&mut self, extra: Option<&Pred>) -> Result<SolveResult, EngineError> {
        self.checks += 1;
        let deadline = self.deadline_for_check();
        if Instant::now() >= deadline {
            return Ok(SolveResult::Unknown(UnknownReason::Timeout));
        }

        let preds: Vec<&Pred> = self.path.iter().chain(extra).collect();
        for pred in &preds {
            for var in pred.vars() {
                self.decl(var)?;
            }
        }

        // constraints are checked at the level of their highest variable
        let mut scheduled: Vec<Vec<&Pred>> = vec![Vec::new(); self.vars.len()];
        let mut mentioned = BTreeSet::new();
        for pred in &preds {
            let vars = pred.vars();
            match vars.iter().next_back() {
                Some(last) => scheduled[last.0 as usize].push(pred),
                None => match eval_pred(pred, &Model::new()) {
                    Ok(true) => {}
                    Ok(false) => return Ok(SolveResult::Unsat),
                    Err(EvalError::Overflow) => return Ok(SolveResult::Unknown(UnknownReason::Incomplete)),
                    Err(err) => return Err(EngineError::Internal(err.to_string())),
                },
            }
            mentioned.extend(vars);
        }

        let mut candidates = Vec::with_capacity(self.vars.len());
        let mut complete = true;
        for index in 0..self.vars.len() {
            let var = VarId(index as u32);
            let (values, var_complete) = self.candidates(var, &preds);
            if mentioned.contains(&var) {
                complete &= var_complete;
            }
            if values.is_empty() {
                return Ok(if var_complete { SolveResult::Unsat } else { SolveResult::Unknown(UnknownReason::Incomplete) });
            }
            candidates.push(values);
        }

        let mut search = Search {
            candidates: &candidates,
            scheduled: &scheduled,
            model: Model::new(),
            steps: 0,
            deadline,
            undetermined: false,
        };
        match search.run(0) {
            Outcome::Found => Ok(SolveResult::Sat(search.model)),
            Outcome::TimedOut => Ok(SolveResult::Unknown(UnknownReason::Timeout)),
            Outcome::Exhausted if complete && !search.undetermined => Ok(SolveResult::Unsat),
            Outcome::Exhausted => Ok(SolveResult::Unknown(UnknownReason::Incomplete)),
        }
    }

    fn variable_count(&self) -> usize {
        self.vars.len()
    }
}

enum Outcome {
    Found,
    Exhausted,
    TimedOut,
}

struct Search<'a> {
    candidates: &'a [Vec<ChoiceValue>],
    scheduled: &'a [Vec<&'a Pred>],
    model: Model,
    steps: u64,
    deadline: Instant,
    /// Some candidate could not be evaluated, so exhaustion proves nothing.
    undetermined: bool,
}

impl Search<'_> {
    fn run(&mut self, level: usize) -> Outcome {
        if level == self.candidates.len() {
            return Outcome::Found;
        }
        let var = VarId(level as u32);
        let candidates = self.candidates;
        for value in &candidates[level] {
            self.steps += 1;
            if self.steps % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
                return Outcome::TimedOut;
            }
            self.model.insert(var, value.clone());
            let scheduled = self.scheduled;
            let mut consistent = true;
            for pred in &scheduled[level] {
                match eval_pred(pred, &self.model) {
                    Ok(true) => {}
                    Ok(false) => {
                        consistent = false;
                        break;
                    }
                    Err(_) => {
                        self.undetermined = true;
                        consistent = false;
                        break;
                    }
                }
            }
            if consistent {
                match self.run(level + 1) {
                    Outcome::Exhausted => {}
                    other => return other,
                }
            }
        }
        self.model.remove(var);
        Outcome::Exhausted
    }
}

/// Deduplicating, domain-filtering candidate accumulator.
struct CandidateList<'a> {
    values: Vec<ChoiceValue>,
    seen: HashSet<ChoiceValue>,
    limit: usize,
    constraints: &'a Constraints,
}

impl<'a> CandidateList<'a> {
    fn new(limit: usize, constraints: &'a Constraints) -> Self {
        Self {
            values: Vec::new(),
            seen: HashSet::new(),
            limit,
            constraints,
        }
    }

    fn push(&mut self, value: ChoiceValue) {
        if self.is_full() || !choice_permitted(&value, self.constraints) {
            return;
        }
        if self.seen.insert(value.clone()) {
            self.values.push(value);
        }
    }

    fn is_full(&self) -> bool {
        self.values.len() >= self.limit
    }

    fn into_values(self) -> Vec<ChoiceValue> {
        self.values
    }
}

/// `t, t+1, t-1, t+2, t-2, ...` without overflowing.
fn outward(target: i128) -> impl Iterator<Item = i128> {
    std::iter::once(target).chain((1..).flat_map(move |d: i128| {
        [target.checked_add(d), target.checked_sub(d)].into_iter().flatten()
    }))
}

/// Number of sequences with lengths in `[min, max]` over an alphabet of `size`.
fn sequence_space(size: u64, min: usize, max: usize) -> Option<u128> {
    let mut total: u128 = 0;
    for len in min..=max {
        let count = (size as u128).checked_pow(u32::try_from(len).ok()?)?;
        total = total.checked_add(count)?;
    }
    Some(total)
}

/// Lengths worth enumerating: the smallest few plus any integer constant that
/// could be a length.
fn lengths_of_interest(min: usize, max: usize, constants: &[ChoiceValue]) -> Vec<usize> {
    let mut lengths: Vec<usize> = (min..=max.min(min.saturating_add(3))).collect();
    for constant in constants {
        let len = match constant {
            ChoiceValue::Integer(i) if *i >= 0 => *i as usize,
            ChoiceValue::String(s) => s.chars().count(),
            ChoiceValue::Bytes(b) => b.len(),
            _ => continue,
        };
        if len >= min && len <= max && !lengths.contains(&len) {
            lengths.push(len);
        }
    }
    lengths
}

/// Push sequences in shortlex order. When `exhaustive` is false only sequences
/// over the first few symbols are produced.
fn shortlex<T: Copy, F>(alphabet: &[T], lengths: &[usize], exhaustive: bool, out: &mut CandidateList<'_>, make: F)
where
    F: Fn(&[T]) -> ChoiceValue,
{
    if alphabet.is_empty() {
        if lengths.contains(&0) {
            out.push(make(&[]));
        }
        return;
    }
    let symbols = if exhaustive { alphabet } else { &alphabet[..alphabet.len().min(3)] };
    for &len in lengths {
        if out.is_full() {
            return;
        }
        let mut indices = vec![0usize; len];
        loop {
            if out.is_full() {
                return;
            }
            let seq: Vec<T> = indices.iter().map(|&i| symbols[i]).collect();
            out.push(make(&seq));
            // odometer increment, last position fastest
            let mut pos = len;
            loop {
                if pos == 0 {
                    break;
                }
                pos -= 1;
                indices[pos] += 1;
                if indices[pos] < symbols.len() {
                    break;
                }
                indices[pos] = 0;
            }
            if indices.iter().all(|&i| i == 0) {
                break;
            }
        }
    }
}

/// Adjacent representable float towards +inf (`up`) or -inf.
fn next_float(x: f64, up: bool) -> f64 {
    if x.is_nan() || (up && x == f64::INFINITY) || (!up && x == f64::NEG_INFINITY) {
        return x;
    }
    if x == 0.0 {
        let tiny = f64::from_bits(1);
        return if up { tiny } else { -tiny };
    }
    let bits = x.to_bits();
    let bits = if (x > 0.0) == up { bits + 1 } else { bits - 1 };
    f64::from_bits(bits)
}
