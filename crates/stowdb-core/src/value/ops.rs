use crate::{
    error::ErrorOrigin,
    value::{Value, ValueKind},
};
use std::{cmp::Ordering, collections::HashMap};
use thiserror::Error as ThisError;

type CompareFn = fn(&Value, &Value) -> Option<Ordering>;
type SubtractFn = fn(&Value, &Value) -> Option<Value>;

///
/// UnsupportedError
///
/// A generic facility asked for an operator or capability that nothing
/// registered.
///

#[derive(Debug, ThisError)]
pub enum UnsupportedError {
    #[error("operator '{op}' is not registered for kind '{kind}'")]
    OperatorNotRegistered { op: &'static str, kind: ValueKind },

    #[error("operator '{op}' cannot combine '{left}' with '{right}'")]
    KindMismatch {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("key source cannot resolve {descriptor}")]
    KeySource { descriptor: String },
}

impl UnsupportedError {
    #[must_use]
    pub const fn origin(&self) -> ErrorOrigin {
        match self {
            Self::OperatorNotRegistered { .. } | Self::KindMismatch { .. } => ErrorOrigin::Validate,
            Self::KeySource { .. } => ErrorOrigin::Crypto,
        }
    }
}

///
/// Operators
/// Per-kind operator slots; `None` means not registered.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct Operators {
    pub compare: Option<CompareFn>,
    pub subtract: Option<SubtractFn>,
}

///
/// OperatorRegistry
///
/// Comparison and arithmetic operators keyed by value kind.
/// Range validators and any other ordering-dependent code go through here,
/// so an unregistered kind fails at the point of use.
///

#[derive(Clone, Debug)]
pub struct OperatorRegistry {
    ops: HashMap<ValueKind, Operators>,
}

impl OperatorRegistry {
    /// Registry with no operators at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Registry with the built-in numeric, date and textual operators.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        registry.register(
            ValueKind::Int,
            Operators {
                compare: Some(compare_int),
                subtract: Some(subtract_int),
            },
        );
        registry.register(
            ValueKind::Uint,
            Operators {
                compare: Some(compare_uint),
                subtract: Some(subtract_uint),
            },
        );
        registry.register(
            ValueKind::Float64,
            Operators {
                compare: Some(compare_float),
                subtract: Some(subtract_float),
            },
        );
        registry.register(
            ValueKind::Date,
            Operators {
                compare: Some(compare_date),
                subtract: Some(subtract_date),
            },
        );

        // ordered but not subtractable
        for kind in [ValueKind::Text, ValueKind::Char, ValueKind::Ulid] {
            registry.register(
                kind,
                Operators {
                    compare: Some(compare_ordered),
                    subtract: None,
                },
            );
        }

        registry
    }

    /// Register (or replace) the operators for a kind.
    pub fn register(&mut self, kind: ValueKind, ops: Operators) {
        self.ops.insert(kind, ops);
    }

    #[must_use]
    pub fn operators(&self, kind: ValueKind) -> Operators {
        self.ops.get(&kind).copied().unwrap_or_default()
    }

    /// Order two values of the same kind.
    pub fn compare(&self, left: &Value, right: &Value) -> Result<Ordering, UnsupportedError> {
        let kind = same_kind("compare", left, right)?;
        let compare = self
            .operators(kind)
            .compare
            .ok_or(UnsupportedError::OperatorNotRegistered { op: "compare", kind })?;

        compare(left, right).ok_or_else(|| mismatch("compare", left, right))
    }

    /// Subtract `right` from `left`.
    pub fn subtract(&self, left: &Value, right: &Value) -> Result<Value, UnsupportedError> {
        let kind = same_kind("subtract", left, right)?;
        let subtract = self
            .operators(kind)
            .subtract
            .ok_or(UnsupportedError::OperatorNotRegistered {
                op: "subtract",
                kind,
            })?;

        subtract(left, right).ok_or_else(|| mismatch("subtract", left, right))
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn same_kind(op: &'static str, left: &Value, right: &Value) -> Result<ValueKind, UnsupportedError> {
    match (left.kind(), right.kind()) {
        (Some(l), Some(r)) if l == r => Ok(l),
        _ => Err(mismatch(op, left, right)),
    }
}

fn mismatch(op: &'static str, left: &Value, right: &Value) -> UnsupportedError {
    let label = |v: &Value| v.kind().map_or("null", ValueKind::as_str).to_string();

    UnsupportedError::KindMismatch {
        op,
        left: label(left),
        right: label(right),
    }
}

// ---------------------------------------------------------------------
// Built-in operators
// ---------------------------------------------------------------------

fn compare_int(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn subtract_int(l: &Value, r: &Value) -> Option<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int),
        _ => None,
    }
}

fn compare_uint(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Uint(a), Value::Uint(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn subtract_uint(l: &Value, r: &Value) -> Option<Value> {
    match (l, r) {
        (Value::Uint(a), Value::Uint(b)) => a.checked_sub(*b).map(Value::Uint),
        _ => None,
    }
}

fn compare_float(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
        _ => None,
    }
}

fn subtract_float(l: &Value, r: &Value) -> Option<Value> {
    match (l, r) {
        (Value::Float64(a), Value::Float64(b)) => Some(Value::Float64(a - b)),
        _ => None,
    }
}

fn compare_date(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// date difference in whole days
fn subtract_date(l: &Value, r: &Value) -> Option<Value> {
    match (l, r) {
        (Value::Date(a), Value::Date(b)) => Some(Value::Int(a.signed_duration_since(*b).num_days())),
        _ => None,
    }
}

fn compare_ordered(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        (Value::Ulid(a), Value::Ulid(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
