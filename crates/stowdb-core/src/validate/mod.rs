//! Field validators, evaluated on user-level values before a create or
//! update is accepted and again when a transaction commits.


use crate::{
    entity::EntityRecord,
    error::Error,
    model::{Field, Schema},
    tx::TxId,
    value::{OperatorRegistry, Value, ValueKind},
};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{cmp::Ordering, fmt};
use thiserror::Error as ThisError;

///
/// ValidateError
///

#[derive(Debug, ThisError)]
pub enum ValidateError {
    #[error("field '{entity}.{field}' rejected value {value}: {reason}")]
    Rejected {
        entity: String,
        field: String,
        value: Value,
        reason: String,
    },
}

///
/// Validator
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Validator {
    NotNull,
    Range {
        min: Option<Value>,
        max: Option<Value>,
    },
    Length {
        min: Option<usize>,
        max: Option<usize>,
    },
    Pattern(Pattern),
}

impl Validator {
    /// Inclusive range; either bound may be open.
    #[must_use]
    pub fn range(min: impl Into<Value>, max: impl Into<Value>) -> Self {
        Self::Range {
            min: Some(min.into()).filter(|v: &Value| !v.is_null()),
            max: Some(max.into()).filter(|v: &Value| !v.is_null()),
        }
    }

    #[must_use]
    pub const fn length(min: Option<usize>, max: Option<usize>) -> Self {
        Self::Length { min, max }
    }

    /// Compile a pattern validator. Fails on an invalid expression.
    pub fn pattern(source: &str) -> Result<Self, regex::Error> {
        Pattern::new(source).map(Self::Pattern)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotNull => "not_null",
            Self::Range { .. } => "range",
            Self::Length { .. } => "length",
            Self::Pattern(_) => "pattern",
        }
    }

    /// Whether this validator can check values of `kind`.
    #[must_use]
    pub fn applies_to(&self, kind: ValueKind) -> bool {
        match self {
            Self::NotNull => true,
            Self::Range { min, max } => {
                kind != ValueKind::Record
                    && [min, max]
                        .into_iter()
                        .flatten()
                        .all(|bound| bound.conforms_to(kind))
            }
            Self::Length { .. } => matches!(kind, ValueKind::Text | ValueKind::Blob),
            Self::Pattern(_) => kind == ValueKind::Text,
        }
    }

    /// Check one value. Every validator except `NotNull` accepts `Null`.
    /// Returns the rejection reason, if any.
    pub(crate) fn check(
        &self,
        value: &Value,
        operators: &OperatorRegistry,
    ) -> Result<Option<String>, Error> {
        if value.is_null() {
            return Ok(matches!(self, Self::NotNull).then(|| "value is required".to_string()));
        }

        let reason = match self {
            Self::NotNull => None,

            Self::Range { min, max } => {
                let below = match min {
                    Some(min) => operators.compare(value, min)? == Ordering::Less,
                    None => false,
                };
                let above = match max {
                    Some(max) => operators.compare(value, max)? == Ordering::Greater,
                    None => false,
                };

                match (below, above, min, max) {
                    (true, _, Some(min), _) => Some(format!("value is below minimum {min}")),
                    (_, true, _, Some(max)) => Some(format!("value is above maximum {max}")),
                    _ => None,
                }
            }

            Self::Length { min, max } => {
                let len = match value {
                    Value::Text(text) => text.chars().count(),
                    Value::Blob(bytes) => bytes.len(),
                    _ => return Ok(Some(format!("length is undefined for {value}"))),
                };

                match (*min, *max) {
                    (Some(min), _) if len < min => {
                        Some(format!("length {len} is below minimum {min}"))
                    }
                    (_, Some(max)) if len > max => {
                        Some(format!("length {len} is above maximum {max}"))
                    }
                    _ => None,
                }
            }

            Self::Pattern(pattern) => match value {
                Value::Text(text) if pattern.regex.is_match(text) => None,
                _ => Some(format!("value does not match pattern '{}'", pattern.source)),
            },
        };

        Ok(reason)
    }
}

///
/// Pattern
///
/// Compiled regular expression; serialized and compared by its source.
///

#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;

        Self::new(&source).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Record validation
// ---------------------------------------------------------------------------

/// Validate one user-level field value, descending into nested records.
pub(crate) fn validate_value(
    schema: &Schema,
    field: &Field,
    path: &str,
    value: &Value,
    operators: &OperatorRegistry,
) -> Result<(), Error> {
    for validator in field.validators() {
        if let Some(reason) = validator.check(value, operators)? {
            return Err(ValidateError::Rejected {
                entity: schema.name().to_string(),
                field: path.to_string(),
                value: value.clone(),
                reason,
            }
            .into());
        }
    }

    if let (Some(inner), Some(map)) = (field.nested(), value.as_record()) {
        for inner_field in inner.schema.column_fields() {
            let inner_value = map.get(inner_field.name()).unwrap_or(&Value::Null);
            let inner_path = format!("{path}.{}", inner_field.name());
            validate_value(schema, inner_field, &inner_path, inner_value, operators)?;
        }
    }

    Ok(())
}

/// Validate every loaded public field of `record` as seen from `view`.
/// Stops at the first rejection.
pub(crate) fn validate_record(record: &EntityRecord, view: Option<TxId>) -> Result<(), Error> {
    let schema = record.schema();
    let operators = record.services().operators.clone();

    for (field, value) in record.loaded_values(view)? {
        validate_value(schema, field, field.name(), &value, &operators)?;
    }

    Ok(())
}
