use crate::{
    build::SchemaError,
    error::Error,
    validate::ValidateError,
    value::{Value, ValueKind},
    wrapper::WrapContext,
};
use serde::{Deserialize, Serialize};

///
/// ValueMapping
/// Domain value and its stored source representation.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ValueMapping {
    pub value: Value,
    pub source: Value,
}

///
/// ValueMap
///
/// Enumerated value set. Each domain value stores as itself unless a source
/// override is declared. The default (if any) must be a member of the set
/// and is returned for absent or unmatched stored sources.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ValueMap {
    entries: Vec<ValueMapping>,
    default: Option<Value>,
}

impl ValueMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value stored as itself.
    #[must_use]
    pub fn value(self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.value_as(value.clone(), value)
    }

    /// Add a value with an explicit source representation.
    #[must_use]
    pub fn value_as(mut self, value: impl Into<Value>, source: impl Into<Value>) -> Self {
        self.entries.push(ValueMapping {
            value: value.into(),
            source: source.into(),
        });
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[ValueMapping] {
        &self.entries
    }

    #[must_use]
    pub const fn default_entry(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.entries.iter().any(|e| e.value == *value)
    }

    /// Build-time consistency checks.
    pub(crate) fn check(&self, entity: &str, field: &str, kind: ValueKind) -> Result<(), SchemaError> {
        if self.entries.is_empty() {
            return Err(SchemaError::EmptyValueSet {
                entity: entity.to_string(),
                field: field.to_string(),
            });
        }

        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.value.conforms_to(kind) || entry.value.is_null() {
                return Err(SchemaError::ValueKindMismatch {
                    entity: entity.to_string(),
                    field: field.to_string(),
                    value: entry.value.to_string(),
                    expected: kind,
                });
            }

            let later = &self.entries[i + 1..];
            if later
                .iter()
                .any(|e| e.value == entry.value || e.source == entry.source)
            {
                return Err(SchemaError::DuplicateValueMapping {
                    entity: entity.to_string(),
                    field: field.to_string(),
                    value: entry.value.to_string(),
                });
            }
        }

        if let Some(default) = &self.default
            && !self.contains(default)
        {
            return Err(SchemaError::DefaultNotInValueSet {
                entity: entity.to_string(),
                field: field.to_string(),
                default: default.to_string(),
            });
        }

        Ok(())
    }

    pub(super) fn write(&self, cx: &WrapContext<'_>, value: Value) -> Result<Value, Error> {
        if value.is_null() {
            return Ok(value);
        }

        match self.entries.iter().find(|e| e.value == value) {
            Some(entry) => Ok(entry.source.clone()),
            None => Err(ValidateError::Rejected {
                entity: cx.entity.to_string(),
                field: cx.field.to_string(),
                value,
                reason: "value is not a member of the declared value set".to_string(),
            }
            .into()),
        }
    }

    pub(super) fn read(&self, cx: &WrapContext<'_>, raw: Value) -> Result<Value, Error> {
        if let Some(entry) = self.entries.iter().find(|e| e.source == raw) {
            return Ok(entry.value.clone());
        }

        match (&self.default, raw) {
            (Some(default), _) => Ok(default.clone()),
            (None, Value::Null) => Ok(Value::Null),
            (None, raw) => Err(Error::wrapper_corruption(
                cx.entity,
                cx.field,
                format!("stored source {raw} matches no declared value"),
            )),
        }
    }
}
