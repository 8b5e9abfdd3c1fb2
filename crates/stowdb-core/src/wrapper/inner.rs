use crate::{
    error::Error,
    model::Schema,
    validate::ValidateError,
    value::Value,
    wrapper::WrapContext,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

///
/// InnerSchema
///
/// Nested value-object stage. The user-level value is a `Record` keyed by
/// inner member name; each inner field runs through its own (stateless)
/// chain and is flattened into the parent's columns through `renames`
/// (inner column → parent column).
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InnerSchema {
    pub schema: Arc<Schema>,
    pub renames: BTreeMap<String, String>,
}

impl InnerSchema {
    /// Parent column for an inner column name.
    #[must_use]
    pub fn column_name<'a>(&'a self, column: &'a str) -> &'a str {
        self.renames.get(column).map_or(column, String::as_str)
    }

    pub(super) fn write(&self, cx: &WrapContext<'_>, value: Value) -> Result<Value, Error> {
        let mut map = match value {
            Value::Null => return Ok(Value::Null),
            Value::Record(map) => map,
            other => {
                return Err(self.reject(cx, other, "expected a record value"));
            }
        };

        let mut out = BTreeMap::new();
        for field in self.schema.column_fields() {
            let value = map.remove(&field.name).unwrap_or_default();
            if !value.conforms_to(field.kind) {
                let reason = format!("member '{}' expects {}", field.name, field.kind);
                return Err(self.reject(cx, value, &reason));
            }

            let path = format!("{}.{}", cx.field, field.name);
            let inner_cx = WrapContext { field: &path, ..*cx };
            out.insert(field.name.clone(), field.chain.write_stateless(&inner_cx, value)?);
        }

        if let Some(unknown) = map.into_keys().next() {
            return Err(self.reject(
                cx,
                Value::Null,
                &format!("unknown member '{unknown}' for '{}'", self.schema.name()),
            ));
        }

        Ok(Value::Record(out))
    }

    pub(super) fn read(&self, cx: &WrapContext<'_>, raw: Value) -> Result<Value, Error> {
        let mut map = match raw {
            Value::Null => return Ok(Value::Null),
            Value::Record(map) => map,
            other => {
                return Err(Error::wrapper_corruption(
                    cx.entity,
                    cx.field,
                    format!("nested column set decoded to {other}"),
                ));
            }
        };

        // all inner columns absent or null reads as no value
        if map.values().all(Value::is_null) {
            return Ok(Value::Null);
        }

        let mut out = BTreeMap::new();
        for field in self.schema.column_fields() {
            let raw = map.remove(&field.name).unwrap_or_default();
            let path = format!("{}.{}", cx.field, field.name);
            let inner_cx = WrapContext { field: &path, ..*cx };
            out.insert(field.name.clone(), field.chain.read_stateless(&inner_cx, raw)?);
        }

        Ok(Value::Record(out))
    }

    fn reject(&self, cx: &WrapContext<'_>, value: Value, reason: &str) -> Error {
        ValidateError::Rejected {
            entity: cx.entity.to_string(),
            field: cx.field.to_string(),
            value,
            reason: format!("{reason} ({})", self.schema.name()),
        }
        .into()
    }
}
