use crate::{
    model::{Row, Schema},
    validate::Validator,
    value::{Value, ValueKind},
    wrapper::{InnerSchema, WrapperChain},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

///
/// FieldRole
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum FieldRole {
    /// Live persisted field.
    Column,

    /// Inherited member suppressed by a derived declaration. It keeps its
    /// storage column but is not part of the public field set.
    Hidden,

    /// One-to-many relation; owns no column.
    Relation(RelationModel),
}

///
/// RelationModel
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RelationModel {
    pub child: Arc<Schema>,

    /// Column on the child that stores the parent key.
    pub foreign_key: String,
}

///
/// Field
///
/// One named, typed, wrapped value slot of a schema.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) storage_name: String,
    pub(crate) kind: ValueKind,
    pub(crate) role: FieldRole,
    pub(crate) read_only: bool,
    pub(crate) identity: bool,
    pub(crate) is_abstract: bool,
    pub(crate) default: Value,
    pub(crate) chain: WrapperChain,
    pub(crate) validators: Vec<Validator>,
}

impl Field {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub const fn role(&self) -> &FieldRole {
        &self.role
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.identity
    }

    #[must_use]
    pub const fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    #[must_use]
    pub const fn default_value(&self) -> &Value {
        &self.default
    }

    #[must_use]
    pub const fn chain(&self) -> &WrapperChain {
        &self.chain
    }

    #[must_use]
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    #[must_use]
    pub const fn relation(&self) -> Option<&RelationModel> {
        match &self.role {
            FieldRole::Relation(model) => Some(model),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_relation(&self) -> bool {
        matches!(self.role, FieldRole::Relation(_))
    }

    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        matches!(self.role, FieldRole::Hidden)
    }

    /// Nested value-object schema, when the chain carries one.
    #[must_use]
    pub fn nested(&self) -> Option<&InnerSchema> {
        self.chain.inner()
    }

    /// Store columns owned by this field, after nested flattening and renames.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        if self.is_relation() {
            return Vec::new();
        }

        match self.nested() {
            Some(inner) => inner
                .schema
                .column_fields()
                .flat_map(Self::columns)
                .map(|column| inner.column_name(&column).to_string())
                .collect(),
            None => vec![self.storage_name.clone()],
        }
    }

    /// Write a raw (storage-form) value into `row` under this field's columns.
    pub(crate) fn flatten_into(&self, raw: &Value, row: &mut Row) {
        let mut sink = |column: String, value: Value| {
            row.insert(column, value);
        };
        self.flatten_with(raw, &mut sink);
    }

    fn flatten_with(&self, raw: &Value, sink: &mut dyn FnMut(String, Value)) {
        let Some(inner) = self.nested() else {
            sink(self.storage_name.clone(), raw.clone());
            return;
        };

        let empty = BTreeMap::new();
        let map = raw.as_record().unwrap_or(&empty);
        let mut renamed = |column: String, value: Value| {
            sink(inner.column_name(&column).to_string(), value);
        };

        for field in inner.schema.column_fields() {
            let value = map.get(&field.name).unwrap_or(&Value::Null);
            field.flatten_with(value, &mut renamed);
        }
    }

    /// Reassemble this field's raw value from `row`.
    /// Returns `None` when none of the field's columns are present.
    pub(crate) fn extract(&self, row: &Row) -> Option<Value> {
        self.extract_with(&|column| row.get(column).cloned())
    }

    fn extract_with(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Option<Value> {
        let Some(inner) = self.nested() else {
            return lookup(&self.storage_name);
        };

        let renamed = |column: &str| lookup(inner.column_name(column));
        let mut map = BTreeMap::new();
        let mut present = false;

        for field in inner.schema.column_fields() {
            let value = field.extract_with(&renamed);
            present |= value.is_some();
            map.insert(field.name.clone(), value.unwrap_or_default());
        }

        present.then_some(Value::Record(map))
    }
}
