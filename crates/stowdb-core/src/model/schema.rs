use crate::{
    entity::EntityFactory,
    error::{Error, ErrorOrigin},
    key::Key,
    model::{Field, FieldRole, Row},
    value::{Value, ValueKind},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, OnceLock},
};

///
/// SchemaKind
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SchemaKind {
    /// Persisted entity with an identity.
    Entity,

    /// Identity-less value object, only ever flattened into a parent.
    ValueObject,
}

///
/// Identity
/// Ordered identity field names.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Identity {
    pub fields: Vec<String>,
}

///
/// FactoryRef
///
/// Late-bound factory slot. The schema is built from the declaration alone;
/// the concrete Rust type binds its factory on first typed lookup.
/// Ignored by equality and serialization.
///

#[derive(Clone, Default)]
pub struct FactoryRef(OnceLock<Arc<dyn EntityFactory>>);

impl fmt::Debug for FactoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(factory) => write!(f, "FactoryRef({})", factory.type_name()),
            None => f.write_str("FactoryRef(unbound)"),
        }
    }
}

impl PartialEq for FactoryRef {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

///
/// Schema
///
/// Immutable structural description of an entity type.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Schema {
    name: String,
    display_name: String,
    kind: SchemaKind,
    fields: Vec<Field>,
    identity: Option<Identity>,
    suppressed: Vec<String>,
    is_abstract: bool,
    full_initialization: bool,

    #[serde(skip)]
    factory: FactoryRef,
}

impl Schema {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        display_name: String,
        kind: SchemaKind,
        fields: Vec<Field>,
        identity: Option<Identity>,
        suppressed: Vec<String>,
        is_abstract: bool,
        full_initialization: bool,
    ) -> Self {
        Self {
            name,
            display_name,
            kind,
            fields,
            identity,
            suppressed,
            is_abstract,
            full_initialization,
            factory: FactoryRef::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub const fn kind(&self) -> SchemaKind {
        self.kind
    }

    #[must_use]
    pub const fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    #[must_use]
    pub const fn full_initialization(&self) -> bool {
        self.full_initialization
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    /// Public persisted fields: live, non-ignored, non-relation members.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| matches!(f.role, FieldRole::Column))
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields().count()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_relation())
    }

    /// Suppressed inherited members that still own a storage column.
    pub fn hidden_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_hidden())
    }

    /// Every field that owns store columns (public and hidden).
    pub fn column_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_relation())
    }

    /// Every slot of the schema in declaration order.
    pub(crate) fn slots(&self) -> &[Field] {
        &self.fields
    }

    /// Public field or relation by member name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.field_index(name).map(|i| &self.fields[i])
    }

    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name && !f.is_hidden())
    }

    /// True when `name` is an inherited member suppressed by this type.
    #[must_use]
    pub fn is_suppressed(&self, name: &str) -> bool {
        self.suppressed.iter().any(|s| s == name)
    }

    #[must_use]
    pub fn suppressed(&self) -> &[String] {
        &self.suppressed
    }

    /// Flattened store column names in declaration order.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.column_fields().flat_map(Field::columns).collect()
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub(crate) fn identity_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.identity)
    }

    /// Identity columns in key order.
    #[must_use]
    pub fn identity_columns(&self) -> Vec<String> {
        self.identity_fields().flat_map(Field::columns).collect()
    }

    /// True when the store may assign the identity (single integer column).
    #[must_use]
    pub fn store_assigns_identity(&self) -> bool {
        let mut fields = self.identity_fields();
        match (fields.next(), fields.next()) {
            (Some(field), None) => {
                field.nested().is_none()
                    && matches!(field.kind, ValueKind::Int | ValueKind::Uint)
            }
            _ => false,
        }
    }

    /// Derive the key from identity columns. `Ok(None)` when any identity
    /// column is missing or null.
    pub fn key_from_row(&self, row: &Row) -> Result<Option<Key>, Error> {
        let columns = self.identity_columns();
        let mut parts = Vec::with_capacity(columns.len());

        for column in &columns {
            let value = match row.get(column) {
                None | Some(Value::Null) => return Ok(None),
                Some(value) => value,
            };
            let key = Key::from_value(value).ok_or_else(|| {
                Error::invariant(
                    ErrorOrigin::Schema,
                    format!(
                        "identity column '{}.{column}' holds non-key value {value}",
                        self.name
                    ),
                )
            })?;
            parts.push(key);
        }

        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Key::Composite(parts)),
        })
    }

    /// Inverse of `key_from_row`: the identity columns for a key.
    pub fn identity_row(&self, key: &Key) -> Result<Row, Error> {
        let columns = self.identity_columns();
        let parts: Vec<&Key> = match (key, columns.len()) {
            (Key::Composite(parts), n) if n > 1 && parts.len() == n => parts.iter().collect(),
            (key, 1) => vec![key],
            _ => {
                return Err(Error::invariant(
                    ErrorOrigin::Schema,
                    format!(
                        "key {key} does not match identity columns of '{}' ({})",
                        self.name,
                        columns.join(", ")
                    ),
                ));
            }
        };

        columns
            .into_iter()
            .zip(parts)
            .map(|(column, part)| {
                let value = part.to_value().ok_or_else(|| {
                    Error::invariant(
                        ErrorOrigin::Schema,
                        format!("key {part} has no stored form ('{}')", self.name),
                    )
                })?;
                Ok((column, value))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Factory
    // ------------------------------------------------------------------

    #[must_use]
    pub fn factory(&self) -> Option<&Arc<dyn EntityFactory>> {
        self.factory.0.get()
    }

    /// Bind the factory once; later bindings are ignored.
    pub(crate) fn bind_factory(&self, make: impl FnOnce() -> Arc<dyn EntityFactory>) {
        let _ = self.factory.0.get_or_init(make);
    }
}
