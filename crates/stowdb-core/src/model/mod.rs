//! Runtime schema model.
//!
//! Schemas are built once per type by `build` and never mutated afterwards,
//! except for the one-time factory binding.

mod field;
mod schema;

#[cfg(test)]
mod tests;

pub use field::{Field, FieldRole, RelationModel};
pub use schema::{FactoryRef, Identity, Schema, SchemaKind};

use crate::value::Value;
use std::collections::BTreeMap;

/// Flat column-name → value map exchanged with the store.
pub type Row = BTreeMap<String, Value>;
