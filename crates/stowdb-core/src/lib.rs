//! Core runtime for StowDB: values, schemas, the field wrapper pipeline,
//! the transactional identity cache, and cascading relation lists.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod build;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod entity;
pub mod error;
pub mod key;
pub mod model;
pub mod obs;
pub mod relation;
pub mod serialize;
pub mod store;
pub mod tx;
pub mod validate;
pub mod value;
pub mod wrapper;

// test
#[cfg(test)]
pub(crate) mod test_fixtures;

pub use error::Error;

///
/// CONSTANTS
///

/// Maximum length of an entity name or a field storage name.
pub const MAX_NAME_LEN: usize = 64;

/// Maximum nesting depth for value-object schemas flattened into a parent.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Maximum payload accepted by bounded decoders.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, stores, serializers, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        build::{Describe, EntityDecl, MemberDecl, SearchStrategy, entity_schema, schema_for},
        entity::{Entity, EntityRecord, EntityType, Synthesized},
        key::Key,
        model::{Field, Schema},
        relation::RelationManyList,
        tx::{TxContext, TxScope},
        value::{FieldValue, Value, ValueKind},
        wrapper::{TrimSide, ValueMap},
    };
}
