//! Schema construction from explicit declarations, and the process-wide
//! schema registry.

mod builder;
mod decl;
mod error;


pub use builder::build_schema;
pub use decl::{EntityDecl, MemberDecl, MemberFilter, SearchStrategy, VisibilityFilter};
pub use error::SchemaError;

use crate::{
    entity::EntityType,
    error::{Error, ErrorOrigin},
    model::Schema,
};
use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, LazyLock, RwLock},
};

///
/// Describe
///
/// Implemented by every type that has a schema: entities, abstract
/// contracts and value objects.
///

pub trait Describe: 'static {
    fn describe() -> EntityDecl;
}

///
/// REGISTRY
/// Built schemas keyed by the describing type. Never invalidated.
///

static REGISTRY: LazyLock<RwLock<HashMap<TypeId, Arc<Schema>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Schema of `T`, built on first use.
///
/// The build runs outside the registry lock so nested and relation members
/// can resolve their own schemas. Failed builds are not cached.
pub fn schema_for<T: Describe>() -> Result<Arc<Schema>, Error> {
    let id = TypeId::of::<T>();

    {
        let registry = REGISTRY
            .read()
            .map_err(|_| Error::poisoned(ErrorOrigin::Schema, "schema registry"))?;
        if let Some(schema) = registry.get(&id) {
            return Ok(Arc::clone(schema));
        }
    }

    let schema = Arc::new(build_schema(T::describe())?);

    let mut registry = REGISTRY
        .write()
        .map_err(|_| Error::poisoned(ErrorOrigin::Schema, "schema registry"))?;

    // a concurrent build of the same type may have won; keep the first
    Ok(Arc::clone(registry.entry(id).or_insert(schema)))
}

/// Schema of an entity type, with its factory bound.
pub fn entity_schema<T: EntityType>() -> Result<Arc<Schema>, Error> {
    let schema = schema_for::<T>()?;
    schema.bind_factory(T::factory);

    Ok(schema)
}
