use crate::{
    build::Describe,
    entity::{CachedEntity, EntityError, EntityRecord, EntityType, Services, Synthesized},
    error::Error,
    key::Key,
    model::{Row, Schema},
    store::Store,
};
use std::{any::Any, marker::PhantomData, sync::Arc};

///
/// EntityFactory
///
/// Turns a fresh record into a live instance of the concrete entity type.
///

pub trait EntityFactory: Send + Sync {
    fn create(&self, record: EntityRecord) -> Result<Arc<dyn Any + Send + Sync>, Error>;

    /// True when the factory materializes declared defaults itself.
    fn full_initialization(&self) -> bool {
        false
    }

    fn type_name(&self) -> &'static str;
}

///
/// TypedFactory
///

pub struct TypedFactory<T>(PhantomData<fn() -> T>);

impl<T> TypedFactory<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EntityType> EntityFactory for TypedFactory<T> {
    fn create(&self, record: EntityRecord) -> Result<Arc<dyn Any + Send + Sync>, Error> {
        if record.schema().is_abstract() {
            return Err(EntityError::NotInstantiable {
                entity: record.schema().name().to_string(),
                reason: "type is declared abstract".to_string(),
            }
            .into());
        }

        Ok(Arc::new(T::from_record(record)))
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

///
/// SynthesizedFactory
/// Builds `Synthesized<M>` for any declaration, abstract or not.
///

pub struct SynthesizedFactory<M>(PhantomData<fn() -> M>);

impl<M> SynthesizedFactory<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<M> Default for SynthesizedFactory<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Describe> EntityFactory for SynthesizedFactory<M> {
    fn create(&self, record: EntityRecord) -> Result<Arc<dyn Any + Send + Sync>, Error> {
        Ok(Arc::new(Synthesized::<M>::from_record(record)))
    }

    fn full_initialization(&self) -> bool {
        true
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Synthesized<M>>()
    }
}

/// Create a new instance for `schema` through its bound factory.
///
/// Returns the instance and whether declared defaults were already applied.
pub(crate) fn instantiate(
    schema: &Arc<Schema>,
    services: &Services,
) -> Result<(CachedEntity, bool), Error> {
    let factory = bound_factory(schema)?;

    let record = EntityRecord::new(Arc::clone(schema), services.clone());
    let any = factory.create(record.clone())?;

    let initialized = factory.full_initialization() || schema.full_initialization();
    if initialized {
        record.apply_defaults()?;
    }

    Ok((CachedEntity { any, record }, initialized))
}

/// Instance for a stored row. Committed state comes from the row; declared
/// defaults are never applied.
pub(crate) fn materialize(
    schema: &Arc<Schema>,
    services: &Services,
    row: &Row,
    key: Key,
    store: Arc<dyn Store>,
) -> Result<CachedEntity, Error> {
    let factory = bound_factory(schema)?;

    let record = EntityRecord::new(Arc::clone(schema), services.clone());
    record.hydrate(row, key, store)?;
    let any = factory.create(record.clone())?;

    Ok(CachedEntity { any, record })
}

fn bound_factory(schema: &Schema) -> Result<&Arc<dyn EntityFactory>, Error> {
    schema.factory().ok_or_else(|| {
        EntityError::NotInstantiable {
            entity: schema.name().to_string(),
            reason: "no factory is bound to the schema".to_string(),
        }
        .into()
    })
}
