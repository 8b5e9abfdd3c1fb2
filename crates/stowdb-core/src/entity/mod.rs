//! Entity instances, their record backing, and construction.

mod factory;
mod record;
mod services;

#[cfg(test)]
mod tests;

pub use factory::{EntityFactory, SynthesizedFactory, TypedFactory};
pub use record::{EntityRecord, RecordStatus};
pub use services::Services;

pub(crate) use factory::{instantiate, materialize};
pub(crate) use record::RecordState;

use crate::{
    build::{Describe, EntityDecl, entity_schema},
    error::{Error, ErrorClass, ErrorOrigin},
    value::{Value, ValueKind},
};
use std::{any::Any, fmt, marker::PhantomData, ops::Deref, sync::Arc};
use thiserror::Error as ThisError;

///
/// EntityError
///

#[derive(Debug, ThisError)]
pub enum EntityError {
    #[error("entity '{entity}' has no field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("field '{entity}.{field}' is read-only once persisted")]
    ReadOnlyField { entity: String, field: String },

    #[error("field '{entity}.{field}' expects {expected}, got {value}")]
    TypeMismatch {
        entity: String,
        field: String,
        expected: String,
        value: Value,
    },

    #[error("entity '{entity}' was deleted")]
    Deleted { entity: String },

    #[error("entity '{entity}' cannot be instantiated: {reason}")]
    NotInstantiable { entity: String, reason: String },

    #[error("entity '{entity}' is not a '{expected}'")]
    WrongType {
        entity: String,
        expected: &'static str,
    },
}

impl EntityError {
    pub(crate) const fn classify(&self) -> (ErrorClass, ErrorOrigin) {
        match self {
            Self::UnknownField { .. } => (ErrorClass::NotFound, ErrorOrigin::Entity),
            Self::ReadOnlyField { .. } | Self::TypeMismatch { .. } => {
                (ErrorClass::Validation, ErrorOrigin::Entity)
            }
            Self::Deleted { .. } => (ErrorClass::Conflict, ErrorOrigin::Entity),
            Self::NotInstantiable { .. } => (ErrorClass::Construction, ErrorOrigin::Factory),
            Self::WrongType { .. } => (ErrorClass::Internal, ErrorOrigin::Entity),
        }
    }

    pub(crate) fn type_mismatch(entity: &str, field: &str, expected: ValueKind, value: Value) -> Self {
        Self::TypeMismatch {
            entity: entity.to_string(),
            field: field.to_string(),
            expected: expected.to_string(),
            value,
        }
    }
}

///
/// Entity
///
/// A live entity instance. Every entity owns the record that backs its
/// fields; typed accessors read and write through it.
///

pub trait Entity: Any + Send + Sync {
    fn record(&self) -> &EntityRecord;
}

///
/// EntityType
/// A concrete, describable entity type.
///

pub trait EntityType: Entity + Describe + Sized {
    fn from_record(record: EntityRecord) -> Self;

    fn factory() -> Arc<dyn EntityFactory> {
        Arc::new(TypedFactory::<Self>::new())
    }
}

///
/// Synthesized
///
/// Default backing for a declaration with no hand-written type, including
/// abstract contracts. Every member is served straight from the record.
///

pub struct Synthesized<M> {
    record: EntityRecord,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Describe> Entity for Synthesized<M> {
    fn record(&self) -> &EntityRecord {
        &self.record
    }
}

impl<M: Describe> Describe for Synthesized<M> {
    fn describe() -> EntityDecl {
        M::describe()
    }
}

impl<M: Describe> EntityType for Synthesized<M> {
    fn from_record(record: EntityRecord) -> Self {
        Self {
            record,
            _marker: PhantomData,
        }
    }

    fn factory() -> Arc<dyn EntityFactory> {
        Arc::new(SynthesizedFactory::<M>::new())
    }
}

impl<M> Deref for Synthesized<M> {
    type Target = EntityRecord;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

impl<M> fmt::Debug for Synthesized<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Synthesized").field(&self.record).finish()
    }
}

///
/// CachedEntity
/// Type-erased entity handle: the shared instance plus its record.
///

#[derive(Clone)]
pub(crate) struct CachedEntity {
    pub(crate) any: Arc<dyn Any + Send + Sync>,
    pub(crate) record: EntityRecord,
}

impl CachedEntity {
    pub(crate) fn of<T: Entity>(entity: &Arc<T>) -> Self {
        Self {
            any: Arc::clone(entity) as Arc<dyn Any + Send + Sync>,
            record: entity.record().clone(),
        }
    }

    pub(crate) fn downcast<T: Entity>(self) -> Result<Arc<T>, Error> {
        let entity = self.record.schema().name().to_string();

        self.any.downcast::<T>().map_err(|_| {
            EntityError::WrongType {
                entity,
                expected: std::any::type_name::<T>(),
            }
            .into()
        })
    }

    /// Same live instance (not merely equal values).
    pub(crate) fn is(&self, record: &EntityRecord) -> bool {
        self.record.id() == record.id()
    }
}

impl fmt::Debug for CachedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CachedEntity").field(&self.record).finish()
    }
}

/// Construct a standalone entity with default services, defaults applied.
pub fn create<T: EntityType>() -> Result<Arc<T>, Error> {
    let schema = entity_schema::<T>()?;
    let (entity, initialized) = instantiate(&schema, &Services::default())?;
    if !initialized {
        entity.record.apply_defaults()?;
    }

    entity.downcast()
}
