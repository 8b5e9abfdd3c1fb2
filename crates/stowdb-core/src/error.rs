use crate::{
    build::SchemaError, cache::CacheError, config::ConfigError, entity::EntityError,
    relation::RelationError, serialize::SerializeError, store::StoreError,
    validate::ValidateError, value::UnsupportedError,
};
use std::fmt;
use thiserror::Error as ThisError;

///
/// Error
///
/// Structured runtime error with a stable classification.
/// Every engine operation surfaces this type; the typed cause (when one
/// exists) is carried in `detail` and always matches `origin`.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct Error {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    pub detail: Option<ErrorDetail>,
}

impl Error {
    /// Construct an Error without structured detail.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    fn with_detail(class: ErrorClass, origin: ErrorOrigin, detail: ErrorDetail) -> Self {
        Self {
            class,
            origin,
            message: detail.to_string(),
            detail: Some(detail),
        }
    }

    /// Construct an invariant violation for a specific origin.
    pub(crate) fn invariant(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, origin, message)
    }

    /// Construct a corruption error for a specific origin.
    pub(crate) fn corruption(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Corruption, origin, message)
    }

    /// Construct an unsupported-operation error for a specific origin.
    pub(crate) fn unsupported(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, origin, message)
    }

    /// Construct a wrapper-origin corruption error naming the field.
    pub(crate) fn wrapper_corruption(entity: &str, field: &str, message: impl fmt::Display) -> Self {
        Self::corruption(
            ErrorOrigin::Wrapper,
            format!("field '{entity}.{field}': {message}"),
        )
    }

    /// Construct a poisoned-lock error for a specific origin.
    pub(crate) fn poisoned(origin: ErrorOrigin, what: &str) -> Self {
        Self::invariant(origin, format!("{what} lock poisoned"))
    }

    #[must_use]
    pub const fn is_schema(&self) -> bool {
        matches!(self.class, ErrorClass::Schema)
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self.class, ErrorClass::Validation)
    }

    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self.class, ErrorClass::Unsupported)
    }

    #[must_use]
    pub const fn schema_error(&self) -> Option<&SchemaError> {
        match &self.detail {
            Some(ErrorDetail::Schema(err)) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub const fn validate_error(&self) -> Option<&ValidateError> {
        match &self.detail {
            Some(ErrorDetail::Validate(err)) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub const fn cache_error(&self) -> Option<&CacheError> {
        match &self.detail {
            Some(ErrorDetail::Cache(err)) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`Error`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Schema(SchemaError),

    #[error("{0}")]
    Validate(ValidateError),

    #[error("{0}")]
    Cache(CacheError),

    #[error("{0}")]
    Entity(EntityError),

    #[error("{0}")]
    Relation(RelationError),

    #[error("{0}")]
    Store(StoreError),

    #[error("{0}")]
    Unsupported(UnsupportedError),

    #[error("{0}")]
    Serialize(SerializeError),

    #[error("{0}")]
    Config(ConfigError),
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Self::with_detail(ErrorClass::Schema, ErrorOrigin::Schema, ErrorDetail::Schema(err))
    }
}

impl From<ValidateError> for Error {
    fn from(err: ValidateError) -> Self {
        Self::with_detail(
            ErrorClass::Validation,
            ErrorOrigin::Validate,
            ErrorDetail::Validate(err),
        )
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        let class = err.class();
        Self::with_detail(class, ErrorOrigin::Cache, ErrorDetail::Cache(err))
    }
}

impl From<EntityError> for Error {
    fn from(err: EntityError) -> Self {
        let (class, origin) = err.classify();
        Self::with_detail(class, origin, ErrorDetail::Entity(err))
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        let class = err.class();
        Self::with_detail(class, ErrorOrigin::Relation, ErrorDetail::Relation(err))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        let class = err.class();
        Self::with_detail(class, ErrorOrigin::Store, ErrorDetail::Store(err))
    }
}

impl From<UnsupportedError> for Error {
    fn from(err: UnsupportedError) -> Self {
        let origin = err.origin();
        Self::with_detail(
            ErrorClass::Unsupported,
            origin,
            ErrorDetail::Unsupported(err),
        )
    }
}

impl From<SerializeError> for Error {
    fn from(err: SerializeError) -> Self {
        Self::with_detail(
            ErrorClass::Internal,
            ErrorOrigin::Serialize,
            ErrorDetail::Serialize(err),
        )
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::with_detail(ErrorClass::Config, ErrorOrigin::Config, ErrorDetail::Config(err))
    }
}

///
/// ErrorClass
/// Error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Schema,
    Validation,
    Transaction,
    Unsupported,
    Construction,
    NotFound,
    Conflict,
    Config,
    Corruption,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Schema => "schema",
            Self::Validation => "validation",
            Self::Transaction => "transaction",
            Self::Unsupported => "unsupported",
            Self::Construction => "construction",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Config => "config",
            Self::Corruption => "corruption",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Schema,
    Wrapper,
    Validate,
    Entity,
    Factory,
    Cache,
    Relation,
    Transaction,
    Store,
    Serialize,
    Crypto,
    Config,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Schema => "schema",
            Self::Wrapper => "wrapper",
            Self::Validate => "validate",
            Self::Entity => "entity",
            Self::Factory => "factory",
            Self::Cache => "cache",
            Self::Relation => "relation",
            Self::Transaction => "transaction",
            Self::Store => "store",
            Self::Serialize => "serialize",
            Self::Crypto => "crypto",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}
