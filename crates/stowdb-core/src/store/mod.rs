//! Store contract consumed by the cache, plus the in-memory reference backend.

mod command;
mod memory;

#[cfg(test)]
mod tests;

pub use command::{Command, CommandKind, CommandRenderer, PlainRenderer};
pub use memory::MemoryStore;

use crate::{
    error::{Error, ErrorClass},
    key::Key,
    model::{Row, Schema},
};
use thiserror::Error as ThisError;

/// Owned row stream returned by `Store::read_all`.
pub type RowIter = Box<dyn Iterator<Item = Row> + Send>;

///
/// StoreError
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("duplicate key {key} for '{entity}'")]
    DuplicateKey { entity: String, key: Key },

    #[error("no row with key {key} for '{entity}'")]
    NotFound { entity: String, key: Key },

    #[error("row for '{entity}' has no identity and the store cannot assign one")]
    MissingIdentity { entity: String },
}

impl StoreError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateKey { .. } => ErrorClass::Conflict,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::MissingIdentity { .. } => ErrorClass::Validation,
        }
    }
}

///
/// Store
///
/// Persistence backend. Rows are flattened column maps; the schema supplies
/// the identity columns. Implementations must be safe to share between
/// threads and must not call back into the engine.
///

pub trait Store: Send + Sync {
    /// Insert a row and return its key. When the identity columns are null
    /// and the schema allows it, the store assigns the identity.
    fn create(&self, schema: &Schema, row: Row) -> Result<Key, Error>;

    fn read(&self, schema: &Schema, key: &Key) -> Result<Option<Row>, Error>;

    fn read_all(&self, schema: &Schema) -> Result<RowIter, Error>;

    /// Replace the given columns of an existing row.
    fn update(&self, schema: &Schema, key: &Key, row: Row) -> Result<(), Error>;

    /// Remove one row. Returns false when there was nothing to remove.
    fn delete(&self, schema: &Schema, key: &Key) -> Result<bool, Error>;

    /// Remove every row of the schema, returning how many were removed.
    fn delete_all(&self, schema: &Schema) -> Result<usize, Error>;

    fn count(&self, schema: &Schema) -> Result<usize, Error>;
}
