//! ## Crate layout
//! - `core`: the engine (values, schemas, wrappers, transactions, the
//!   identity cache, relations, stores and serialization).
//!
//! The `prelude` mirrors the surface used by application code: declaration
//! builders, entity traits, the cache and its transaction scopes.

pub use stowdb_core as core;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use crate::core::Error;

///
/// Prelude
/// using _ brings traits into scope and avoids name conflicts
///

pub mod prelude {
    pub use crate::core::{
        cache::TransactionalCache,
        config::EngineConfig,
        crypto::KeyDescriptor,
        prelude::*,
        store::{CommandKind, MemoryStore, Store as _},
        validate::Validator,
    };
}
