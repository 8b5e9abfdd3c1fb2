use crate::{value::ValueKind, wrapper::WrapperKind};
use thiserror::Error as ThisError;

///
/// SchemaError
///
/// Declaration problems detected while building a schema. Raised at build
/// time only; a schema that built successfully never produces these.
///

#[derive(Debug, ThisError)]
pub enum SchemaError {
    #[error("entity '{entity}' declares no persisted fields")]
    Empty { entity: String },

    #[error("entity '{entity}' maps more than one field to storage name '{storage_name}'")]
    DuplicateField { entity: String, storage_name: String },

    #[error("entity '{entity}' declares member '{member}' more than once")]
    DuplicateMember { entity: String, member: String },

    #[error("entity '{entity}' has no identity field")]
    MissingIdentity { entity: String },

    #[error("value object '{entity}' cannot declare identity field '{field}'")]
    IdentityOnValueObject { entity: String, field: String },

    #[error("identity field '{entity}.{field}' is invalid: {reason}")]
    InconsistentIdentity {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("invalid name '{name}' in '{entity}': {reason}")]
    InvalidName {
        entity: String,
        name: String,
        reason: &'static str,
    },

    #[error("field '{entity}.{field}' declares wrapper '{wrapper}' more than once")]
    DuplicateWrapper {
        entity: String,
        field: String,
        wrapper: WrapperKind,
    },

    #[error("field '{entity}.{field}' declares an empty value set")]
    EmptyValueSet { entity: String, field: String },

    #[error("field '{entity}.{field}' maps value {value}, expected kind '{expected}'")]
    ValueKindMismatch {
        entity: String,
        field: String,
        value: String,
        expected: ValueKind,
    },

    #[error("field '{entity}.{field}' maps value or source of {value} more than once")]
    DuplicateValueMapping {
        entity: String,
        field: String,
        value: String,
    },

    #[error("field '{entity}.{field}' default {default} is not a member of its value set")]
    DefaultNotInValueSet {
        entity: String,
        field: String,
        default: String,
    },

    #[error("field '{entity}.{field}' default {default} does not match kind '{expected}'")]
    DefaultKindMismatch {
        entity: String,
        field: String,
        default: String,
        expected: ValueKind,
    },

    #[error("validator '{validator}' cannot check field '{entity}.{field}' of kind '{kind}'")]
    ValidatorKindMismatch {
        entity: String,
        field: String,
        validator: &'static str,
        kind: ValueKind,
    },

    #[error("field '{entity}.{field}' has an invalid pattern: {message}")]
    InvalidPattern {
        entity: String,
        field: String,
        message: String,
    },

    #[error("field '{entity}.{field}' has range minimum {min} above maximum {max}")]
    InvalidRange {
        entity: String,
        field: String,
        min: String,
        max: String,
    },

    #[error("relation '{entity}.{field}' names foreign key '{foreign_key}' missing from '{child}'")]
    UnknownForeignKey {
        entity: String,
        field: String,
        child: String,
        foreign_key: String,
    },

    #[error("nested field '{entity}.{field}' renames unknown column '{column}'")]
    UnknownRename {
        entity: String,
        field: String,
        column: String,
    },

    #[error("nested field '{entity}.{field}' contains stateful wrapper '{wrapper}'")]
    StatefulNestedWrapper {
        entity: String,
        field: String,
        wrapper: WrapperKind,
    },

    #[error("nested field '{entity}.{field}' exceeds the maximum nesting depth")]
    NestingTooDeep { entity: String, field: String },

    #[error("entity '{entity}' ignores unknown inherited member '{member}'")]
    UnknownIgnore { entity: String, member: String },
}
