//! Field wrapper pipeline.
//!
//! Each field owns an ordered `WrapperChain`. Writes run stages outer → inner,
//! reads run them inner → outer. Lazy-load and transactional stages carry
//! per-record state and are realised as a `slot::Cell` tree; every other stage
//! is a pure value transform.

mod crypto;
mod inner;
pub(crate) mod slot;
mod trim;
mod values;


pub use crypto::Crypto;
pub use inner::InnerSchema;
pub use trim::{Trim, TrimSide};
pub use values::{ValueMap, ValueMapping};

use crate::{
    crypto::KeyDescriptor,
    entity::Services,
    error::Error,
    model::Schema,
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

///
/// WrapperKind
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum WrapperKind {
    Nullable,
    LazyLoad,
    Transactional,
    Crypto,
    Values,
    Trim,
    Inner,
}

impl WrapperKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nullable => "nullable",
            Self::LazyLoad => "lazy_load",
            Self::Transactional => "transactional",
            Self::Crypto => "crypto",
            Self::Values => "values",
            Self::Trim => "trim",
            Self::Inner => "inner",
        }
    }

    /// Stages that keep per-record state instead of transforming values.
    #[must_use]
    pub const fn is_stateful(self) -> bool {
        matches!(self, Self::LazyLoad | Self::Transactional)
    }
}

impl fmt::Display for WrapperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

///
/// Nullable
///
/// Maps `Null` to an optional store sentinel and back.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Nullable {
    pub sentinel: Option<Value>,
}

impl Nullable {
    fn write(&self, value: Value) -> Value {
        match (value, &self.sentinel) {
            (Value::Null, Some(sentinel)) => sentinel.clone(),
            (value, _) => value,
        }
    }

    fn read(&self, raw: Value) -> Value {
        match &self.sentinel {
            Some(sentinel) if *sentinel == raw => Value::Null,
            _ => raw,
        }
    }
}

///
/// Wrapper
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Wrapper {
    Nullable(Nullable),
    LazyLoad,
    Transactional,
    Crypto(Crypto),
    Values(ValueMap),
    Trim(Trim),
    Inner(InnerSchema),
}

impl Wrapper {
    #[must_use]
    pub const fn kind(&self) -> WrapperKind {
        match self {
            Self::Nullable(_) => WrapperKind::Nullable,
            Self::LazyLoad => WrapperKind::LazyLoad,
            Self::Transactional => WrapperKind::Transactional,
            Self::Crypto(_) => WrapperKind::Crypto,
            Self::Values(_) => WrapperKind::Values,
            Self::Trim(_) => WrapperKind::Trim,
            Self::Inner(_) => WrapperKind::Inner,
        }
    }

    /// Outer → inner transform. Stateful stages pass values through; their
    /// behavior lives in the slot cells.
    pub(crate) fn write(&self, cx: &WrapContext<'_>, value: Value) -> Result<Value, Error> {
        match self {
            Self::Nullable(n) => Ok(n.write(value)),
            Self::LazyLoad | Self::Transactional | Self::Trim(_) => Ok(value),
            Self::Crypto(c) => c.write(cx, value),
            Self::Values(map) => map.write(cx, value),
            Self::Inner(inner) => inner.write(cx, value),
        }
    }

    /// Inner → outer transform.
    pub(crate) fn read(&self, cx: &WrapContext<'_>, raw: Value) -> Result<Value, Error> {
        match self {
            Self::Nullable(n) => Ok(n.read(raw)),
            Self::LazyLoad | Self::Transactional => Ok(raw),
            Self::Crypto(c) => c.read(cx, raw),
            Self::Values(map) => map.read(cx, raw),
            Self::Trim(trim) => Ok(trim.read(raw)),
            Self::Inner(inner) => inner.read(cx, raw),
        }
    }
}

///
/// WrapperDecl
///
/// A wrapper plus its optional relative order. Undeclared order defaults to
/// the declaration index.
///

#[derive(Clone, Debug)]
pub struct WrapperDecl {
    pub(crate) order: Option<i32>,
    pub(crate) wrapper: Wrapper,
}

impl WrapperDecl {
    #[must_use]
    pub const fn new(wrapper: Wrapper) -> Self {
        Self {
            order: None,
            wrapper,
        }
    }

    #[must_use]
    pub const fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub const fn nullable() -> Self {
        Self::new(Wrapper::Nullable(Nullable { sentinel: None }))
    }

    #[must_use]
    pub const fn nullable_sentinel(sentinel: Value) -> Self {
        Self::new(Wrapper::Nullable(Nullable {
            sentinel: Some(sentinel),
        }))
    }

    #[must_use]
    pub const fn lazy() -> Self {
        Self::new(Wrapper::LazyLoad)
    }

    #[must_use]
    pub const fn transactional() -> Self {
        Self::new(Wrapper::Transactional)
    }

    #[must_use]
    pub const fn encrypted(key: KeyDescriptor) -> Self {
        Self::new(Wrapper::Crypto(Crypto { key }))
    }

    #[must_use]
    pub const fn values(map: ValueMap) -> Self {
        Self::new(Wrapper::Values(map))
    }

    #[must_use]
    pub const fn trim(side: TrimSide) -> Self {
        Self::new(Wrapper::Trim(Trim { side }))
    }

    pub(crate) fn inner(schema: Arc<Schema>, renames: BTreeMap<String, String>) -> Self {
        Self::new(Wrapper::Inner(InnerSchema { schema, renames }))
    }
}

///
/// Stage
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Stage {
    pub order: i32,
    pub wrapper: Wrapper,
}

///
/// WrapperChain
/// Stages sorted outermost first.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct WrapperChain {
    stages: Vec<Stage>,
}

impl WrapperChain {
    /// Sort declarations by relative order; ties keep declaration order.
    #[must_use]
    pub fn from_decls(decls: Vec<WrapperDecl>) -> Self {
        let mut stages: Vec<Stage> = decls
            .into_iter()
            .enumerate()
            .map(|(index, decl)| Stage {
                order: decl
                    .order
                    .unwrap_or_else(|| i32::try_from(index).unwrap_or(i32::MAX)),
                wrapper: decl.wrapper,
            })
            .collect();
        stages.sort_by_key(|stage| stage.order);

        Self { stages }
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn kinds(&self) -> impl Iterator<Item = WrapperKind> + '_ {
        self.stages.iter().map(|s| s.wrapper.kind())
    }

    #[must_use]
    pub fn contains(&self, kind: WrapperKind) -> bool {
        self.kinds().any(|k| k == kind)
    }

    #[must_use]
    pub fn is_stateless(&self) -> bool {
        !self.kinds().any(WrapperKind::is_stateful)
    }

    #[must_use]
    pub fn inner(&self) -> Option<&InnerSchema> {
        self.stages.iter().find_map(|s| match &s.wrapper {
            Wrapper::Inner(inner) => Some(inner),
            _ => None,
        })
    }

    #[must_use]
    pub fn values(&self) -> Option<&ValueMap> {
        self.stages.iter().find_map(|s| match &s.wrapper {
            Wrapper::Values(map) => Some(map),
            _ => None,
        })
    }

    /// Run every stage's write transform, outer → inner.
    pub(crate) fn write_stateless(&self, cx: &WrapContext<'_>, value: Value) -> Result<Value, Error> {
        self.stages
            .iter()
            .try_fold(value, |value, stage| stage.wrapper.write(cx, value))
    }

    /// Run every stage's read transform, inner → outer.
    pub(crate) fn read_stateless(&self, cx: &WrapContext<'_>, raw: Value) -> Result<Value, Error> {
        self.stages
            .iter()
            .rev()
            .try_fold(raw, |value, stage| stage.wrapper.read(cx, value))
    }
}

///
/// WrapContext
/// Names and services visible to stage transforms.
///

#[derive(Clone, Copy)]
pub(crate) struct WrapContext<'a> {
    pub(crate) entity: &'a str,
    pub(crate) field: &'a str,
    pub(crate) services: &'a Services,
}
