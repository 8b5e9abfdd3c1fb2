use crate::{
    build::{Describe, entity_schema, schema_for},
    crypto::KeyDescriptor,
    entity::EntityType,
    error::Error,
    model::{Schema, SchemaKind},
    validate::Validator,
    value::{Value, ValueKind},
    wrapper::{TrimSide, ValueMap, WrapperDecl},
};
use std::{collections::BTreeMap, sync::Arc};

/// Deferred schema lookup for nested and relation members.
pub(crate) type SchemaResolver = fn() -> Result<Arc<Schema>, Error>;

///
/// MemberFilter
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MemberFilter {
    Fields,
    Properties,
    #[default]
    All,
}

///
/// VisibilityFilter
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum VisibilityFilter {
    Public,
    NonPublic,
    #[default]
    All,
}

///
/// SearchStrategy
///
/// Which declared members take part in the schema. The most-derived
/// declaration's strategy applies to the whole inheritance chain.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SearchStrategy {
    pub members: MemberFilter,
    pub visibility: VisibilityFilter,
}

impl SearchStrategy {
    #[must_use]
    pub const fn new(members: MemberFilter, visibility: VisibilityFilter) -> Self {
        Self {
            members,
            visibility,
        }
    }

    pub(crate) const fn admits(&self, member: &MemberDecl) -> bool {
        let by_kind = match self.members {
            MemberFilter::Fields => !member.property,
            MemberFilter::Properties => member.property,
            MemberFilter::All => true,
        };
        let by_visibility = match self.visibility {
            VisibilityFilter::Public => !member.private,
            VisibilityFilter::NonPublic => member.private,
            VisibilityFilter::All => true,
        };

        by_kind && by_visibility
    }
}

///
/// MemberShape
///

#[derive(Clone, Debug)]
pub(crate) enum MemberShape {
    Scalar(ValueKind),
    Nested {
        schema: SchemaResolver,
        renames: BTreeMap<String, String>,
    },
    Relation {
        child: SchemaResolver,
        foreign_key: String,
    },
}

///
/// MemberDecl
///
/// One declared member of an entity or value object.
///

#[derive(Clone, Debug)]
pub struct MemberDecl {
    pub(crate) name: String,
    pub(crate) shape: MemberShape,
    pub(crate) property: bool,
    pub(crate) private: bool,
    pub(crate) storage_name: Option<String>,
    pub(crate) ignored: bool,
    pub(crate) identity: bool,
    pub(crate) read_only: bool,
    pub(crate) is_abstract: bool,
    pub(crate) default: Value,
    pub(crate) wrappers: Vec<WrapperDecl>,
    pub(crate) validators: Vec<Validator>,
    pub(crate) invalid_patterns: Vec<String>,
}

impl MemberDecl {
    fn new(name: &str, shape: MemberShape, property: bool) -> Self {
        Self {
            name: name.to_string(),
            shape,
            property,
            private: false,
            storage_name: None,
            ignored: false,
            identity: false,
            read_only: false,
            is_abstract: false,
            default: Value::Null,
            wrappers: Vec::new(),
            validators: Vec::new(),
            invalid_patterns: Vec::new(),
        }
    }

    #[must_use]
    pub fn property(name: &str, kind: ValueKind) -> Self {
        Self::new(name, MemberShape::Scalar(kind), true)
    }

    #[must_use]
    pub fn field(name: &str, kind: ValueKind) -> Self {
        Self::new(name, MemberShape::Scalar(kind), false)
    }

    /// Value-object member flattened into the parent's columns.
    #[must_use]
    pub fn nested<V: Describe>(name: &str) -> Self {
        Self::new(
            name,
            MemberShape::Nested {
                schema: schema_for::<V>,
                renames: BTreeMap::new(),
            },
            true,
        )
    }

    /// One-to-many relation to `C`, linked by the child's `foreign_key` column.
    #[must_use]
    pub fn relation<C: EntityType>(name: &str, foreign_key: &str) -> Self {
        Self::new(
            name,
            MemberShape::Relation {
                child: entity_schema::<C>,
                foreign_key: foreign_key.to_string(),
            },
            true,
        )
    }

    /// Store nested column `inner` under `column` in the parent.
    #[must_use]
    pub fn rename(mut self, inner: &str, column: &str) -> Self {
        if let MemberShape::Nested { renames, .. } = &mut self.shape {
            renames.insert(inner.to_string(), column.to_string());
        }
        self
    }

    #[must_use]
    pub const fn private(mut self) -> Self {
        self.private = true;
        self
    }

    #[must_use]
    pub fn named(mut self, storage_name: &str) -> Self {
        self.storage_name = Some(storage_name.to_string());
        self
    }

    #[must_use]
    pub const fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    #[must_use]
    pub const fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub const fn abstract_member(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    #[must_use]
    pub fn wrap(mut self, wrapper: WrapperDecl) -> Self {
        self.wrappers.push(wrapper);
        self
    }

    #[must_use]
    pub fn nullable(self) -> Self {
        self.wrap(WrapperDecl::nullable())
    }

    #[must_use]
    pub fn nullable_sentinel(self, sentinel: impl Into<Value>) -> Self {
        self.wrap(WrapperDecl::nullable_sentinel(sentinel.into()))
    }

    #[must_use]
    pub fn lazy(self) -> Self {
        self.wrap(WrapperDecl::lazy())
    }

    #[must_use]
    pub fn transactional(self) -> Self {
        self.wrap(WrapperDecl::transactional())
    }

    #[must_use]
    pub fn encrypted(self, key: KeyDescriptor) -> Self {
        self.wrap(WrapperDecl::encrypted(key))
    }

    #[must_use]
    pub fn values(self, map: ValueMap) -> Self {
        self.wrap(WrapperDecl::values(map))
    }

    #[must_use]
    pub fn trim(self, side: TrimSide) -> Self {
        self.wrap(WrapperDecl::trim(side))
    }

    #[must_use]
    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Pattern validator from source text; an invalid expression fails the
    /// schema build.
    #[must_use]
    pub fn pattern(mut self, source: &str) -> Self {
        match Validator::pattern(source) {
            Ok(validator) => self.validators.push(validator),
            Err(err) => self.invalid_patterns.push(err.to_string()),
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

///
/// EntityDecl
///
/// Declaration of an entity or value object: its members, its base
/// declaration, and the switches that shape the built schema.
///

#[derive(Clone, Debug)]
pub struct EntityDecl {
    pub(crate) name: String,
    pub(crate) display_name: Option<String>,
    pub(crate) kind: SchemaKind,
    pub(crate) base: Option<Box<Self>>,
    pub(crate) members: Vec<MemberDecl>,
    pub(crate) ignored: Vec<String>,
    pub(crate) search: SearchStrategy,
    pub(crate) is_abstract: bool,
    pub(crate) full_initialization: bool,
}

impl EntityDecl {
    fn new(name: &str, kind: SchemaKind) -> Self {
        Self {
            name: name.to_string(),
            display_name: None,
            kind,
            base: None,
            members: Vec::new(),
            ignored: Vec::new(),
            search: SearchStrategy::default(),
            is_abstract: false,
            full_initialization: false,
        }
    }

    #[must_use]
    pub fn entity(name: &str) -> Self {
        Self::new(name, SchemaKind::Entity)
    }

    #[must_use]
    pub fn value_object(name: &str) -> Self {
        Self::new(name, SchemaKind::ValueObject)
    }

    #[must_use]
    pub fn display_name(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }

    /// Inherit every member of `base`.
    #[must_use]
    pub fn extends(mut self, base: Self) -> Self {
        self.base = Some(Box::new(base));
        self
    }

    #[must_use]
    pub fn member(mut self, member: MemberDecl) -> Self {
        self.members.push(member);
        self
    }

    /// Suppress an inherited member at this level.
    #[must_use]
    pub fn ignore_inherited(mut self, member: &str) -> Self {
        self.ignored.push(member.to_string());
        self
    }

    #[must_use]
    pub const fn search(mut self, search: SearchStrategy) -> Self {
        self.search = search;
        self
    }

    #[must_use]
    pub const fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub const fn full_initialization(mut self, full: bool) -> Self {
        self.full_initialization = full;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
