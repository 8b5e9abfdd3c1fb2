use crate::{
    MAX_NAME_LEN, MAX_NESTING_DEPTH,
    build::{EntityDecl, MemberDecl, SchemaError, SearchStrategy, decl::MemberShape},
    error::Error,
    model::{Field, FieldRole, Identity, RelationModel, Schema, SchemaKind},
    validate::Validator,
    value::{OperatorRegistry, Value, ValueKind},
    wrapper::{WrapperChain, WrapperDecl, WrapperKind},
};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

///
/// Merged
/// A member after inheritance resolution.
///

struct Merged {
    member: MemberDecl,
    suppressed: bool,
}

///
/// Builder
///

struct Builder<'a> {
    entity: &'a str,
    kind: SchemaKind,
    operators: OperatorRegistry,
}

/// Build a schema from a declaration without touching the registry.
pub fn build_schema(decl: EntityDecl) -> Result<Schema, Error> {
    let entity = decl.name.clone();
    let display_name = decl.display_name.clone().unwrap_or_else(|| entity.clone());
    let kind = decl.kind;
    let search = decl.search;
    let is_abstract = decl.is_abstract;
    let full_initialization = decl.full_initialization;

    let builder = Builder {
        entity: &entity,
        kind,
        operators: OperatorRegistry::with_defaults(),
    };
    builder.check_name(&entity)?;

    let merged = builder.merge(levels(decl), search)?;
    let suppressed: Vec<String> = merged
        .iter()
        .filter(|m| m.suppressed)
        .map(|m| m.member.name.clone())
        .collect();

    let mut fields = Vec::with_capacity(merged.len());
    for member in merged {
        if let Some(field) = builder.field(member)? {
            fields.push(field);
        }
    }

    builder.check_columns(&mut fields)?;
    let identity = builder.identity(&fields)?;

    let schema = Schema::new(
        entity,
        display_name,
        kind,
        fields,
        identity,
        suppressed,
        is_abstract,
        full_initialization,
    );
    tracing::debug!(
        entity = %schema.name(),
        fields = schema.field_count(),
        relations = schema.relations().count(),
        "schema built"
    );

    Ok(schema)
}

// declaration chain, base first
fn levels(decl: EntityDecl) -> Vec<EntityDecl> {
    let mut levels = Vec::new();
    let mut next = Some(decl);

    while let Some(mut level) = next {
        next = level.base.take().map(|base| *base);
        levels.push(level);
    }
    levels.reverse();

    levels
}

impl Builder<'_> {
    fn merge(&self, levels: Vec<EntityDecl>, search: SearchStrategy) -> Result<Vec<Merged>, SchemaError> {
        let mut merged: Vec<Merged> = Vec::new();

        for level in levels {
            let mut declared = BTreeSet::new();

            for member in level.members {
                if !declared.insert(member.name.clone()) {
                    return Err(SchemaError::DuplicateMember {
                        entity: self.entity.to_string(),
                        member: member.name,
                    });
                }
                if !search.admits(&member) {
                    continue;
                }

                // most-derived declaration wins, in place
                let entry = Merged {
                    member,
                    suppressed: false,
                };
                match merged
                    .iter_mut()
                    .find(|m| m.member.name == entry.member.name)
                {
                    Some(slot) => *slot = entry,
                    None => merged.push(entry),
                }
            }

            for name in level.ignored {
                let inherited = merged
                    .iter_mut()
                    .find(|m| m.member.name == name && !declared.contains(&name));
                match inherited {
                    Some(m) => m.suppressed = true,
                    None => {
                        return Err(SchemaError::UnknownIgnore {
                            entity: self.entity.to_string(),
                            member: name,
                        });
                    }
                }
            }
        }

        Ok(merged)
    }

    fn field(&self, merged: Merged) -> Result<Option<Field>, Error> {
        let Merged { member, suppressed } = merged;
        self.check_name(&member.name)?;

        if let Some(message) = member.invalid_patterns.first() {
            return Err(SchemaError::InvalidPattern {
                entity: self.entity.to_string(),
                field: member.name.clone(),
                message: message.clone(),
            }
            .into());
        }

        if member.identity {
            if self.kind == SchemaKind::ValueObject {
                return Err(SchemaError::IdentityOnValueObject {
                    entity: self.entity.to_string(),
                    field: member.name,
                }
                .into());
            }
            if member.ignored {
                return Err(self.bad_identity(&member.name, "member is ignored").into());
            }
            if suppressed {
                return Err(self.bad_identity(&member.name, "member is suppressed").into());
            }
        }

        if member.ignored {
            return Ok(None);
        }

        let storage_name = member
            .storage_name
            .clone()
            .unwrap_or_else(|| member.name.clone());
        self.check_name(&storage_name)?;

        let mut seen = BTreeSet::new();
        for decl in &member.wrappers {
            let kind = decl.wrapper.kind();
            if !seen.insert(kind) {
                return Err(SchemaError::DuplicateWrapper {
                    entity: self.entity.to_string(),
                    field: member.name,
                    wrapper: kind,
                }
                .into());
            }
        }

        let role = if suppressed {
            FieldRole::Hidden
        } else {
            FieldRole::Column
        };

        let (kind, wrappers) = match member.shape.clone() {
            MemberShape::Scalar(kind) => (kind, member.wrappers.clone()),

            MemberShape::Nested { schema, renames } => {
                let inner = schema()?;
                self.check_nested(&member.name, &inner, &renames)?;

                let mut wrappers = member.wrappers.clone();
                wrappers.push(WrapperDecl::inner(inner, renames));
                (ValueKind::Record, wrappers)
            }

            MemberShape::Relation { child, foreign_key } => {
                if suppressed {
                    return Ok(None);
                }
                if member.identity {
                    return Err(self.bad_identity(&member.name, "relations own no column").into());
                }

                let child = child()?;
                if !child.columns().contains(&foreign_key) {
                    return Err(SchemaError::UnknownForeignKey {
                        entity: self.entity.to_string(),
                        field: member.name,
                        child: child.name().to_string(),
                        foreign_key,
                    }
                    .into());
                }

                return Ok(Some(Field {
                    name: member.name,
                    storage_name,
                    kind: ValueKind::Record,
                    role: FieldRole::Relation(RelationModel { child, foreign_key }),
                    read_only: member.read_only,
                    identity: false,
                    is_abstract: member.is_abstract,
                    default: Value::Null,
                    chain: WrapperChain::default(),
                    validators: Vec::new(),
                }));
            }
        };

        let chain = WrapperChain::from_decls(wrappers);
        if let Some(map) = chain.values() {
            map.check(self.entity, &member.name, kind)?;
        }
        self.check_default(&member, kind, &chain)?;
        self.check_validators(&member, kind)?;

        let field = Field {
            name: member.name,
            storage_name,
            kind,
            role,
            read_only: member.read_only,
            identity: member.identity,
            is_abstract: member.is_abstract,
            default: member.default,
            chain,
            validators: member.validators,
        };
        if field.identity {
            self.check_identity_field(&field)?;
        }

        Ok(Some(field))
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    fn check_name(&self, name: &str) -> Result<(), SchemaError> {
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name.len() > MAX_NAME_LEN {
            Some("name is longer than 64 characters")
        } else if !is_identifier(name) {
            Some("name is not an ASCII identifier")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(SchemaError::InvalidName {
                entity: self.entity.to_string(),
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn check_nested(
        &self,
        field: &str,
        inner: &Schema,
        renames: &BTreeMap<String, String>,
    ) -> Result<(), SchemaError> {
        if 1 + nesting_depth(inner) > MAX_NESTING_DEPTH {
            return Err(SchemaError::NestingTooDeep {
                entity: self.entity.to_string(),
                field: field.to_string(),
            });
        }

        for inner_field in inner.column_fields() {
            if let Some(wrapper) = inner_field.chain().kinds().find(|k| k.is_stateful()) {
                return Err(SchemaError::StatefulNestedWrapper {
                    entity: self.entity.to_string(),
                    field: format!("{field}.{}", inner_field.name()),
                    wrapper,
                });
            }
        }

        let columns = inner.columns();
        if let Some(column) = renames.keys().find(|c| !columns.contains(c)) {
            return Err(SchemaError::UnknownRename {
                entity: self.entity.to_string(),
                field: field.to_string(),
                column: column.clone(),
            });
        }

        Ok(())
    }

    fn check_default(
        &self,
        member: &MemberDecl,
        kind: ValueKind,
        chain: &WrapperChain,
    ) -> Result<(), SchemaError> {
        if !member.default.conforms_to(kind) {
            return Err(SchemaError::DefaultKindMismatch {
                entity: self.entity.to_string(),
                field: member.name.clone(),
                default: member.default.to_string(),
                expected: kind,
            });
        }

        if let Some(map) = chain.values()
            && !member.default.is_null()
            && !map.contains(&member.default)
        {
            return Err(SchemaError::DefaultNotInValueSet {
                entity: self.entity.to_string(),
                field: member.name.clone(),
                default: member.default.to_string(),
            });
        }

        Ok(())
    }

    fn check_validators(&self, member: &MemberDecl, kind: ValueKind) -> Result<(), SchemaError> {
        for validator in &member.validators {
            if !validator.applies_to(kind) {
                return Err(SchemaError::ValidatorKindMismatch {
                    entity: self.entity.to_string(),
                    field: member.name.clone(),
                    validator: validator.name(),
                    kind,
                });
            }

            if let Validator::Range {
                min: Some(min),
                max: Some(max),
            } = validator
                && matches!(self.operators.compare(min, max), Ok(Ordering::Greater))
            {
                return Err(SchemaError::InvalidRange {
                    entity: self.entity.to_string(),
                    field: member.name.clone(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }

        Ok(())
    }

    fn check_identity_field(&self, field: &Field) -> Result<(), SchemaError> {
        let stateful = [WrapperKind::LazyLoad, WrapperKind::Transactional, WrapperKind::Crypto];
        if let Some(wrapper) = stateful.into_iter().find(|k| field.chain().contains(*k)) {
            return Err(self.bad_identity(
                field.name(),
                &format!("identity cannot carry wrapper '{wrapper}'"),
            ));
        }

        let keyless = match field.nested() {
            Some(inner) => inner
                .schema
                .column_fields()
                .find(|f| !is_key_kind(f.kind()))
                .map(|f| f.kind()),
            None => (!is_key_kind(field.kind())).then_some(field.kind()),
        };
        if let Some(kind) = keyless {
            return Err(self.bad_identity(
                field.name(),
                &format!("kind '{kind}' has no key form"),
            ));
        }

        Ok(())
    }

    // live columns must be unique; hidden columns yield to live ones
    fn check_columns(&self, fields: &mut Vec<Field>) -> Result<(), SchemaError> {
        let mut owners = BTreeSet::new();
        for field in fields.iter().filter(|f| matches!(f.role, FieldRole::Column)) {
            for column in field.columns() {
                if !owners.insert(column.clone()) {
                    return Err(SchemaError::DuplicateField {
                        entity: self.entity.to_string(),
                        storage_name: column,
                    });
                }
            }
        }

        fields.retain(|field| {
            if !field.is_hidden() {
                return true;
            }
            let columns = field.columns();
            let free = columns.iter().all(|c| !owners.contains(c));
            if free {
                owners.extend(columns);
            }
            free
        });

        let live = fields
            .iter()
            .filter(|f| matches!(f.role, FieldRole::Column))
            .count();
        if live == 0 {
            return Err(SchemaError::Empty {
                entity: self.entity.to_string(),
            });
        }

        Ok(())
    }

    fn identity(&self, fields: &[Field]) -> Result<Option<Identity>, SchemaError> {
        let names: Vec<String> = fields
            .iter()
            .filter(|f| f.identity)
            .map(|f| f.name.clone())
            .collect();

        match (self.kind, names.is_empty()) {
            (SchemaKind::Entity, true) => Err(SchemaError::MissingIdentity {
                entity: self.entity.to_string(),
            }),
            (SchemaKind::Entity, false) => Ok(Some(Identity { fields: names })),
            (SchemaKind::ValueObject, _) => Ok(None),
        }
    }

    fn bad_identity(&self, field: &str, reason: &str) -> SchemaError {
        SchemaError::InconsistentIdentity {
            entity: self.entity.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();

    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

const fn is_key_kind(kind: ValueKind) -> bool {
    matches!(
        kind,
        ValueKind::Int
            | ValueKind::Uint
            | ValueKind::Text
            | ValueKind::Char
            | ValueKind::Ulid
            | ValueKind::Date
    )
}

fn nesting_depth(schema: &Schema) -> usize {
    schema
        .column_fields()
        .filter_map(Field::nested)
        .map(|inner| 1 + nesting_depth(&inner.schema))
        .max()
        .unwrap_or(0)
}
