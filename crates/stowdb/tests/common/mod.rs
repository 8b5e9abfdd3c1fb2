//! Fixture schemas shared by the integration suites.
#![allow(dead_code)]

use std::sync::Arc;
use stowdb::{Error, prelude::*};

pub const VAULT_KEY: &[u8] = b"integration vault key material!!";

macro_rules! record_entity {
    ($ty:ident) => {
        #[derive(Debug)]
        pub struct $ty {
            record: EntityRecord,
        }

        impl Entity for $ty {
            fn record(&self) -> &EntityRecord {
                &self.record
            }
        }

        impl EntityType for $ty {
            fn from_record(record: EntityRecord) -> Self {
                Self { record }
            }
        }
    };
}

///
/// Location
///

pub struct Location;

impl Describe for Location {
    fn describe() -> EntityDecl {
        EntityDecl::value_object("Location")
            .member(MemberDecl::field("x", ValueKind::Int))
            .member(MemberDecl::field("y", ValueKind::Int))
    }
}

///
/// Employee
/// One member per wrapper kind.
///

record_entity!(Employee);

impl Employee {
    pub fn name(&self, ctx: &TxContext) -> Result<Option<String>, Error> {
        self.record.get_as(ctx, "name")
    }

    pub fn set_name(&self, ctx: &TxContext, name: &str) -> Result<(), Error> {
        self.record.set(ctx, "name", name)
    }

    pub fn salary(&self, ctx: &TxContext) -> Result<i64, Error> {
        self.record.get_as(ctx, "salary")
    }

    pub fn set_salary(&self, ctx: &TxContext, salary: i64) -> Result<(), Error> {
        self.record.set(ctx, "salary", salary)
    }

    pub fn set_location(&self, ctx: &TxContext, x: i64, y: i64) -> Result<(), Error> {
        self.record
            .set(ctx, "location", Value::record([("x", x), ("y", y)]))
    }
}

impl Describe for Employee {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Employee")
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(MemberDecl::field("department_id", ValueKind::Int).nullable())
            .member(MemberDecl::property("name", ValueKind::Text).trim(TrimSide::Both))
            .member(
                MemberDecl::property("status", ValueKind::Text)
                    .values(
                        ValueMap::new()
                            .value_as("active", "A")
                            .value_as("inactive", "I"),
                    )
                    .default("active"),
            )
            .member(
                MemberDecl::nested::<Location>("location")
                    .rename("x", "loc_x")
                    .rename("y", "loc_y"),
            )
            .member(MemberDecl::property("notes", ValueKind::Text).lazy())
            .member(
                MemberDecl::property("salary", ValueKind::Int)
                    .transactional()
                    .default(0i64)
                    .validate(Validator::range(0i64, Value::Null)),
            )
            .member(
                MemberDecl::property("ssn", ValueKind::Text)
                    .encrypted(KeyDescriptor::Inline(VAULT_KEY.to_vec())),
            )
    }
}

///
/// Department
///

record_entity!(Department);

impl Department {
    pub fn staff(&self) -> Result<RelationManyList<Employee>, Error> {
        self.record.relation("staff")
    }
}

impl Describe for Department {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Department")
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(MemberDecl::field("title", ValueKind::Text))
            .member(MemberDecl::relation::<Employee>("staff", "department_id"))
    }
}

///
/// Caption
/// Same text, three trim policies.
///

record_entity!(Caption);

impl Describe for Caption {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Caption")
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(MemberDecl::field("both", ValueKind::Text).trim(TrimSide::Both))
            .member(MemberDecl::field("start", ValueKind::Text).trim(TrimSide::Start))
            .member(MemberDecl::field("end", ValueKind::Text).trim(TrimSide::End))
    }
}

///
/// Vehicle / Bicycle
/// `Bicycle` suppresses `wheels` and reuses its column for `spokes`.
///

pub fn vehicle_decl() -> EntityDecl {
    EntityDecl::entity("Vehicle")
        .member(MemberDecl::field("id", ValueKind::Int).identity())
        .member(MemberDecl::field("model", ValueKind::Text))
        .member(MemberDecl::field("wheels", ValueKind::Int).default(4i64))
}

record_entity!(Bicycle);

impl Describe for Bicycle {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Bicycle")
            .extends(vehicle_decl())
            .ignore_inherited("wheels")
            .member(MemberDecl::field("spokes", ValueKind::Int).named("wheels"))
    }
}

///
/// Gadget
/// Abstract contract served by `Synthesized<Gadget>`.
///

pub struct Gadget;

impl Describe for Gadget {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Gadget")
            .abstract_type()
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(
                MemberDecl::property("power", ValueKind::Int)
                    .abstract_member()
                    .default(9i64),
            )
    }
}

///
/// Env
///

pub struct Env {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<TransactionalCache>,
}

impl Env {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = TransactionalCache::builder(store.clone())
            .config(config)
            .build()
            .unwrap();

        Self { store, cache }
    }

    pub fn employee(&self, name: &str) -> Arc<Employee> {
        let employee = self.cache.new_entity::<Employee>().unwrap();
        employee.set_name(&TxContext::none(), name).unwrap();

        employee
    }

    pub fn saved_employee(&self, name: &str) -> Arc<Employee> {
        let employee = self.employee(name);
        self.cache.create(&TxContext::none(), &employee).unwrap();

        employee
    }

    pub fn saved_department(&self, title: &str, staff: &[&str]) -> Arc<Department> {
        let ctx = TxContext::none();
        let department = self.cache.new_entity::<Department>().unwrap();
        department.record().set(&ctx, "title", title).unwrap();
        for name in staff {
            department.staff().unwrap().add(&ctx, &self.employee(name)).unwrap();
        }
        self.cache.create(&ctx, &department).unwrap();

        department
    }

    /// Stored row count of `T`.
    pub fn stored<T: EntityType>(&self) -> usize {
        self.store.count(&entity_schema::<T>().unwrap()).unwrap()
    }
}
