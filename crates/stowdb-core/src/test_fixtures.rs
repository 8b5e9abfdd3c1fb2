//! Shared entity declarations and helpers for unit tests.

use crate::{
    build::{Describe, EntityDecl, MemberDecl},
    cache::TransactionalCache,
    config::EngineConfig,
    crypto::KeyDescriptor,
    entity::{Entity, EntityRecord, EntityType},
    error::Error,
    obs::{EngineEvent, EventSink},
    store::{CommandKind, MemoryStore},
    tx::TxContext,
    validate::Validator,
    value::ValueKind,
    wrapper::{TrimSide, ValueMap},
};
use std::sync::{Arc, Mutex};

pub const FIXTURE_KEY: &[u8] = b"fixture key material, 32 bytes!!";

///
/// record_entity
/// Record-backed entity type with no hand-written state.
///

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

// ---------------------------------------------------------------------------
// Value objects
// ---------------------------------------------------------------------------

pub struct Point;

impl Describe for Point {
    fn describe() -> EntityDecl {
        EntityDecl::value_object("Point")
            .member(MemberDecl::field("x", ValueKind::Int))
            .member(MemberDecl::field("y", ValueKind::Int))
    }
}

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

record_entity!(Person);

impl Person {
    pub fn name(&self, ctx: &TxContext) -> Result<Option<String>, Error> {
        self.record.get_as(ctx, "name")
    }

    pub fn set_name(&self, ctx: &TxContext, name: &str) -> Result<(), Error> {
        self.record.set(ctx, "name", name)
    }

    pub fn balance(&self, ctx: &TxContext) -> Result<i64, Error> {
        self.record.get_as(ctx, "balance")
    }

    pub fn set_balance(&self, ctx: &TxContext, balance: i64) -> Result<(), Error> {
        self.record.set(ctx, "balance", balance)
    }
}

impl Describe for Person {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Person")
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(
                MemberDecl::property("name", ValueKind::Text)
                    .trim(TrimSide::Both)
                    .validate(Validator::length(None, Some(40))),
            )
            .member(
                MemberDecl::property("mood", ValueKind::Text)
                    .values(
                        ValueMap::new()
                            .value("calm")
                            .value_as("angry", "A")
                            .default_value("calm"),
                    )
                    .default("calm"),
            )
            .member(MemberDecl::property("bio", ValueKind::Text).lazy())
            .member(
                MemberDecl::property("balance", ValueKind::Int)
                    .transactional()
                    .default(0i64),
            )
            .member(
                MemberDecl::property("secret", ValueKind::Text)
                    .encrypted(KeyDescriptor::Inline(FIXTURE_KEY.to_vec())),
            )
            .member(MemberDecl::nested::<Point>("home").rename("x", "home_x").rename("y", "home_y"))
    }
}

// ---------------------------------------------------------------------------
// Tag (caller-supplied text identity)
// ---------------------------------------------------------------------------

record_entity!(Tag);

impl Describe for Tag {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Tag")
            .member(MemberDecl::field("code", ValueKind::Text).identity().read_only())
            .member(MemberDecl::field("label", ValueKind::Text).nullable())
    }
}

// ---------------------------------------------------------------------------
// Order / Line
// ---------------------------------------------------------------------------

record_entity!(Order);

impl Order {
    pub fn lines(&self) -> Result<crate::relation::RelationManyList<Line>, Error> {
        self.record.relation("lines")
    }
}

impl Describe for Order {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Order")
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(MemberDecl::field("label", ValueKind::Text))
            .member(MemberDecl::relation::<Line>("lines", "order_id"))
    }
}

record_entity!(Line);

impl Describe for Line {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Line")
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(MemberDecl::field("order_id", ValueKind::Int))
            .member(MemberDecl::field("sku", ValueKind::Text))
            .member(MemberDecl::field("qty", ValueKind::Int).validate(Validator::range(1i64, 100i64)))
    }
}

// ---------------------------------------------------------------------------
// Inheritance
// ---------------------------------------------------------------------------

pub fn animal_decl() -> EntityDecl {
    EntityDecl::entity("Animal")
        .member(MemberDecl::field("id", ValueKind::Int).identity())
        .member(MemberDecl::field("name", ValueKind::Text))
        .member(MemberDecl::field("legs", ValueKind::Int).default(4i64))
}

record_entity!(Bird);

impl Describe for Bird {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Bird")
            .extends(animal_decl())
            .ignore_inherited("legs")
            .member(MemberDecl::field("wingspan", ValueKind::Int))
    }
}

// ---------------------------------------------------------------------------
// Abstract contract
// ---------------------------------------------------------------------------

pub struct Shape;

impl Describe for Shape {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Shape")
            .abstract_type()
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(MemberDecl::property("sides", ValueKind::Int).abstract_member().default(3i64))
    }
}

record_entity!(ConcreteShape);

impl Describe for ConcreteShape {
    fn describe() -> EntityDecl {
        Shape::describe()
    }
}

// ---------------------------------------------------------------------------
// Sink and caches
// ---------------------------------------------------------------------------

///
/// RecordingSink
///

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn commands(&self, kind: CommandKind) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, EngineEvent::Command { command } if command.kind == kind))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub cache: Arc<TransactionalCache>,
}

pub fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

pub fn fixture_with(config: EngineConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let cache = TransactionalCache::builder(store.clone())
        .config(config)
        .sink(sink.clone())
        .build()
        .unwrap();

    Fixture { store, sink, cache }
}

/// Persisted person with the given name.
pub fn saved_person(cache: &TransactionalCache, name: &str) -> Arc<Person> {
    let person = cache.new_entity::<Person>().unwrap();
    person.set_name(&TxContext::none(), name).unwrap();
    cache.create(&TxContext::none(), &person).unwrap();

    person
}

pub fn new_line(cache: &TransactionalCache, sku: &str, qty: i64) -> Arc<Line> {
    let line = cache.new_entity::<Line>().unwrap();
    let ctx = TxContext::none();
    line.record().set(&ctx, "sku", sku).unwrap();
    line.record().set(&ctx, "qty", qty).unwrap();

    line
}
