use super::*;
use crate::{
    build::entity_schema,
    error::{ErrorDetail, ErrorOrigin},
    key::Key,
    model::Row,
    store::Store,
    test_fixtures::{Bird, ConcreteShape, Order, Person, Shape, Tag, fixture},
    tx::TxContext,
};

fn entity_err(err: &Error) -> &EntityError {
    match &err.detail {
        Some(ErrorDetail::Entity(err)) => err,
        other => panic!("expected entity detail, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn create_applies_declared_defaults() {
    let person = create::<Person>().unwrap();
    let ctx = TxContext::none();

    assert_eq!(person.record().get(&ctx, "mood").unwrap(), Value::from("calm"));
    assert_eq!(person.balance(&ctx).unwrap(), 0);
    assert_eq!(person.name(&ctx).unwrap(), None);
    assert_eq!(person.record().status(), RecordStatus::New);
    assert!(person.record().key().is_none());
}

#[test]
fn synthesized_entity_serves_an_abstract_contract() {
    let shape = create::<Synthesized<Shape>>().unwrap();
    let ctx = TxContext::none();

    assert!(shape.schema().is_abstract());
    assert_eq!(shape.get(&ctx, "sides").unwrap(), Value::Int(3));

    shape.set(&ctx, "sides", 5i64).unwrap();
    assert_eq!(shape.get_as::<i64>(&ctx, "sides").unwrap(), 5);
}

#[test]
fn typed_factory_rejects_abstract_declarations() {
    let err = create::<ConcreteShape>().unwrap_err();

    assert_eq!(err.class, ErrorClass::Construction);
    assert_eq!(err.origin, ErrorOrigin::Factory);
    assert!(matches!(entity_err(&err), EntityError::NotInstantiable { entity, .. } if entity == "Shape"));

    let fx = fixture();
    assert!(fx.cache.new_entity::<ConcreteShape>().is_err());
}

#[test]
fn instances_get_distinct_ids() {
    let a = create::<Tag>().unwrap();
    let b = create::<Tag>().unwrap();

    assert_ne!(a.record().id(), b.record().id());
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

#[test]
fn writes_must_conform_to_the_field_kind() {
    let person = create::<Person>().unwrap();
    let ctx = TxContext::none();

    let err = person.record().set(&ctx, "balance", "ten").unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(entity_err(&err), EntityError::TypeMismatch { field, .. } if field == "balance"));

    person.set_name(&ctx, "Ada").unwrap();
    let err = person.record().get_as::<i64>(&ctx, "name").unwrap_err();
    assert!(matches!(entity_err(&err), EntityError::TypeMismatch { .. }));
}

#[test]
fn unknown_and_relation_names_are_not_fields() {
    let order = create::<Order>().unwrap();
    let ctx = TxContext::none();

    let err = order.record().get(&ctx, "nope").unwrap_err();
    assert_eq!(err.class, ErrorClass::NotFound);

    let err = order.record().set(&ctx, "lines", Value::Null).unwrap_err();
    assert!(matches!(entity_err(&err), EntityError::UnknownField { field, .. } if field == "lines"));

    assert!(order.record().relation::<Tag>("missing").is_err());
}

#[test]
fn suppressed_member_reads_null_and_ignores_writes() {
    let bird = create::<Bird>().unwrap();
    let ctx = TxContext::none();

    assert_eq!(bird.record().get(&ctx, "legs").unwrap(), Value::Null);
    bird.record().set(&ctx, "legs", 2i64).unwrap();
    assert_eq!(bird.record().get(&ctx, "legs").unwrap(), Value::Null);
    assert!(bird.record().is_loaded("legs").unwrap());
}

#[test]
fn read_only_field_is_frozen_once_persisted() {
    let fx = fixture();
    let ctx = TxContext::none();
    let tag = fx.cache.new_entity::<Tag>().unwrap();

    tag.record().set(&ctx, "code", "draft").unwrap();
    tag.record().set(&ctx, "code", "red").unwrap();
    fx.cache.create(&ctx, &tag).unwrap();

    let err = tag.record().set(&ctx, "code", "blue").unwrap_err();
    assert!(matches!(entity_err(&err), EntityError::ReadOnlyField { field, .. } if field == "code"));
    assert_eq!(tag.record().key(), Some(Key::from("red")));

    tag.record().set(&ctx, "label", "Red").unwrap();
}

#[test]
fn deleted_entity_rejects_writes() {
    let fx = fixture();
    let ctx = TxContext::none();
    let tag = fx.cache.new_entity::<Tag>().unwrap();
    tag.record().set(&ctx, "code", "gone").unwrap();
    fx.cache.create(&ctx, &tag).unwrap();
    fx.cache.delete(&ctx, &tag).unwrap();

    assert!(tag.record().is_deleted());
    let err = tag.record().set(&ctx, "label", "late").unwrap_err();
    assert_eq!(err.class, ErrorClass::Conflict);
}

// ---------------------------------------------------------------------------
// Storage forms
// ---------------------------------------------------------------------------

#[test]
fn trim_applies_on_read_only() {
    let fx = fixture();
    let ctx = TxContext::none();
    let person = fx.cache.new_entity::<Person>().unwrap();
    person.set_name(&ctx, "  Ada  ").unwrap();
    let key = fx.cache.create(&ctx, &person).unwrap();

    assert_eq!(person.name(&ctx).unwrap().as_deref(), Some("Ada"));

    let schema = entity_schema::<Person>().unwrap();
    let row = fx.store.peek(&schema, &key).unwrap();
    assert_eq!(row.get("name"), Some(&Value::from("  Ada  ")));
}

#[test]
fn value_map_translates_between_forms() {
    let fx = fixture();
    let ctx = TxContext::none();
    let schema = entity_schema::<Person>().unwrap();

    let person = fx.cache.new_entity::<Person>().unwrap();
    person.record().set(&ctx, "mood", "angry").unwrap();
    let key = fx.cache.create(&ctx, &person).unwrap();
    assert_eq!(fx.store.peek(&schema, &key).unwrap().get("mood"), Some(&Value::from("A")));

    let row = Row::from([("mood".to_string(), Value::from("bored"))]);
    fx.store.update(&schema, &key, row).unwrap();
    fx.cache.clear_cache(&ctx).unwrap();

    let reread = fx.cache.read::<Person>(&ctx, &key).unwrap().unwrap();
    assert_eq!(reread.record().get(&ctx, "mood").unwrap(), Value::from("calm"));
}

#[test]
fn encrypted_field_is_stored_as_ciphertext() {
    let fx = fixture();
    let ctx = TxContext::none();
    let schema = entity_schema::<Person>().unwrap();

    let person = fx.cache.new_entity::<Person>().unwrap();
    person.record().set(&ctx, "secret", "s3cret").unwrap();
    let key = fx.cache.create(&ctx, &person).unwrap();

    let stored = fx.store.peek(&schema, &key).unwrap();
    let Some(Value::Blob(bytes)) = stored.get("secret") else {
        panic!("expected a blob, got {:?}", stored.get("secret"));
    };
    assert!(!bytes.windows(6).any(|w| w == b"s3cret"));

    fx.cache.clear_cache(&ctx).unwrap();
    let reread = fx.cache.read::<Person>(&ctx, &key).unwrap().unwrap();
    assert_eq!(reread.record().get(&ctx, "secret").unwrap(), Value::from("s3cret"));
}

#[test]
fn nested_value_flattens_into_renamed_columns() {
    let fx = fixture();
    let ctx = TxContext::none();
    let schema = entity_schema::<Person>().unwrap();

    let person = fx.cache.new_entity::<Person>().unwrap();
    person
        .record()
        .set(&ctx, "home", Value::record([("x", 10i64), ("y", 5i64)]))
        .unwrap();
    let key = fx.cache.create(&ctx, &person).unwrap();

    let row = fx.store.peek(&schema, &key).unwrap();
    assert_eq!(row.get("home_x"), Some(&Value::Int(10)));
    assert_eq!(row.get("home_y"), Some(&Value::Int(5)));
}

#[test]
fn snapshot_lists_public_fields_only() {
    let bird = create::<Bird>().unwrap();
    let ctx = TxContext::none();
    bird.record().set(&ctx, "wingspan", 30i64).unwrap();

    let snapshot = bird.record().snapshot(&ctx).unwrap();

    assert_eq!(snapshot.entity, "Bird");
    assert_eq!(snapshot.key, None);
    assert!(snapshot.value("legs").is_none());
    assert_eq!(snapshot.value("wingspan"), Some(&Value::Int(30)));
    assert!(snapshot.relations.is_empty());
}
