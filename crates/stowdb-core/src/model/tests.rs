use super::*;
use crate::{
    build::{entity_schema, schema_for},
    key::Key,
    test_fixtures::{Bird, Order, Person, Point, Tag},
    value::ValueKind,
};

#[test]
fn public_fields_exclude_hidden_members_and_relations() {
    let bird = entity_schema::<Bird>().unwrap();
    let names: Vec<&str> = bird.fields().map(Field::name).collect();

    assert_eq!(names, vec!["id", "name", "wingspan"]);
    assert_eq!(bird.hidden_fields().count(), 1);
    assert!(bird.is_suppressed("legs"));
    assert!(bird.field("legs").is_none());

    let order = entity_schema::<Order>().unwrap();
    assert_eq!(order.field_count(), 2);
    assert_eq!(order.relations().count(), 1);
    assert!(order.field("lines").is_some_and(Field::is_relation));
}

#[test]
fn hidden_members_keep_their_column() {
    let bird = entity_schema::<Bird>().unwrap();

    assert!(bird.columns().contains(&"legs".to_string()));
}

#[test]
fn nested_fields_flatten_through_renames() {
    let person = entity_schema::<Person>().unwrap();
    let home = person.field("home").unwrap();

    assert_eq!(home.kind(), ValueKind::Record);
    assert_eq!(home.columns(), vec!["home_x", "home_y"]);
    assert!(home.nested().is_some());

    let mut row = Row::new();
    home.flatten_into(&Value::record([("x", Value::Int(10)), ("y", Value::Int(5))]), &mut row);
    assert_eq!(row.get("home_x"), Some(&Value::Int(10)));
    assert_eq!(row.get("home_y"), Some(&Value::Int(5)));

    let raw = home.extract(&row).unwrap();
    assert_eq!(raw, Value::record([("x", Value::Int(10)), ("y", Value::Int(5))]));
}

#[test]
fn extract_reports_absent_columns_as_none() {
    let person = entity_schema::<Person>().unwrap();

    assert_eq!(person.field("home").unwrap().extract(&Row::new()), None);
    assert_eq!(person.field("name").unwrap().extract(&Row::new()), None);
}

#[test]
fn relation_fields_own_no_columns() {
    let order = entity_schema::<Order>().unwrap();
    let lines = order.field("lines").unwrap();

    assert!(lines.columns().is_empty());
    let model = lines.relation().unwrap();
    assert_eq!(model.child.name(), "Line");
    assert_eq!(model.foreign_key, "order_id");
}

#[test]
fn single_integer_identity_is_store_assigned() {
    assert!(entity_schema::<Person>().unwrap().store_assigns_identity());
    assert!(!entity_schema::<Tag>().unwrap().store_assigns_identity());
}

#[test]
fn key_from_row_and_identity_row_are_inverse() {
    let person = entity_schema::<Person>().unwrap();

    let row = person.identity_row(&Key::Int(7)).unwrap();
    assert_eq!(row.get("id"), Some(&Value::Int(7)));
    assert_eq!(person.key_from_row(&row).unwrap(), Some(Key::Int(7)));

    let mut unkeyed = Row::new();
    unkeyed.insert("id".to_string(), Value::Null);
    assert_eq!(person.key_from_row(&unkeyed).unwrap(), None);
}

#[test]
fn identity_row_rejects_keys_without_stored_form() {
    let person = entity_schema::<Person>().unwrap();

    assert!(person.identity_row(&Key::Provisional(1)).is_err());
    assert!(
        person
            .identity_row(&Key::Composite(vec![Key::Int(1), Key::Int(2)]))
            .is_err()
    );
}

#[test]
fn non_key_identity_value_is_an_invariant_error() {
    let person = entity_schema::<Person>().unwrap();
    let mut row = Row::new();
    row.insert("id".to_string(), Value::Float64(1.5));

    let err = person.key_from_row(&row).unwrap_err();
    assert_eq!(err.class, crate::error::ErrorClass::Internal);
}

#[test]
fn value_objects_have_no_identity() {
    let point = schema_for::<Point>().unwrap();

    assert_eq!(point.kind(), SchemaKind::ValueObject);
    assert!(point.identity().is_none());
    assert!(point.identity_columns().is_empty());
}

#[test]
fn factory_binds_once_per_schema() {
    let person = entity_schema::<Person>().unwrap();
    let first = person.factory().unwrap().type_name();

    let again = entity_schema::<Person>().unwrap();
    assert_eq!(again.factory().unwrap().type_name(), first);
    assert!(first.ends_with("Person"));
}

#[test]
fn schema_json_round_trip_preserves_structure() {
    let person = entity_schema::<Person>().unwrap();

    let text = crate::serialize::to_json(&*person).unwrap();
    let decoded: Schema = crate::serialize::from_json(&text).unwrap();

    assert_eq!(decoded, *person);
    assert!(decoded.factory().is_none());
}
