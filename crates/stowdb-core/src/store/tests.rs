use super::*;
use crate::{
    build::entity_schema,
    error::ErrorOrigin,
    test_fixtures::{Person, Tag},
    value::Value,
};

fn tag_row(code: &str, label: &str) -> Row {
    Row::from([
        ("code".to_string(), Value::from(code)),
        ("label".to_string(), Value::from(label)),
    ])
}

fn person_row(name: &str) -> Row {
    Row::from([
        ("id".to_string(), Value::Null),
        ("name".to_string(), Value::from(name)),
    ])
}

#[test]
fn store_assigns_sequential_integer_identities() {
    let store = MemoryStore::new();
    let schema = entity_schema::<Person>().unwrap();

    let a = store.create(&schema, person_row("a")).unwrap();
    let b = store.create(&schema, person_row("b")).unwrap();

    assert_eq!(a, Key::Int(1));
    assert_eq!(b, Key::Int(2));
    assert_eq!(store.peek(&schema, &b).unwrap().get("id"), Some(&Value::Int(2)));
}

#[test]
fn explicit_integer_key_advances_the_counter() {
    let store = MemoryStore::new();
    let schema = entity_schema::<Person>().unwrap();
    let mut row = person_row("x");
    row.insert("id".to_string(), Value::Int(10));

    store.create(&schema, row).unwrap();
    assert_eq!(store.create(&schema, person_row("y")).unwrap(), Key::Int(11));
}

#[test]
fn supplied_keys_must_be_unique() {
    let store = MemoryStore::new();
    let schema = entity_schema::<Tag>().unwrap();

    store.create(&schema, tag_row("red", "Red")).unwrap();
    let err = store.create(&schema, tag_row("red", "Again")).unwrap_err();

    assert_eq!(err.class, ErrorClass::Conflict);
    assert_eq!(err.origin, ErrorOrigin::Store);
}

#[test]
fn text_identity_is_never_assigned() {
    let store = MemoryStore::new();
    let schema = entity_schema::<Tag>().unwrap();
    let row = Row::from([("label".to_string(), Value::from("nameless"))]);

    let err = store.create(&schema, row).unwrap_err();
    assert_eq!(err.class, ErrorClass::Validation);
}

#[test]
fn update_merges_columns_and_requires_the_row() {
    let store = MemoryStore::new();
    let schema = entity_schema::<Tag>().unwrap();
    let key = store.create(&schema, tag_row("blue", "Blue")).unwrap();

    store
        .update(&schema, &key, Row::from([("label".to_string(), Value::from("Navy"))]))
        .unwrap();
    let row = store.read(&schema, &key).unwrap().unwrap();
    assert_eq!(row.get("label"), Some(&Value::from("Navy")));
    assert_eq!(row.get("code"), Some(&Value::from("blue")));

    let missing = store
        .update(&schema, &Key::from("nope"), Row::new())
        .unwrap_err();
    assert_eq!(missing.class, ErrorClass::NotFound);
}

#[test]
fn delete_reports_whether_a_row_was_removed() {
    let store = MemoryStore::new();
    let schema = entity_schema::<Tag>().unwrap();
    let key = store.create(&schema, tag_row("green", "Green")).unwrap();

    assert!(store.delete(&schema, &key).unwrap());
    assert!(!store.delete(&schema, &key).unwrap());
    assert_eq!(store.count(&schema).unwrap(), 0);
}

#[test]
fn read_all_returns_rows_in_key_order() {
    let store = MemoryStore::new();
    let schema = entity_schema::<Tag>().unwrap();
    for code in ["c", "a", "b"] {
        store.create(&schema, tag_row(code, code)).unwrap();
    }

    let codes: Vec<Value> = store
        .read_all(&schema)
        .unwrap()
        .filter_map(|row| row.get("code").cloned())
        .collect();
    assert_eq!(codes, vec![Value::from("a"), Value::from("b"), Value::from("c")]);

    assert_eq!(store.delete_all(&schema).unwrap(), 3);
    assert_eq!(store.read_all(&schema).unwrap().count(), 0);
}

#[test]
fn every_call_bumps_its_command_counter() {
    let store = MemoryStore::new();
    let schema = entity_schema::<Tag>().unwrap();
    let key = store.create(&schema, tag_row("k", "K")).unwrap();

    store.read(&schema, &key).unwrap();
    store.read(&schema, &key).unwrap();
    store.count(&schema).unwrap();
    let _ = store.peek(&schema, &key);

    assert_eq!(store.executed(CommandKind::Create), 1);
    assert_eq!(store.executed(CommandKind::ReadBy), 2);
    assert_eq!(store.executed(CommandKind::Count), 1);
    assert_eq!(store.executed(CommandKind::DeleteAll), 0);
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[test]
fn command_for_schema_lists_columns_by_kind() {
    let schema = entity_schema::<Tag>().unwrap();

    let read = Command::for_schema(&schema, CommandKind::ReadBy);
    assert_eq!(read.columns, vec!["code", "label"]);
    assert_eq!(read.key_columns, vec!["code"]);

    let delete_all = Command::for_schema(&schema, CommandKind::DeleteAll);
    assert!(delete_all.columns.is_empty());
    assert!(delete_all.key_columns.is_empty());

    let partial = Command::for_schema(&schema, CommandKind::UpdateBy).with_columns(["label".to_string()]);
    assert_eq!(partial.columns, vec!["label"]);
}

#[test]
fn plain_renderer_describes_commands() {
    let schema = entity_schema::<Tag>().unwrap();
    let text = PlainRenderer
        .render(&Command::for_schema(&schema, CommandKind::UpdateBy))
        .unwrap();

    assert_eq!(text, "UPDATE Tag SET (code, label) BY (code)");
}

#[test]
fn keyed_command_without_key_columns_is_unsupported() {
    let command = Command {
        entity: "Loose".to_string(),
        kind: CommandKind::DeleteBy,
        columns: Vec::new(),
        key_columns: Vec::new(),
    };

    let err = PlainRenderer.render(&command).unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn command_kinds_display_snake_case() {
    assert_eq!(CommandKind::ReadAll.to_string(), "read_all");
    assert!(CommandKind::UpdateBy.is_keyed());
    assert!(!CommandKind::Count.is_keyed());
}
