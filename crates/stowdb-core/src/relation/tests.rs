use super::*;
use crate::{
    build::entity_schema,
    config::{EngineConfig, RelationConfig},
    error::ErrorDetail,
    store::{CommandKind, Store},
    test_fixtures::{Fixture, Line, Order, Tag, fixture, fixture_with, new_line},
    tx::TxScope,
};

fn saved_order(fx: &Fixture, label: &str) -> Arc<Order> {
    let order = fx.cache.new_entity::<Order>().unwrap();
    order.record().set(&TxContext::none(), "label", label).unwrap();
    fx.cache.create(&TxContext::none(), &order).unwrap();

    order
}

fn stored_lines(fx: &Fixture) -> usize {
    fx.store.count(&entity_schema::<Line>().unwrap()).unwrap()
}

fn relation_err(err: &Error) -> &RelationError {
    match &err.detail {
        Some(ErrorDetail::Relation(err)) => err,
        other => panic!("expected relation detail, got {other:?}"),
    }
}

fn skus(lines: &[Arc<Line>]) -> Vec<Value> {
    lines
        .iter()
        .map(|line| line.record().get(&TxContext::none(), "sku").unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Outside a transaction
// ---------------------------------------------------------------------------

#[test]
fn children_of_an_unsaved_parent_are_held_until_create() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = fx.cache.new_entity::<Order>().unwrap();
    let lines = order.lines().unwrap();
    let line = new_line(&fx.cache, "A", 1);

    lines.add(&ctx, &line).unwrap();
    assert_eq!(lines.count(&ctx).unwrap(), 1);
    assert_eq!(stored_lines(&fx), 0);

    let key = fx.cache.create(&ctx, &order).unwrap();

    assert!(line.record().is_persisted());
    assert_eq!(stored_lines(&fx), 1);
    assert_eq!(line.record().get(&ctx, "order_id").unwrap(), key.to_value().unwrap());
    assert_eq!(lines.count(&ctx).unwrap(), 1);
}

#[test]
fn add_writes_through_for_a_saved_parent() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    let line = new_line(&fx.cache, "A", 1);

    lines.add(&ctx, &line).unwrap();
    lines.add(&ctx, &line).unwrap();

    assert_eq!(stored_lines(&fx), 1);
    assert_eq!(lines.count(&ctx).unwrap(), 1);
    assert_eq!(lines.index_of(&ctx, &line).unwrap(), Some(0));
    assert!(lines.contains(&ctx, &line).unwrap());
}

#[test]
fn remove_deletes_the_child() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    let line = new_line(&fx.cache, "A", 1);
    lines.add(&ctx, &line).unwrap();

    assert!(lines.remove(&ctx, &line).unwrap());
    assert!(!lines.remove(&ctx, &line).unwrap());
    assert!(line.record().is_deleted());
    assert_eq!(stored_lines(&fx), 0);
}

#[test]
fn clear_and_remove_at_empty_the_list() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    for sku in ["A", "B", "C"] {
        lines.add(&ctx, &new_line(&fx.cache, sku, 1)).unwrap();
    }

    lines.remove_at(&ctx, 1).unwrap();
    assert_eq!(skus(&lines.to_vec(&ctx).unwrap()), vec![Value::from("A"), Value::from("C")]);

    lines.clear(&ctx).unwrap();
    assert_eq!(lines.count(&ctx).unwrap(), 0);
    assert_eq!(stored_lines(&fx), 0);
}

#[test]
fn deleting_the_parent_cascades() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    let first = new_line(&fx.cache, "A", 1);
    lines.add_range(&ctx, [&first, &new_line(&fx.cache, "B", 2)]).unwrap();

    fx.cache.delete(&ctx, &order).unwrap();

    assert!(order.record().is_deleted());
    assert!(first.record().is_deleted());
    assert_eq!(stored_lines(&fx), 0);
}

#[test]
fn stored_children_are_rediscovered_after_eviction() {
    let fx = fixture();
    let ctx = TxContext::none();
    let key = {
        let order = saved_order(&fx, "weekly");
        order.lines().unwrap().add(&ctx, &new_line(&fx.cache, "A", 1)).unwrap();
        order.record().key().unwrap()
    };
    fx.cache.clear_cache(&ctx).unwrap();

    let order = fx.cache.read::<Order>(&ctx, &key).unwrap().unwrap();
    let lines = order.lines().unwrap().to_vec(&ctx).unwrap();

    assert_eq!(skus(&lines), vec![Value::from("A")]);
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

#[test]
fn committed_children_are_read_page_by_page() {
    let config = EngineConfig {
        relation: RelationConfig { page_size: 2 },
        ..EngineConfig::default()
    };
    let fx = fixture_with(config);
    let ctx = TxContext::none();
    let order = saved_order(&fx, "bulk");
    let lines = order.lines().unwrap();
    for sku in ["A", "B", "C", "D", "E"] {
        lines.add(&ctx, &new_line(&fx.cache, sku, 1)).unwrap();
    }
    fx.sink.clear();

    assert_eq!(skus(&[lines.get(&ctx, 1).unwrap()]), vec![Value::from("B")]);
    assert_eq!(fx.sink.commands(CommandKind::ReadAll), 1);

    assert_eq!(lines.count(&ctx).unwrap(), 5);
    assert_eq!(fx.sink.commands(CommandKind::ReadAll), 3);

    let middle = lines.get_range(&ctx, 1, 3).unwrap();
    assert_eq!(
        skus(&middle),
        vec![Value::from("B"), Value::from("C"), Value::from("D")]
    );
    assert_eq!(fx.sink.commands(CommandKind::ReadAll), 3);
}

#[test]
fn out_of_range_access_is_not_found() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    lines.add(&ctx, &new_line(&fx.cache, "A", 1)).unwrap();

    let err = lines.get(&ctx, 3).unwrap_err();
    assert_eq!(err.class, ErrorClass::NotFound);
    assert!(matches!(relation_err(&err), RelationError::IndexOutOfRange { len: 1, .. }));

    let err = lines.remove_at(&ctx, 1).unwrap_err();
    assert!(matches!(relation_err(&err), RelationError::IndexOutOfRange { index: 1, .. }));
}

#[test]
fn largest_index_is_out_of_range() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    lines.add(&ctx, &new_line(&fx.cache, "A", 1)).unwrap();

    let err = lines.remove_at(&ctx, usize::MAX).unwrap_err();
    assert!(matches!(
        relation_err(&err),
        RelationError::IndexOutOfRange { index: usize::MAX, len: 1, .. }
    ));

    let err = lines.get(&ctx, usize::MAX).unwrap_err();
    assert_eq!(err.class, ErrorClass::NotFound);
    assert_eq!(lines.count(&ctx).unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Membership checks
// ---------------------------------------------------------------------------

#[test]
fn children_must_have_the_declared_type() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let wrong = order.record().relation::<Tag>("lines").unwrap();
    let tag = fx.cache.new_entity::<Tag>().unwrap();

    let err = wrong.add(&ctx, &tag).unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(relation_err(&err), RelationError::WrongChildType { actual, .. } if actual == "Tag"));
}

#[test]
fn updating_a_non_member_is_rejected() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let stray = new_line(&fx.cache, "Z", 1);

    let err = order.lines().unwrap().update(&ctx, &stray).unwrap_err();
    assert!(matches!(relation_err(&err), RelationError::NotAMember { .. }));
}

#[test]
fn member_updates_are_written() {
    let fx = fixture();
    let ctx = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    let line = new_line(&fx.cache, "A", 1);
    lines.add(&ctx, &line).unwrap();

    line.record().set(&ctx, "qty", 7i64).unwrap();
    lines.update(&ctx, &line).unwrap();

    let schema = entity_schema::<Line>().unwrap();
    let row = fx.store.peek(&schema, &line.record().key().unwrap()).unwrap();
    assert_eq!(row.get("qty"), Some(&Value::Int(7)));
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn pending_additions_are_visible_only_in_scope() {
    let fx = fixture();
    let none = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    let line = new_line(&fx.cache, "A", 1);

    let scope = TxScope::begin();
    lines.add(scope.ctx(), &line).unwrap();

    assert_eq!(lines.count(scope.ctx()).unwrap(), 1);
    assert_eq!(lines.count(&none).unwrap(), 0);
    assert_eq!(stored_lines(&fx), 0);

    scope.commit().unwrap();

    assert_eq!(lines.count(&none).unwrap(), 1);
    assert!(line.record().is_persisted());
    assert_eq!(line.record().get(&none, "order_id").unwrap(), Value::Int(1));
}

#[test]
fn rolled_back_additions_are_discarded() {
    let fx = fixture();
    let none = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    let line = new_line(&fx.cache, "A", 1);

    {
        let scope = TxScope::begin();
        lines.add(scope.ctx(), &line).unwrap();
    }

    assert_eq!(lines.count(&none).unwrap(), 0);
    assert_eq!(line.record().status(), RecordStatus::New);
    assert_eq!(stored_lines(&fx), 0);
}

#[test]
fn pending_removal_hides_the_child_until_commit() {
    let fx = fixture();
    let none = TxContext::none();
    let order = saved_order(&fx, "weekly");
    let lines = order.lines().unwrap();
    let line = new_line(&fx.cache, "A", 1);
    lines.add(&none, &line).unwrap();

    let scope = TxScope::begin();
    assert!(lines.remove(scope.ctx(), &line).unwrap());
    assert_eq!(lines.count(scope.ctx()).unwrap(), 0);
    assert_eq!(lines.count(&none).unwrap(), 1);

    scope.commit().unwrap();

    assert_eq!(lines.count(&none).unwrap(), 0);
    assert_eq!(stored_lines(&fx), 0);
}

#[test]
fn parent_and_children_created_in_one_transaction() {
    let fx = fixture();
    let none = TxContext::none();
    let scope = TxScope::begin();

    let order = fx.cache.new_entity::<Order>().unwrap();
    order.record().set(scope.ctx(), "label", "fresh").unwrap();
    fx.cache.create(scope.ctx(), &order).unwrap();
    order
        .lines()
        .unwrap()
        .add(scope.ctx(), &new_line(&fx.cache, "A", 1))
        .unwrap();
    assert_eq!(stored_lines(&fx), 0);

    scope.commit().unwrap();

    let key = order.record().key().unwrap();
    let lines = order.lines().unwrap().to_vec(&none).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].record().get(&none, "order_id").unwrap(), key.to_value().unwrap());
}
