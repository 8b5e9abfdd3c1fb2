mod common;

use common::{Bicycle, Department, Employee, Env};
use stowdb::{
    core::{build::SchemaError, error::ErrorClass},
    prelude::*,
};

struct Enumerated;

impl Describe for Enumerated {
    fn describe() -> EntityDecl {
        EntityDecl::entity("Enumerated")
            .member(MemberDecl::field("id", ValueKind::Int).identity())
            .member(
                MemberDecl::field("colour", ValueKind::Text)
                    .values(ValueMap::new().value("red").value("green"))
                    .default("blue"),
            )
    }
}

#[test]
fn enumerated_default_outside_its_values_fails_the_build() {
    let err = schema_for::<Enumerated>().unwrap_err();

    assert_eq!(err.class, ErrorClass::Schema);
    assert!(matches!(
        err.schema_error(),
        Some(SchemaError::DefaultNotInValueSet { field, .. }) if field == "colour"
    ));
}

#[test]
fn schemas_describe_columns_and_relations() {
    let employee = entity_schema::<Employee>().unwrap();
    assert_eq!(
        employee.columns(),
        vec![
            "id",
            "department_id",
            "name",
            "status",
            "loc_x",
            "loc_y",
            "notes",
            "salary",
            "ssn"
        ]
    );

    let department = entity_schema::<Department>().unwrap();
    let relations: Vec<&str> = department.relations().map(|f| f.name()).collect();
    assert_eq!(relations, vec!["staff"]);
    assert_eq!(department.field_count(), 2);

    let bicycle = entity_schema::<Bicycle>().unwrap();
    assert!(bicycle.is_suppressed("wheels"));
    assert!(bicycle.field("wheels").is_none());
}

#[test]
fn engine_config_comes_from_toml() {
    let config = EngineConfig::from_toml_str(
        r#"
        [relation]
        page_size = 1
        "#,
    )
    .unwrap();
    assert_eq!(config.relation.page_size, 1);

    let env = Env::with_config(config);
    let department = env.saved_department("Ops", &["Ada", "Grace", "Linus"]);
    let staff = department.staff().unwrap();

    assert_eq!(staff.count(&TxContext::none()).unwrap(), 3);
    assert_eq!(env.store.executed(CommandKind::ReadAll), 3);
}

#[test]
fn invalid_config_is_rejected() {
    let err = EngineConfig::from_toml_str("[relation]\npage_size = 0\n").unwrap_err();
    assert_eq!(err.class, ErrorClass::Config);

    let err = EngineConfig::from_toml_str("[relation]\nunknown = 1\n").unwrap_err();
    assert_eq!(err.class, ErrorClass::Config);
}

#[test]
fn version_is_exported() {
    assert_eq!(stowdb::VERSION, env!("CARGO_PKG_VERSION"));
}
