use entitygraph::{Engine, EntityGraphError, EntitySchema, SchemaRegistry, ValueKind};
use entitygraph::ident::entity_iri;
use serde_json::{Map, Value, json};

fn engine() -> Engine {
    let registry = SchemaRegistry::new().register(
        EntitySchema::new("control")
            .with_timestamps()
            .with_field("name", ValueKind::Text),
    );
    Engine::in_memory(registry).expect("engine")
}

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object payload")
}

fn seed(engine: &Engine, count: usize) -> Vec<String> {
    let base = &engine.config().iri_base;
    (0..count)
        .map(|i| {
            let record = engine
                .create("control", payload(json!({"name": format!("node-{i}")})), &["name"])
                .expect("create");
            entity_iri(base, record.id().expect("id"))
        })
        .collect()
}

#[test]
fn fetch_matches_individual_reads() {
    let engine = engine();
    let iris = seed(&engine, 20);

    let records = engine
        .fetch_by_iris("control", &iris, &["name"])
        .expect("bulk fetch");
    assert_eq!(records.len(), 20);

    let mut names: Vec<String> = records
        .iter()
        .map(|r| r.get_str("name").expect("name").to_string())
        .collect();
    names.sort();
    let mut expected: Vec<String> = (0..20).map(|i| format!("node-{i}")).collect();
    expected.sort();
    assert_eq!(names, expected);
}

#[test]
fn unknown_identities_are_simply_absent() {
    let engine = engine();
    let mut iris = seed(&engine, 3);
    iris.push(format!("{}:control--0a0a0a0a-0a0a-0a0a-0a0a-0a0a0a0a0a0a", engine.config().iri_base));
    let records = engine
        .fetch_by_iris("control", &iris, &["name"])
        .expect("bulk fetch");
    assert_eq!(records.len(), 3);
}

#[test]
fn empty_input_is_an_empty_result() {
    let engine = engine();
    let records = engine.fetch_by_iris("control", &[], &["name"]).expect("fetch");
    assert!(records.is_empty());
}

#[test]
fn one_bad_identity_aborts_the_whole_fetch() {
    let engine = engine();
    let mut iris = seed(&engine, 3);
    iris.push("broken\nidentity".to_string());
    let err = engine.fetch_by_iris("control", &iris, &["name"]).unwrap_err();
    assert!(matches!(err, EntityGraphError::InvalidId(_)));
}
