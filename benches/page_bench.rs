use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use entitygraph::{
    CmpOp, EntityRecord, EntitySchema, Filter, FilterMode, PageRequest, ValueKind,
    page::evaluate_page,
};
use serde_json::json;

const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);

fn schema() -> EntitySchema {
    EntitySchema::new("control")
        .with_field("name", ValueKind::Text)
        .with_field("priority", ValueKind::Int)
        .with_enum_field("status", &["open", "closed"])
}

fn dataset(rows: usize) -> Vec<EntityRecord> {
    (0..rows)
        .map(|i| {
            let mut record = EntityRecord::default();
            record.fields.insert("id".into(), json!(format!("control--{i:032}")));
            record.fields.insert("entity_type".into(), json!("control"));
            record.fields.insert("name".into(), json!(format!("node-{}", rows - i)));
            record.fields.insert("priority".into(), json!((i % 10) as i64));
            record
                .fields
                .insert("status".into(), json!(if i % 3 == 0 { "open" } else { "closed" }));
            record
        })
        .collect()
}

fn bench_evaluate_page(c: &mut Criterion) {
    let schema = schema();
    let page = PageRequest {
        first: 25,
        offset: 100,
        sort_by: Some("name".to_string()),
        ascending: true,
    };
    let filter = Filter {
        field: "status".to_string(),
        values: vec![json!("open")],
        op: CmpOp::Eq,
        mode: FilterMode::And,
    };

    let mut group = c.benchmark_group("evaluate_page");
    group
        .sample_size(SAMPLE_SIZE)
        .warm_up_time(WARM_UP)
        .measurement_time(MEASURE);
    for rows in [1_000usize, 10_000, 50_000] {
        let records = dataset(rows);
        group.bench_with_input(BenchmarkId::new("sorted_window", rows), &records, |b, records| {
            b.iter(|| evaluate_page(&schema, records.clone(), &[], &page));
        });
        group.bench_with_input(
            BenchmarkId::new("filtered_window", rows),
            &records,
            |b, records| {
                b.iter(|| {
                    evaluate_page(&schema, records.clone(), std::slice::from_ref(&filter), &page)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate_page);
criterion_main!(benches);
