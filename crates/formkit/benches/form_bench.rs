//! Benchmarks for form construction and write propagation.
//!
//! Run with: `cargo bench --package formkit --bench form_bench`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use formkit::{ArraySchema, FieldSchema, FormConfig, GroupNode, GroupSchema};
use serde_json::{Value, json};
use std::hint::black_box;

fn wide_schema(fields: usize) -> GroupSchema {
    let mut schema = GroupSchema::new().field("total", FieldSchema::new(json!(0)));
    let mut sources = Vec::with_capacity(fields);
    for i in 0..fields {
        let key = format!("f{i}");
        schema = schema.field(key.clone(), FieldSchema::new(json!(0)));
        sources.push(key);
    }
    schema
        .validation(|v| {
            v.min("f0", 0.0);
        })
        .behaviors(move |b| {
            b.compute(sources, "total", |values| {
                json!(values.iter().filter_map(Value::as_i64).sum::<i64>())
            });
        })
        .expect("valid schema")
}

fn line_items(count: usize) -> GroupSchema {
    let line = GroupSchema::new()
        .field("qty", FieldSchema::new(json!(1)))
        .field("price", FieldSchema::new(json!(0)))
        .field("total", FieldSchema::new(json!(0)));
    let items = (0..count).map(|i| json!({ "qty": i, "price": 2 })).collect();
    GroupSchema::new()
        .array("lines", ArraySchema::new(line).with_items(items))
        .behaviors(|b| {
            b.compute(["lines[*].qty", "lines[*].price"], "lines[*].total", |v| {
                json!(v[0].as_i64().unwrap_or(0) * v[1].as_i64().unwrap_or(0))
            });
        })
        .expect("valid schema")
}

fn config() -> FormConfig {
    FormConfig::default().dev_warnings(false)
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("form/create");
    for fields in [8, 64, 256] {
        let schema = wide_schema(fields);
        group.bench_with_input(BenchmarkId::from_parameter(fields), &schema, |b, schema| {
            b.iter(|| black_box(GroupNode::create(schema, config())));
        });
    }
    group.finish();
}

fn bench_set_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("form/set_value");
    for fields in [8, 64, 256] {
        let form = GroupNode::create(&wide_schema(fields), config()).ok();
        let Some(field) = form.as_ref().and_then(|form| form.field("f0")) else {
            continue;
        };
        let mut n = 0i64;
        group.bench_function(BenchmarkId::from_parameter(fields), |b| {
            b.iter(|| {
                n += 1;
                field.set_value(json!(n));
                black_box(form.as_ref().map(GroupNode::value));
            });
        });
    }
    group.finish();
}

fn bench_array_push_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("form/array");
    for count in [10, 100] {
        let Ok(form) = GroupNode::create(&line_items(count), config()) else {
            continue;
        };
        let Some(lines) = form.array("lines") else {
            continue;
        };
        group.bench_function(BenchmarkId::new("push_remove", count), |b| {
            b.iter(|| {
                lines.push(Some(json!({ "qty": 3, "price": 4 })));
                black_box(lines.remove_at(0));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_create, bench_set_value, bench_array_push_remove);
criterion_main!(benches);
