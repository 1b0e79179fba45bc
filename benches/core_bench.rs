//! Benchmarks for stack synthesis, ordering, and hashing.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use refactor_infra::core::codegen::{render_template, Format};
use refactor_infra::core::parser::parse_config;
use refactor_infra::core::resolver::build_execution_order;
use refactor_infra::core::template::{CfnResource, Template};
use refactor_infra::core::types::StackConfig;
use refactor_infra::resources::app::build_app_stack;
use refactor_infra::tripwire::hasher::hash_template;
use serde_json::json;

const CONFIG: &str = r#"
version: "1.0"
name: CodeRefactorInfra
account: "123456789012"
region: us-east-1
tags:
  Project: code-refactor
  Owner: platform
"#;

fn config() -> StackConfig {
    parse_config(CONFIG).unwrap()
}

fn bench_yaml_parse(c: &mut Criterion) {
    c.bench_function("yaml_parse_config", |b| {
        b.iter(|| black_box(parse_config(black_box(CONFIG)).unwrap()));
    });
}

fn bench_build_app_stack(c: &mut Criterion) {
    let config = config();
    c.bench_function("build_app_stack", |b| {
        b.iter(|| black_box(build_app_stack(black_box(&config)).unwrap()));
    });
}

fn bench_render(c: &mut Criterion) {
    let app = build_app_stack(&config()).unwrap();
    let mut group = c.benchmark_group("render_template");
    for format in [Format::Json, Format::Yaml] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format),
            &app.template,
            |b, t| b.iter(|| black_box(render_template(t, format).unwrap())),
        );
    }
    group.finish();
}

fn bench_hash_template(c: &mut Criterion) {
    let app = build_app_stack(&config()).unwrap();
    c.bench_function("hash_template", |b| {
        b.iter(|| black_box(hash_template(black_box(&app.template)).unwrap()));
    });
}

/// A chain of `n` queues, each referencing the previous one.
fn chain(n: usize) -> Template {
    let mut t = Template::new(None);
    for i in 0..n {
        let mut r = CfnResource::new("AWS::SQS::Queue");
        if i > 0 {
            r = r.prop("RedrivePolicy", json!({ "Ref": format!("Queue{:04}", i - 1) }));
        }
        t.resources.insert(format!("Queue{:04}", i), r);
    }
    t
}

fn bench_execution_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_order");
    for n in [10, 100, 500] {
        let t = chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &t, |b, t| {
            b.iter(|| black_box(build_execution_order(black_box(t)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_yaml_parse,
    bench_build_app_stack,
    bench_render,
    bench_hash_template,
    bench_execution_order
);
criterion_main!(benches);
