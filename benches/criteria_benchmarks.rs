/*!
# Criteria Benchmarks

Benchmarks for the criteria pipeline: decoding raw filter strings,
optimizing filter trees, compiling to SQL and evaluating in memory.

## Usage

```bash
# Run all benchmarks
cargo bench --bench criteria_benchmarks

# Run specific benchmark group
cargo bench --bench criteria_benchmarks -- "Memory Evaluation"

# Quick benchmark with fewer samples
cargo bench --bench criteria_benchmarks -- --quick
```

HTML reports are generated in `target/criterion/report/index.html`.
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use criteriacrate::{
    Criteria, CriteriaConfig, CriteriaFactory, CriteriaParams, FilterFactory, Pagination,
    QueryDriver, Sorting,
    driver::{
        memory::{MemoryCollection, MemoryDriver, Record},
        sea::{SeaQueryDriver, SeaTable},
    },
    filtering::{decode_filters, optimize},
};
use sea_orm::sea_query::PostgresQueryBuilder;
use serde_json::json;
use std::{hint::black_box, time::Duration};

const SIMPLE: &str = "status|eq|published";
const REDUNDANT: &str = "status|eq|draft,or|status|eq|review,or|status|eq|published,\
    and|views|!null,and|views|gt|10,and|views|ne|42,and|views|ne|99";
const NESTED: &str = "views|gte|100,or|[status|in|draft,review,and|rating|between|1,3],\
    and|has|comments[approved|eq|true,and|author.name|like|an],\
    and|author|exists|[name|!like|bot]";

fn posts(size: usize) -> MemoryCollection {
    let statuses = ["published", "draft", "review"];
    (0..size)
        .map(|i| {
            let record = json!({
                "id": i,
                "title": format!("Post number {i}"),
                "status": statuses[i % statuses.len()],
                "views": if i % 7 == 0 { None } else { Some(i * 13 % 500) },
                "rating": (i % 50) as f64 / 10.0,
                "author": {"id": i % 10, "name": format!("author {}", i % 10)},
                "comments": (0..i % 4).map(|c| json!({
                    "id": i * 4 + c,
                    "approved": c % 2 == 0,
                    "author": {"id": c, "name": if c == 0 { "anna" } else { "bob" }},
                })).collect::<Vec<_>>(),
            });
            serde_json::from_value::<Record>(record).unwrap_or_default()
        })
        .collect::<MemoryCollection>()
        .with_relation("author")
        .with_relation_path("comments.author")
}

fn table() -> SeaTable {
    let users = SeaTable::new("users", "id");
    let comments = SeaTable::new("comments", "id").belongs_to("author", users.clone(), "user_id");
    SeaTable::new("posts", "id")
        .belongs_to("author", users, "author_id")
        .has_many("comments", comments, "post_id")
}

fn criteria(raw: &str) -> Criteria {
    let mut criteria = Criteria::new();
    criteria
        .set_filters_raw(raw, &FilterFactory::standard())
        .expect("benchmark filters are valid")
        .set_sorting(Some(Sorting::desc("views")))
        .set_pagination(Some(Pagination::new(0, 20)));
    criteria
}

fn bench_decoding(c: &mut Criterion) {
    let factory = FilterFactory::standard();
    let mut group = c.benchmark_group("Filter Decoding");

    for (name, raw) in [("simple", SIMPLE), ("redundant", REDUNDANT), ("nested", NESTED)] {
        group.bench_with_input(BenchmarkId::new("decode", name), raw, |b, raw| {
            b.iter(|| decode_filters(black_box(raw)));
        });
        group.bench_with_input(BenchmarkId::new("decode_and_build", name), raw, |b, raw| {
            b.iter(|| {
                let items = decode_filters(black_box(raw)).expect("valid filters");
                factory.build(&items)
            });
        });
    }

    let requests = CriteriaFactory::new(factory.clone(), CriteriaConfig::default());
    let params = CriteriaParams {
        filters: Some(NESTED.to_string()),
        sort: Some("views,desc".to_string()),
        search: Some("post|title".to_string()),
        page: Some(3),
        per_page: Some(25),
        range: None,
    };
    group.bench_function("from_params", |b| b.iter(|| requests.from_params(black_box(&params))));
    group.finish();
}

fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("Optimizer");

    for (name, raw) in [("simple", SIMPLE), ("redundant", REDUNDANT), ("nested", NESTED)] {
        let items = decode_filters(raw).expect("valid filters");
        let tree = FilterFactory::standard()
            .build(&items)
            .expect("valid filters")
            .expect("non-empty filters");
        group.bench_with_input(BenchmarkId::new("optimize", name), &tree, |b, tree| {
            b.iter(|| optimize(black_box(tree)));
        });
    }
    group.finish();
}

fn bench_compilation(c: &mut Criterion) {
    let table = table();
    let mut group = c.benchmark_group("SQL Compilation");

    for (name, raw) in [("simple", SIMPLE), ("nested", NESTED)] {
        let mut criteria = criteria(raw);
        criteria.add_relation("comments.author", None).add_relation_count("comments", None);
        group.bench_with_input(BenchmarkId::new("compile", name), &criteria, |b, criteria| {
            b.iter(|| SeaQueryDriver.compile(black_box(&table), criteria));
        });
        group.bench_with_input(BenchmarkId::new("compile_and_render", name), &criteria, |b, criteria| {
            b.iter(|| {
                SeaQueryDriver
                    .compile(&table, criteria)
                    .map(|query| query.select().to_string(PostgresQueryBuilder))
            });
        });
    }
    group.finish();
}

fn bench_memory(c: &mut Criterion) {
    for size in [100, 1_000, 10_000] {
        let collection = posts(size);
        let mut group = c.benchmark_group(format!("Memory Evaluation ({size} records)"));
        group.measurement_time(Duration::from_secs(5));

        for (name, raw) in [("simple", SIMPLE), ("nested", NESTED)] {
            let criteria = criteria(raw);
            group.bench_with_input(BenchmarkId::new("fetch", name), &criteria, |b, criteria| {
                b.iter(|| MemoryDriver.compile(&collection, criteria).and_then(|query| query.fetch()));
            });
        }

        let mut loading = criteria(SIMPLE);
        loading
            .add_relation("comments.author", None)
            .add_relation_count("comments", None);
        group.bench_function("fetch_with_relations", |b| {
            b.iter(|| MemoryDriver.compile(&collection, &loading).and_then(|query| query.fetch()));
        });
        group.finish();
    }
}

criterion_group!(
    benches,
    bench_decoding,
    bench_optimizer,
    bench_compilation,
    bench_memory
);
criterion_main!(benches);
