//! Cursor benchmarks for Tessera.
//!
//! Benchmarks for:
//! - Forward-only scans
//! - Random positioning on scrollable cursors
//! - LOB locator materialization

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_common::config::EngineConfig;
use tessera_cursor::source::{MemorySource, TableDef};
use tessera_cursor::{Concurrency, CursorOptions, CursorType, DataType, Database, Query, Value};

fn populated(rows: usize) -> Database {
    let source = Arc::new(MemorySource::new());
    source
        .create_table(
            TableDef::new("items")
                .column("id", DataType::BigInt, false)
                .column("label", DataType::Varchar, true)
                .column("payload", DataType::Blob, true)
                .primary_key(&["id"]),
        )
        .expect("CREATE failed");

    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..rows {
        let payload: Vec<u8> = (0..256).map(|_| rng.gen()).collect();
        source
            .insert(
                "items",
                vec![
                    Value::BigInt(i as i64),
                    Value::string(format!("item_{}", i)),
                    Value::blob(payload),
                ],
            )
            .expect("INSERT failed");
    }
    Database::open(EngineConfig::for_testing(), source).expect("Failed to open database")
}

/// Benchmark a full forward-only scan.
fn bench_forward_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor/forward_scan");

    for size in [100, 1000, 10000].iter() {
        let db = populated(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let conn = db.connect();
                let mut cursor = conn
                    .open_cursor(Query::table("items"), CursorOptions::default())
                    .expect("open failed");
                let mut sum = 0i64;
                while cursor.next().expect("next failed") {
                    sum += cursor.get_long(1).expect("get failed").unwrap_or(0);
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

/// Benchmark random absolute positioning.
fn bench_random_absolute(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor/random_absolute");
    let size = 5000;
    let db = populated(size);

    for cursor_type in [CursorType::ScrollInsensitive, CursorType::ScrollSensitive] {
        let conn = db.connect();
        let mut cursor = conn
            .open_cursor(
                Query::table("items"),
                CursorOptions::new(cursor_type, Concurrency::ReadOnly),
            )
            .expect("open failed");
        cursor.last().expect("last failed");
        let mut rng = StdRng::seed_from_u64(7);

        group.bench_function(format!("{:?}", cursor_type), |b| {
            b.iter(|| {
                let row = rng.gen_range(1..=size as i64);
                black_box(cursor.absolute(row).expect("absolute failed"))
            });
        });
    }

    group.finish();
}

/// Benchmark locator materialization while moving between rows.
fn bench_locators(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor/locators");
    let db = populated(1000);
    let conn = db.connect();
    let mut cursor = conn
        .open_cursor(
            Query::table("items"),
            CursorOptions::new(CursorType::ScrollInsensitive, Concurrency::ReadOnly),
        )
        .expect("open failed");

    group.bench_function("get_blob_and_move", |b| {
        let mut row = 0i64;
        b.iter(|| {
            row = row % 1000 + 1;
            cursor.absolute(row).expect("absolute failed");
            let blob = cursor.get_blob(3).expect("get_blob failed");
            black_box(blob.map(|b| b.length()))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_forward_scan,
    bench_random_absolute,
    bench_locators
);
criterion_main!(benches);
