//! Criterion benchmarks for the parameter codec and the full query path.
//!
//! The codec group measures encode/decode of native buffers in isolation. The
//! pipeline group pushes batches of queries through the worker threads against the
//! mock driver so scheduling overhead shows up without a real database.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use odbc_middleware::ParameterBinding;
use odbc_middleware::codec::{allocate_output, encode};
use odbc_middleware::native::SqlDataType;
use odbc_middleware::prelude::*;
use odbc_middleware::test_utils::{MockDriver, MockScript};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn sample_values() -> Vec<(SqlType, SqlValue)> {
    let stamp = chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
        .and_then(|d| d.and_hms_milli_opt(8, 30, 0, 125))
        .unwrap();
    vec![
        (SqlType::Bit, SqlValue::Bool(true)),
        (SqlType::Int32, SqlValue::Int(42)),
        (SqlType::BigInt, SqlValue::BigInt(1 << 40)),
        (SqlType::Real, SqlValue::Double(3.25)),
        (SqlType::NVarChar, SqlValue::Text("a medium sized string value".into())),
        (SqlType::Timestamp, SqlValue::Timestamp(stamp)),
        (SqlType::VarBinary, SqlValue::Binary(vec![7; 256])),
    ]
}

fn benchmark_codec(c: &mut Criterion) {
    let values = sample_values();
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(values.len() as u64));

    group.bench_function("encode", |b| {
        b.iter(|| {
            for (ty, value) in &values {
                black_box(encode(*ty, value).unwrap());
            }
        });
    });

    let encoded: Vec<_> = values
        .iter()
        .map(|(ty, value)| encode(*ty, value).unwrap())
        .collect();
    group.bench_function("decode", |b| {
        b.iter(|| {
            for item in &encoded {
                black_box(item.buffer.decode(item.indicator).unwrap());
            }
        });
    });

    group.bench_function("infer_and_bind", |b| {
        b.iter(|| {
            for (_, value) in &values {
                black_box(ParameterBinding::from_value(value).unwrap());
            }
        });
    });

    group.bench_function("allocate_output", |b| {
        b.iter(|| {
            black_box(allocate_output(SqlType::NVarChar, 4000, 0, 0).unwrap());
            black_box(allocate_output(SqlType::Numeric, 0, 38, 10).unwrap());
        });
    });
    group.finish();
}

fn benchmark_pipeline(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let script = MockScript::default().with_rows(
        &[
            ("id", SqlDataType::Integer, 10),
            ("name", SqlDataType::WVarChar, 32),
        ],
        (0..20)
            .map(|i| vec![SqlValue::Int(i), SqlValue::Text(format!("row-{i}"))])
            .collect(),
    );
    let driver = MockDriver::new(script);

    let mut group = c.benchmark_group("pipeline");
    for workers in [1usize, 4] {
        let conn = runtime.block_on(async {
            OdbcConnection::builder("DSN=bench".into())
                .pool_size(4)
                .worker_threads(workers)
                .build(Arc::new(driver.clone()))
                .await
                .unwrap()
        });
        group.throughput(Throughput::Elements(64));
        group.bench_with_input(BenchmarkId::new("array_fetch", workers), &conn, |b, conn| {
            b.to_async(&runtime).iter(|| async {
                let mut set = tokio::task::JoinSet::new();
                for i in 0..64 {
                    let conn = conn.clone();
                    set.spawn(async move {
                        conn.execute_query(
                            FetchMode::Array,
                            "SELECT id, name FROM items WHERE id > ?",
                            vec![SqlValue::Int(i).into()],
                        )
                        .await
                    });
                }
                while let Some(res) = set.join_next().await {
                    black_box(res.unwrap().unwrap());
                }
            });
        });
        conn.close();
    }
    group.finish();
}

criterion_group!(benches, benchmark_codec, benchmark_pipeline);
criterion_main!(benches);
