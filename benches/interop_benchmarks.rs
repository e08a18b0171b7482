//! 互操作层性能基准测试
//!
//! 测试响应安全过滤、参数解码和错误编码的性能

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use webview_bridge::bindings::{
    safe_string, CallFault, ErrorEncoder, JsonErrorEncoder, MethodArgs, MethodTable, Reflect,
};
use webview_bridge::core::WebviewError;

struct Calculator;

impl Reflect for Calculator {
    fn methods(table: &mut MethodTable<Self>) {
        table.method("add", |_, (a, b): (i64, i64)| Ok::<_, anyhow::Error>(a + b));
    }
}

fn bench_safe_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("safe_string");

    for len in [64usize, 1024, 16 * 1024] {
        let ascii = "a".repeat(len);
        let mixed = "aé😀".repeat(len / 3);

        group.bench_with_input(BenchmarkId::new("ascii", len), &ascii, |b, input| {
            b.iter(|| black_box(safe_string(input)));
        });

        group.bench_with_input(BenchmarkId::new("mixed", len), &mixed, |b, input| {
            b.iter(|| black_box(safe_string(input)));
        });
    }

    group.finish();
}

fn bench_argument_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("argument_decode");

    group.bench_function("tuple_3", |b| {
        b.iter(|| {
            let args = vec![1.into(), "two".into(), serde_json::Value::Null];
            black_box(<(i64, String, Option<f64>)>::decode(args))
        });
    });

    let add = MethodTable::<Calculator>::of()
        .resolve("add")
        .expect("add is declared");
    group.bench_function("invoke_add", |b| {
        b.iter(|| black_box(add.invoke(&Calculator, black_box("[2,3]"))));
    });

    group.finish();
}

fn bench_error_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("error_encoding");
    let encoder = JsonErrorEncoder::default();

    let binding = CallFault::from(WebviewError::ArgumentCount {
        expected: 2,
        actual: 3,
    });
    group.bench_function("binding_fault", |b| {
        b.iter(|| black_box(encoder.encode(&binding)));
    });

    let host = CallFault::host(anyhow::anyhow!("inner").context("outer"));
    group.bench_function("host_fault", |b| {
        b.iter(|| black_box(encoder.encode(&host)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_safe_string,
    bench_argument_decode,
    bench_error_encoding
);
criterion_main!(benches);
