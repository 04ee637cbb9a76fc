//! Manifest merge benchmarks

use connector_gcs::manifest::{merge_filenames, serialize};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("clip_{i:05}.mp4")).collect()
}

fn benchmark_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest_merge");
    let template = json!({"job": {"id": "abc", "camera": 3}, "data": {"files": []}});

    for batch in [1usize, 10, 100].iter() {
        let batch_names = names(*batch);
        group.bench_with_input(BenchmarkId::new("batch", batch), batch, |b, _| {
            b.iter(|| merge_filenames(black_box(Some(&template)), "data.files", black_box(&batch_names)))
        });
    }

    group.finish();
}

fn benchmark_accumulated(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest_accumulated");

    // A long-running stream: the list grows by one batch per cycle
    for existing in [100usize, 1_000, 10_000].iter() {
        let document = merge_filenames(None, "data.files", &names(*existing)).unwrap();
        let batch = names(5);
        group.bench_with_input(BenchmarkId::new("existing", existing), existing, |b, _| {
            b.iter(|| {
                let merged = merge_filenames(Some(&document), "data.files", &batch).unwrap();
                serialize(black_box(&merged)).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_merge, benchmark_accumulated);
criterion_main!(benches);
