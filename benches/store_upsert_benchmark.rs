//! Store merge throughput: first-seen inserts against steady-state re-ingestion
//! of an unchanged catalog and a catalog where every price moved.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tokio::runtime::Runtime;

use refurb_watch_lib::domain::Product;
use refurb_watch_lib::store::ProductStore;

fn catalog(size: usize, price_offset: f64) -> Vec<Product> {
    (0..size)
        .map(|n| {
            let name = format!("MacBook Air 13 M{} {}GB", n % 4 + 1, 256 << (n % 3));
            Product::candidate("Mac", "cn", &name, &format!("{name} #{n}"), 6_000.0 + (n % 50) as f64 * 100.0 + price_offset)
        })
        .collect()
}

async fn ingest(store: &ProductStore, candidates: Vec<Product>) {
    for candidate in candidates {
        black_box(store.merge(candidate).await);
    }
}

fn store_upsert(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("store_merge");

    for size in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("fresh", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let store = ProductStore::in_memory();
                ingest(&store, catalog(size, 0.0)).await;
            });
        });

        let unchanged = ProductStore::in_memory();
        rt.block_on(ingest(&unchanged, catalog(size, 0.0)));
        group.bench_with_input(BenchmarkId::new("unchanged", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| ingest(&unchanged, catalog(size, 0.0)));
        });

        let moving = ProductStore::in_memory();
        rt.block_on(ingest(&moving, catalog(size, 0.0)));
        let mut round = 0u32;
        group.bench_with_input(BenchmarkId::new("price_changed", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| {
                round += 1;
                ingest(&moving, catalog(size, f64::from(round % 2) * 50.0 + 1.0))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, store_upsert);
criterion_main!(benches);
