//! Benchmarks for the frontier's enqueue/dequeue throughput.
//!
//! These benchmarks measure the cost of pushing a batch of work items
//! through the bounded priority queue and draining them back out in order.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use weavestep::cancellation::CancellationToken;
use weavestep::frontier::Frontier;
use weavestep::order_key::WorkItem;
use weavestep::types::NodeId;

const BATCH_SIZES: &[usize] = &[64, 256, 1024];

fn item(step: u64, index: usize) -> WorkItem<i64> {
    WorkItem::new(
        step,
        NodeId::Custom(format!("node-{index}")),
        0,
        NodeId::Start,
        index,
    )
}

async fn fill_and_drain(batch: usize) {
    let frontier = Frontier::new(batch.max(1));
    let cancel = CancellationToken::new();
    for i in 0..batch {
        frontier.enqueue(item(0, i), &cancel, None).await.unwrap();
    }
    let drained = frontier.drain_step(0);
    assert_eq!(drained.len(), batch);
}

fn frontier_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("frontier_enqueue_drain");

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &size| {
            b.to_async(&runtime).iter(|| fill_and_drain(size));
        });
    }

    group.finish();
}

criterion_group!(benches, frontier_throughput);
criterion_main!(benches);
