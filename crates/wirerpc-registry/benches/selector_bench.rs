// Criterion benchmarks for wirerpc-registry
//
// Run benchmarks with:
//   cargo bench -p wirerpc-registry

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use wirerpc_common::{InstanceSelector, ServiceInstance, ServiceRegistry};
use wirerpc_registry::{FirstSelector, InMemoryRegistry, RoundRobinSelector};

fn instances(count: usize) -> Vec<ServiceInstance> {
    (0..count)
        .map(|i| ServiceInstance::new(format!("node{}", i), "EchoService", "127.0.0.1", 7000 + i as u16))
        .collect()
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");

    for count in [2usize, 5, 10, 20] {
        let list = instances(count);
        let round_robin = RoundRobinSelector::new();

        group.bench_with_input(BenchmarkId::new("round_robin", count), &list, |b, list| {
            b.iter(|| round_robin.select(black_box(list)))
        });
        group.bench_with_input(BenchmarkId::new("first", count), &list, |b, list| {
            b.iter(|| FirstSelector.select(black_box(list)))
        });
    }

    group.finish();
}

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = InMemoryRegistry::with_instances(instances(20));
    c.bench_function("get_instances_20", |b| {
        b.iter(|| registry.get_instances(black_box("EchoService")))
    });
}

criterion_group!(benches, bench_select, bench_registry_lookup);
criterion_main!(benches);
