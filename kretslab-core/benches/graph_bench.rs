#[macro_use]
extern crate criterion;

use std::sync::Arc;

use criterion::Criterion;

use kretslab_core::devices::{DeviceCatalog, DeviceRegistry};
use kretslab_core::graph::{ConnectionGraph, Endpoint, FanInPolicy};

fn populated(leds: usize) -> (DeviceRegistry, ConnectionGraph) {
    let catalog = DeviceCatalog::builtin().unwrap();
    let mut registry = DeviceRegistry::new();
    registry.add(catalog.get("arduino-uno").unwrap(), "uno-1").unwrap();
    let led = catalog.get("led").unwrap();
    let mut graph = ConnectionGraph::new(FanInPolicy::Reject);
    for i in 0..leds {
        let id = format!("led-{}", i);
        registry.add(Arc::clone(&led), id.as_str()).unwrap();
        graph
            .connect(&registry, Endpoint::new("uno-1", "d13"), Endpoint::new(id, "anode"))
            .unwrap();
    }
    (registry, graph)
}

fn bench_neighbors(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_neighbors");

    for leds in [1, 16, 256] {
        group.throughput(criterion::Throughput::Elements(leds as u64));
        group.bench_function(format!("fan_out_{}", leds), |b| {
            let (_, graph) = populated(leds);
            b.iter(|| graph.neighbors("uno-1", "d13"));
        });
    }
    group.finish();
}

fn bench_connect(c: &mut Criterion) {
    c.bench_function("graph_connect_64", |b| {
        b.iter(|| populated(64));
    });
}

criterion_group!(benches, bench_neighbors, bench_connect);
criterion_main!(benches);
