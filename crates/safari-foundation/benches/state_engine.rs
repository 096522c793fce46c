//! Liquid state engine benchmarks
//!
//! Measures a single layer step and a full propagation at the default layer
//! size, plus the softmax head on the aggregated state.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use safari_foundation::{LiquidLayerConfig, LiquidStateEngine, SoftmaxHead, StateBuffer};
use safari_kernel::ClassificationHead;

fn engine(layer_size: usize, layers: usize) -> LiquidStateEngine {
    let config = LiquidLayerConfig::new(layer_size, (10.0, 100.0)).expect("valid layer config");
    LiquidStateEngine::dense(config, layers, 42).expect("dense engine")
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("liquid_step");

    for size in [256usize, 1024, 2048] {
        let engine = engine(size, 1);
        let input = vec![0.25f32; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            let mut buffer = StateBuffer::new();
            let mut now = 0u64;
            b.iter(|| {
                now += 10;
                let _ = black_box(engine.step(&mut buffer, 0, black_box(&input), now));
            });
        });
    }

    group.finish();
}

fn bench_propagate(c: &mut Criterion) {
    let mut group = c.benchmark_group("liquid_propagate");

    // Default configuration: 3 layers of 1024 units
    let engine = engine(1024, 3);
    let head = SoftmaxHead::new(
        (0..8).map(|i| format!("label-{i}")).collect(),
        engine.state_dim(),
        43,
    )
    .expect("softmax head");
    let features = vec![0.1f32; 1024];

    group.bench_function("fresh_buffer", |b| {
        b.iter(|| {
            let mut buffer = StateBuffer::new();
            let _ = black_box(engine.propagate(&mut buffer, black_box(&features), 1_000));
        });
    });

    group.bench_function("propagate_and_classify", |b| {
        b.iter(|| {
            let mut buffer = StateBuffer::new();
            if let Ok(out) = engine.propagate(&mut buffer, &features, 1_000) {
                let _ = black_box(head.classify(&out.state));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_step, bench_propagate);
criterion_main!(benches);
