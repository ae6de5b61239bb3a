//! Criterion benchmarks for `ModuleHost` ticks and command decoding.
//!
//! Run with: `cargo bench -p tandem-core`
#![allow(missing_docs)]

use std::collections::VecDeque;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tandem_core::{Command, ModuleHost, ModuleRegistry, ModuleSpec, PatchSpec, unpack};

const SAMPLE_RATE: f32 = 48000.0;
const FRAME_LENS: &[usize] = &[64, 128, 256, 512];

fn graph_spec() -> PatchSpec {
    PatchSpec::graph()
        .with_module(ModuleSpec::new("osc1", "osc"))
        .with_module(ModuleSpec::new("env1", "env"))
        .with_module(ModuleSpec::new("filt1", "filter"))
        .with_module(ModuleSpec::new("dry", "gain"))
        .with_module(ModuleSpec::new("mix", "gain"))
        .with_connection("osc1", "env1")
        .with_connection("env1", "filt1")
        .with_connection("env1", "dry")
        .with_connection("filt1", "mix")
        .with_connection("dry", "mix")
}

fn bench_tick(c: &mut Criterion) {
    let registry = ModuleRegistry::new();
    let mut group = c.benchmark_group("host/tick");
    for &frame_len in FRAME_LENS {
        for (label, spec) in [("chain", PatchSpec::default_voice()), ("graph", graph_spec())] {
            let mut host = ModuleHost::from_spec(&spec, &registry, SAMPLE_RATE, frame_len).unwrap();
            let record = Command::set("osc1", "freq", 440.0).unwrap().encode().unwrap();
            let mut queue = VecDeque::with_capacity(1);
            let mut out = vec![0.0f32; frame_len];
            group.bench_with_input(BenchmarkId::new(label, frame_len), &frame_len, |b, _| {
                b.iter(|| {
                    queue.push_back(record);
                    host.tick(&mut queue, &mut out);
                    black_box(&out);
                });
            });
        }
    }
    group.finish();
}

fn bench_unpack(c: &mut Criterion) {
    let record = Command::set("filt1", "cutoff", 1200.0).unwrap().encode().unwrap();
    c.bench_function("command/unpack", |b| {
        b.iter(|| black_box(unpack(black_box(&record))));
    });
}

criterion_group!(benches, bench_tick, bench_unpack);
criterion_main!(benches);
