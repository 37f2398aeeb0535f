//! Console buffer write, replay and fan-out throughput

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use paddock::console::{ConsoleBuffer, ConsoleConfig};
use std::hint::black_box;

fn line(i: usize) -> String {
    format!("[12:00:00 INFO]: Preparing spawn area: {}%\n", i % 100)
}

fn filled(entries: usize) -> ConsoleBuffer {
    let buffer = ConsoleBuffer::new(ConsoleConfig {
        max_entries: entries,
        max_age: None,
        ..Default::default()
    });
    for i in 0..entries {
        buffer.write(&line(i));
    }
    buffer
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("console_write");

    for listeners in [0usize, 1, 8] {
        group.bench_with_input(
            BenchmarkId::new("listeners", listeners),
            &listeners,
            |b, &listeners| {
                let buffer = filled(2000);
                let mut subscriptions: Vec<_> =
                    (0..listeners).map(|_| buffer.subscribe()).collect();
                let mut i = 0;
                b.iter(|| {
                    buffer.write(black_box(&line(i)));
                    i += 1;
                    // keep listeners attached
                    for subscription in &mut subscriptions {
                        while subscription.try_recv().is_some() {}
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("console_replay");

    for entries in [100usize, 2000, 10000] {
        let buffer = filled(entries);
        let middle = buffer.read_from(0).entries[entries / 2].timestamp;

        group.bench_with_input(BenchmarkId::new("full", entries), &buffer, |b, buffer| {
            b.iter(|| black_box(buffer.read_text_from(0)));
        });
        group.bench_with_input(BenchmarkId::new("tail", entries), &buffer, |b, buffer| {
            b.iter(|| black_box(buffer.read_from(middle)));
        });
    }

    group.finish();
}

fn bench_subscribe(c: &mut Criterion) {
    c.bench_function("console_subscribe_2000", |b| {
        b.iter_batched(
            || filled(2000),
            |buffer| black_box(buffer.subscribe()),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_write, bench_replay, bench_subscribe);
criterion_main!(benches);
