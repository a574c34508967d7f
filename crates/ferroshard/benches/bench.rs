use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use ferroshard::{
    Coder, CoderGenerator, Context, Counter, CounterGenerator, Level, MemoryStore,
    MemoryStoreConfig, Serial, code, code16, code64,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

// Operations per benchmark iteration (split across threads when contended).
const TOTAL_OPS: usize = 512;

fn store() -> MemoryStore {
    MemoryStore::new(MemoryStoreConfig {
        max_attempts: usize::MAX,
        ..MemoryStoreConfig::default()
    })
}

/// Benchmarks a single caller issuing operations back to back.
fn bench_sequential<G>(
    c: &mut Criterion,
    group_name: &str,
    generator_fn: impl Fn(&MemoryStore) -> G,
    mut op: impl FnMut(&mut G, &Context),
) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_OPS as u64));
    let ctx = Context::background();

    group.bench_function(format!("ops/{TOTAL_OPS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let store = store();
                let mut generator = generator_fn(&store);
                for _ in 0..TOTAL_OPS {
                    op(&mut generator, &ctx);
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmarks several threads hammering the same id, each with its own
/// generator instance over a shared store.
fn bench_contended<G>(
    c: &mut Criterion,
    group_name: &str,
    generator_fn: impl Fn(&MemoryStore) -> G + Sync,
    op: impl Fn(&mut G, &Context) + Sync,
) {
    let mut group = c.benchmark_group(group_name);
    let ctx = Context::background();

    for thread_count in [1, 2, 4, 8] {
        let ops_per_thread = TOTAL_OPS / thread_count;

        group.throughput(Throughput::Elements(TOTAL_OPS as u64));
        group.bench_function(format!("ops/{TOTAL_OPS}/threads/{thread_count}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();

                for _ in 0..iters {
                    let store = store();
                    let barrier = Arc::new(Barrier::new(thread_count + 1));
                    scope(|s| {
                        for _ in 0..thread_count {
                            let barrier = Arc::clone(&barrier);
                            let (store, ctx, generator_fn, op) = (&store, &ctx, &generator_fn, &op);
                            s.spawn(move || {
                                let mut generator = generator_fn(store);
                                barrier.wait();
                                for _ in 0..ops_per_thread {
                                    op(&mut generator, ctx);
                                }
                            });
                        }
                        barrier.wait();
                    });
                }

                start.elapsed()
            });
        });
    }

    group.finish();
}

fn coder_number(coder: &mut impl CoderGenerator<MemoryStore>, ctx: &Context) {
    black_box(coder.number(ctx).unwrap());
}

fn counter_increment(counter: &mut impl CounterGenerator<MemoryStore>, ctx: &Context) {
    counter.increment(ctx, 1).unwrap();
}

fn benchmark_sequential_serial(c: &mut Criterion) {
    bench_sequential(
        c,
        "sequential/serial",
        |store| Serial::new(store.clone(), "serials", "bench"),
        |serial: &mut Serial<MemoryStore>, ctx: &Context| {
            black_box(serial.number(ctx).unwrap());
        },
    );
}

fn benchmark_sequential_coder(c: &mut Criterion) {
    bench_sequential(
        c,
        "sequential/coder",
        |store| Coder::new(store.clone(), "codes", "bench", 100),
        coder_number,
    );
}

fn benchmark_sequential_counter_total(c: &mut Criterion) {
    bench_sequential(
        c,
        "sequential/counter/total",
        |store| Counter::new(store.clone(), "counters", "bench", 100).with_levels([]),
        counter_increment,
    );
}

fn benchmark_sequential_counter_all_levels(c: &mut Criterion) {
    bench_sequential(
        c,
        "sequential/counter/all-levels",
        |store| Counter::new(store.clone(), "counters", "bench", 100),
        counter_increment,
    );
}

/// A single document: every thread conflicts with every other.
fn benchmark_contended_serial(c: &mut Criterion) {
    bench_contended(
        c,
        "contended/serial",
        |store| Serial::new(store.clone(), "serials", "bench"),
        |serial: &mut Serial<MemoryStore>, ctx: &Context| {
            black_box(serial.number(ctx).unwrap());
        },
    );
}

fn benchmark_contended_coder(c: &mut Criterion) {
    for shards in [1, 10, 100] {
        bench_contended(
            c,
            &format!("contended/coder/shards/{shards}"),
            |store| Coder::new(store.clone(), "codes", "bench", shards),
            coder_number,
        );
    }
}

fn benchmark_contended_counter(c: &mut Criterion) {
    bench_contended(
        c,
        "contended/counter/day",
        |store| Counter::new(store.clone(), "counters", "bench", 100).with_levels([Level::Day]),
        counter_increment,
    );
}

fn benchmark_encodings(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");
    group.throughput(Throughput::Elements(TOTAL_OPS as u64));
    group.bench_function("code", |b| {
        b.iter(|| (0..TOTAL_OPS as u64).for_each(|v| drop(black_box(code(v)))));
    });
    group.bench_function("code16", |b| {
        b.iter(|| (0..TOTAL_OPS as u64).for_each(|v| drop(black_box(code16(v)))));
    });
    group.bench_function("code64", |b| {
        b.iter(|| (0..TOTAL_OPS as u64).for_each(|v| drop(black_box(code64(v)))));
    });
    group.finish();
}

criterion_group!(
    benches,
    // Single caller
    benchmark_sequential_serial,
    benchmark_sequential_coder,
    benchmark_sequential_counter_total,
    benchmark_sequential_counter_all_levels,
    // Many callers, one id
    benchmark_contended_serial,
    benchmark_contended_coder,
    benchmark_contended_counter,
    // Tokens
    benchmark_encodings,
);
criterion_main!(benches);
