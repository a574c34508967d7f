use std::{
    collections::HashSet,
    sync::{Arc, Barrier},
    thread::scope,
    time::{Duration, Instant},
};

use anyhow::bail;
use ferroshard::{
    Coder, Context, Counter, Error, MemoryStore, Serial, ShardInfo, recommended_shards,
};
use serde::Serialize;

use crate::config::{GeneratorKind, LoadConfig};

/// What one load run observed.
#[derive(Debug, Serialize)]
pub struct Report {
    pub generator: &'static str,
    pub threads: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
    pub ops_per_sec: f64,
    /// Shard documents present after the run.
    pub shards: usize,
    /// Shard count `recommended_shards` suggests for this many writers.
    pub recommended_shards: u32,
    /// Documents removed at the end of the run (0 with `--keep`).
    pub deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Vec<ShardInfo>>,
}

struct Outcome {
    issued: Vec<u64>,
    succeeded: usize,
    failed: usize,
    elapsed: Duration,
}

/// Runs every worker against one store and checks the generator's
/// guarantees on what came back.
pub fn run(config: &LoadConfig) -> anyhow::Result<Report> {
    let store = MemoryStore::new(config.store);
    let ctx = match config.timeout {
        Some(timeout) => Context::with_timeout(timeout),
        None => Context::background(),
    };
    // Checks after the run must not inherit an elapsed deadline.
    let after = Context::background();
    let (collection, id) = (config.collection.as_str(), config.id.as_str());

    tracing::info!(
        generator = ?config.generator,
        threads = config.threads,
        ops = config.total_ops(),
        shards = config.shards,
        "starting load"
    );

    let (outcome, shards, info, deleted) = match config.generator {
        GeneratorKind::Serial => {
            let outcome = drive(
                config,
                &ctx,
                || Serial::new(&store, collection, id),
                |serial: &mut Serial<&MemoryStore>, ctx: &Context| serial.number(ctx).map(Some),
            );
            let serial = Serial::new(&store, collection, id);
            let current = serial.current(&after)?;
            let mut issued = outcome.issued.clone();
            issued.sort_unstable();
            let expected: Vec<u64> = (1..=current).collect();
            if issued != expected {
                bail!(
                    "serial issued {} values but its document reads {current}",
                    issued.len()
                );
            }
            let info = dump(config, || serial.shard_set().shards_info(&after, &store))?;
            // The serial document only exists once a number was issued.
            let shards = usize::from(current > 0);
            let deleted = if config.keep {
                0
            } else {
                serial.delete(&after)?;
                shards
            };
            (outcome, shards, info, deleted)
        }
        GeneratorKind::Coder => {
            let outcome = drive(
                config,
                &ctx,
                || Coder::new(&store, collection, id, config.shards),
                |coder: &mut Coder<&MemoryStore>, ctx: &Context| coder.number(ctx).map(Some),
            );
            let distinct: HashSet<_> = outcome.issued.iter().collect();
            if distinct.len() != outcome.issued.len() {
                bail!(
                    "coder issued {} duplicate values",
                    outcome.issued.len() - distinct.len()
                );
            }
            let coder = Coder::new(&store, collection, id, config.shards);
            let shards = coder.shards_count(&after)?;
            let info = dump(config, || coder.shards_info(&after))?;
            let deleted = if config.keep { 0 } else { coder.delete(&after)? };
            (outcome, shards, info, deleted)
        }
        GeneratorKind::Counter => {
            let levels = config.levels.clone();
            let outcome = drive(
                config,
                &ctx,
                || {
                    Counter::new(&store, collection, id, config.shards)
                        .with_levels(levels.iter().copied())
                },
                |counter: &mut Counter<&MemoryStore>, ctx: &Context| {
                    counter.increment(ctx, 1).map(|()| None)
                },
            );
            let counter = Counter::new(&store, collection, id, config.shards);
            let total = counter.count_all(&after)?;
            if usize::try_from(total).ok() != Some(outcome.succeeded) {
                bail!(
                    "counter sums to {total} after {} successful increments",
                    outcome.succeeded
                );
            }
            let shards = counter.shards_count(&after)?;
            let info = dump(config, || counter.shards_info(&after))?;
            let deleted = if config.keep { 0 } else { counter.delete(&after)? };
            (outcome, shards, info, deleted)
        }
    };

    let secs = outcome.elapsed.as_secs_f64();
    let ops_per_sec = if secs > 0.0 {
        outcome.succeeded as f64 / secs
    } else {
        0.0
    };
    let writers = u32::try_from(config.threads).unwrap_or(u32::MAX);
    let report = Report {
        generator: name(config.generator),
        threads: config.threads,
        attempted: config.total_ops(),
        succeeded: outcome.succeeded,
        failed: outcome.failed,
        elapsed_ms: outcome.elapsed.as_millis(),
        ops_per_sec,
        shards,
        recommended_shards: recommended_shards(writers),
        deleted,
        info,
    };

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms as u64,
        ops_per_sec = report.ops_per_sec,
        shards = report.shards,
        "load finished"
    );
    Ok(report)
}

/// Spawns `config.threads` workers, each with its own generator, released
/// together by a barrier so the timing covers contended work only.
fn drive<G>(
    config: &LoadConfig,
    ctx: &Context,
    make: impl Fn() -> G + Sync,
    op: impl Fn(&mut G, &Context) -> ferroshard::Result<Option<u64>> + Sync,
) -> Outcome {
    let barrier = Arc::new(Barrier::new(config.threads + 1));

    let (results, elapsed) = scope(|s| {
        let handles: Vec<_> = (0..config.threads)
            .map(|worker| {
                let barrier = Arc::clone(&barrier);
                let (make, op) = (&make, &op);
                s.spawn(move || {
                    let mut generator = make();
                    let mut issued = Vec::with_capacity(config.ops);
                    let mut failed = 0;
                    barrier.wait();
                    for call in 0..config.ops {
                        match op(&mut generator, ctx) {
                            Ok(value) => issued.extend(value),
                            Err(e @ (Error::Cancelled | Error::DeadlineExceeded)) => {
                                tracing::warn!(worker, error = %e, "worker stopped early");
                                failed += config.ops - call;
                                break;
                            }
                            Err(e) => {
                                tracing::debug!(worker, error = %e, "call failed");
                                failed += 1;
                            }
                        }
                    }
                    (issued, failed)
                })
            })
            .collect();

        barrier.wait();
        let start = Instant::now();
        let results: Vec<_> = handles
            .into_iter()
            .enumerate()
            .map(|(worker, h)| {
                h.join().unwrap_or_else(|_| {
                    tracing::error!(worker, "worker panicked");
                    (Vec::new(), config.ops)
                })
            })
            .collect();
        (results, start.elapsed())
    });

    let mut outcome = Outcome {
        issued: Vec::with_capacity(config.total_ops()),
        succeeded: 0,
        failed: 0,
        elapsed,
    };
    for (issued, failed) in results {
        outcome.succeeded += config.ops - failed;
        outcome.failed += failed;
        outcome.issued.extend(issued);
    }
    outcome
}

fn dump(
    config: &LoadConfig,
    info: impl FnOnce() -> ferroshard::Result<Vec<ShardInfo>>,
) -> ferroshard::Result<Option<Vec<ShardInfo>>> {
    if config.dump { info().map(Some) } else { Ok(None) }
}

fn name(kind: GeneratorKind) -> &'static str {
    match kind {
        GeneratorKind::Serial => "serial",
        GeneratorKind::Coder => "coder",
        GeneratorKind::Counter => "counter",
    }
}
