mod level;

pub use level::*;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Context, CounterGenerator, DocPath, DocumentStore, Error, Fields, Phase, Query, RandSource,
    Result, ShardInfo, ShardSet, Snapshot, StoreResultExt, SystemClock, ThreadRandom, TimeSource,
    Transaction, Value,
};

/// Lower bound on a counter's shard count. Smaller requests are raised to it.
pub const MIN_COUNTER_SHARDS: u32 = 10;

const SUM: &str = "N";
const LEVEL: &str = "level";
const BUCKET: &str = "time";
const UPDATED: &str = "updated";
const OWNER: &str = "id";

#[derive(Clone, Debug, PartialEq, Eq)]
struct Pick {
    level: Level,
    path: DocPath,
    bucket: DateTime<Utc>,
    exists: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Decision {
    now: DateTime<Utc>,
    picks: Vec<Pick>,
}

#[derive(Debug)]
struct Engine<R, C> {
    set: ShardSet,
    levels: Vec<Level>,
    rng: R,
    clock: C,
    phase: Phase<Decision>,
}

impl<R: RandSource, C: TimeSource> Engine<R, C> {
    fn read<T: Transaction>(&mut self, ctx: &Context, tx: &mut T) -> Result<()> {
        self.set.check(ctx)?;
        self.phase.ensure_readable("counter.increment_rx", tx)?;
        let now = self.clock.now();
        let mut picks = Vec::with_capacity(self.levels.len());
        for &level in &self.levels {
            let bucket = level
                .bucket_start(now)
                .ok_or_else(|| Error::invalid(format!("no {level} bucket for {now}")))?;
            let shard = self.rng.pick(self.set.num_shards());
            let path = self
                .set
                .shard(format!("{}_{shard}", level.bucket_key(now)));
            let exists = tx
                .get(&path)
                .at(self.set.collection(), self.set.id())?
                .is_some();
            picks.push(Pick {
                level,
                path,
                bucket,
                exists,
            });
        }
        self.phase.park(tx, Decision { now, picks });
        Ok(())
    }

    fn write<T: Transaction>(&mut self, ctx: &Context, tx: &mut T, delta: i64) -> Result<()> {
        self.set.check(ctx)?;
        let Decision { now, picks } = self.phase.take("counter.increment_wx", tx)?;
        let (collection, id) = (self.set.collection(), self.set.id());
        for pick in picks {
            let mut fields = Fields::new();
            fields.insert(UPDATED.to_owned(), Value::Time(now));
            if pick.exists {
                tx.increment(&pick.path, SUM, delta).at(collection, id)?;
            } else {
                fields.insert(OWNER.to_owned(), Value::from(id));
                fields.insert(LEVEL.to_owned(), Value::from(pick.level.as_str()));
                fields.insert(BUCKET.to_owned(), Value::Time(pick.bucket));
                fields.insert(SUM.to_owned(), Value::Int(delta));
            }
            tx.set_merge(&pick.path, fields).at(collection, id)?;
        }
        Ok(())
    }
}

fn sum(docs: &[Snapshot]) -> i64 {
    docs.iter()
        .filter_map(|doc| doc.int(SUM))
        .fold(0_i64, i64::saturating_add)
}

/// A sharded signed accumulator with optional time buckets.
///
/// Each increment adds `delta` to one randomly picked shard per maintained
/// [`Level`]. Totals are computed by scanning shards outside any transaction,
/// so they are eventually consistent with increments still in flight.
///
/// By default every level in [`Level::ALL`] is maintained, which costs one
/// read and one write per level. [`Counter::with_levels`] narrows the set;
/// [`Level::Total`] is always kept so [`Counter::count_all`] stays exact.
///
/// # Example
/// ```
/// use ferroshard::{Context, Counter, MemoryStore};
///
/// let store = MemoryStore::default();
/// let ctx = Context::background();
/// let mut views = Counter::new(&store, "counters", "page-views", 10);
///
/// views.increment(&ctx, 3).unwrap();
/// views.increment(&ctx, -1).unwrap();
/// assert_eq!(views.count_all(&ctx).unwrap(), 2);
/// ```
#[derive(Debug)]
pub struct Counter<S, R = ThreadRandom, C = SystemClock> {
    store: S,
    engine: Engine<R, C>,
}

impl<S: DocumentStore> Counter<S> {
    /// Creates a counter over `num_shards` shards, raised to
    /// [`MIN_COUNTER_SHARDS`] when smaller.
    pub fn new(
        store: S,
        collection: impl Into<String>,
        id: impl Into<String>,
        num_shards: u32,
    ) -> Self {
        Self::with_sources(store, collection, id, num_shards, ThreadRandom, SystemClock)
    }
}

impl<S, R, C> Counter<S, R, C>
where
    S: DocumentStore,
    R: RandSource,
    C: TimeSource,
{
    pub fn with_sources(
        store: S,
        collection: impl Into<String>,
        id: impl Into<String>,
        num_shards: u32,
        rng: R,
        clock: C,
    ) -> Self {
        Self {
            store,
            engine: Engine {
                set: ShardSet::new(collection, id, num_shards, MIN_COUNTER_SHARDS),
                levels: Level::ALL.to_vec(),
                rng,
                clock,
                phase: Phase::default(),
            },
        }
    }

    /// Restricts the maintained levels. [`Level::Total`] is always added.
    pub fn with_levels(mut self, levels: impl IntoIterator<Item = Level>) -> Self {
        let mut levels: Vec<Level> = levels.into_iter().chain([Level::Total]).collect();
        levels.sort_unstable();
        levels.dedup();
        self.engine.levels = levels;
        self
    }

    pub fn levels(&self) -> &[Level] {
        &self.engine.levels
    }

    pub fn shard_set(&self) -> &ShardSet {
        &self.engine.set
    }

    /// Read phase. Picks one shard per level and records whether it exists.
    ///
    /// # Errors
    ///
    /// - Liveness and argument errors before any read.
    /// - [`Error::Protocol`] if `tx` is closed or this attempt already holds
    ///   a pending decision.
    /// - [`Error::Store`] if a read fails.
    pub fn increment_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<()> {
        self.engine.read(ctx, tx)
    }

    /// Write phase. Creates each picked shard holding `delta` or adds
    /// `delta` to it.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if no read phase is pending for `tx`.
    pub fn increment_wx(&mut self, ctx: &Context, tx: &mut S::Tx, delta: i64) -> Result<()> {
        self.engine.write(ctx, tx, delta)
    }

    /// Adds `delta` in a transaction of its own.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(id = %self.engine.set.id(), delta = delta))
    )]
    pub fn increment(&mut self, ctx: &Context, delta: i64) -> Result<()> {
        let Self { store, engine } = self;
        let result = store.run_transaction(ctx, |tx| {
            engine.read(ctx, tx)?;
            engine.write(ctx, tx, delta)
        });
        if result.is_err() {
            engine.phase.reset();
        }
        result.map_err(|e| engine.set.attach(e))
    }

    fn scan(&self, query: Query) -> Result<Vec<Snapshot>> {
        let set = &self.engine.set;
        self.store
            .query(&query.eq(OWNER, set.id()))
            .at(set.collection(), set.id())
    }

    fn range_query(
        &self,
        ctx: &Context,
        level: Level,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Query> {
        self.engine.set.check(ctx)?;
        if level == Level::Total {
            return Err(Error::invalid("the total level has no periods, use count_all"));
        }
        if from > to {
            return Err(Error::invalid(format!("inverted range {from}..{to}")));
        }
        Ok(Query::new(self.engine.set.shards_collection())
            .eq(LEVEL, level.as_str())
            .ge(BUCKET, from)
            .lt(BUCKET, to))
    }

    /// Sums every committed delta by scanning the [`Level::Total`] shards.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(id = %self.engine.set.id()))
    )]
    pub fn count_all(&self, ctx: &Context) -> Result<i64> {
        self.engine.set.check(ctx)?;
        let query =
            Query::new(self.engine.set.shards_collection()).eq(LEVEL, Level::Total.as_str());
        Ok(sum(&self.scan(query)?))
    }

    /// Sums the `level` buckets whose start lies in `[from, to)`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for [`Level::Total`] or when `from > to`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(id = %self.engine.set.id(), period = %level))
    )]
    pub fn count_period(
        &self,
        ctx: &Context,
        level: Level,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let query = self.range_query(ctx, level, from, to)?;
        Ok(sum(&self.scan(query)?))
    }

    /// Per-bucket sums of `level` in `[from, to)`, ordered by bucket start.
    /// Buckets without any shard are omitted.
    pub fn count_breakdown(
        &self,
        ctx: &Context,
        level: Level,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, i64)>> {
        let query = self.range_query(ctx, level, from, to)?;
        let mut buckets: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
        for doc in self.scan(query)? {
            if let (Some(bucket), Some(n)) = (doc.time(BUCKET), doc.int(SUM)) {
                let total = buckets.entry(bucket).or_default();
                *total = total.saturating_add(n);
            }
        }
        Ok(buckets.into_iter().collect())
    }

    pub fn shards_count(&self, ctx: &Context) -> Result<usize> {
        self.engine.set.shards_count(ctx, &self.store)
    }

    pub fn shards_info(&self, ctx: &Context) -> Result<Vec<ShardInfo>> {
        self.engine.set.shards_info(ctx, &self.store)
    }

    /// Removes every shard of every level, then the container. Idempotent.
    pub fn delete(&self, ctx: &Context) -> Result<usize> {
        self.engine.set.delete_shards(ctx, &self.store)
    }

    /// Schedules as much of the deletion as fits inside the caller's
    /// transaction. See [`ShardSet::delete_shards_tx`].
    pub fn delete_tx(&self, ctx: &Context, tx: &mut S::Tx) -> Result<(usize, bool)> {
        self.engine.set.delete_shards_tx(ctx, &self.store, tx)
    }
}

impl<S, R, C> CounterGenerator<S> for Counter<S, R, C>
where
    S: DocumentStore,
    R: RandSource,
    C: TimeSource,
{
    fn increment_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<()> {
        self.increment_rx(ctx, tx)
    }

    fn increment_wx(&mut self, ctx: &Context, tx: &mut S::Tx, delta: i64) -> Result<()> {
        self.increment_wx(ctx, tx, delta)
    }

    fn increment(&mut self, ctx: &Context, delta: i64) -> Result<()> {
        self.increment(ctx, delta)
    }

    fn count_all(&self, ctx: &Context) -> Result<i64> {
        self.count_all(ctx)
    }

    fn count_period(
        &self,
        ctx: &Context,
        level: Level,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        self.count_period(ctx, level, from, to)
    }

    fn shards_count(&self, ctx: &Context) -> Result<usize> {
        self.shards_count(ctx)
    }

    fn shards_info(&self, ctx: &Context) -> Result<Vec<ShardInfo>> {
        self.shards_info(ctx)
    }

    fn delete(&self, ctx: &Context) -> Result<usize> {
        self.delete(ctx)
    }
}
