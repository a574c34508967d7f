#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    CoderGenerator, Context, DocumentStore, Error, Fields, Phase, RandSource, Result, ShardInfo,
    ShardSet, StoreResultExt, ThreadRandom, Transaction, Value, encoding,
    generator::stored_count,
};

const LOCAL: &str = "C";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Decision {
    shard: u32,
    value: u64,
    exists: bool,
}

#[derive(Debug)]
struct Engine<R> {
    set: ShardSet,
    rng: R,
    phase: Phase<Decision>,
}

impl<R: RandSource> Engine<R> {
    fn read<T: Transaction>(&mut self, ctx: &Context, tx: &mut T) -> Result<u64> {
        self.set.check(ctx)?;
        self.phase.ensure_readable("coder.number_rx", tx)?;
        let n = self.set.num_shards();
        let shard = self.rng.pick(n);
        let doc = tx
            .get(&self.set.shard(shard.to_string()))
            .at(self.set.collection(), self.set.id())?;
        let local = stored_count(doc.as_ref(), LOCAL);
        let value = (local + 1)
            .checked_mul(u64::from(n))
            .and_then(|v| v.checked_add(u64::from(shard)))
            .ok_or_else(|| Error::invalid(format!("shard {shard} has no values left")))?;
        let decision = Decision {
            shard,
            value,
            exists: doc.is_some(),
        };
        self.phase.park(tx, decision);
        Ok(value)
    }

    fn write<T: Transaction>(&mut self, ctx: &Context, tx: &mut T) -> Result<u64> {
        self.set.check(ctx)?;
        let Decision {
            shard,
            value,
            exists,
        } = self.phase.take("coder.number_wx", tx)?;
        let (collection, id) = (self.set.collection(), self.set.id());
        let path = self.set.shard(shard.to_string());
        if exists {
            tx.increment(&path, LOCAL, 1).at(collection, id)?;
        } else {
            let mut fields = Fields::new();
            fields.insert("id".to_owned(), Value::from(id));
            fields.insert(LOCAL.to_owned(), Value::Int(1));
            tx.set_merge(&path, fields).at(collection, id)?;

            let mut container = Fields::new();
            container.insert("shards".to_owned(), Value::Int(i64::from(self.set.num_shards())));
            tx.set_merge(&self.set.container(), container)
                .at(collection, id)?;
        }
        Ok(value)
    }
}

/// A high-throughput generator of unique, unordered numbers.
///
/// Each call picks one of `num_shards` shards at random and bumps its local
/// counter `L`. The issued value is `(L + 1) * num_shards + shard`, so
/// `value % num_shards` always names the shard that produced it and two
/// shards can never issue the same value. Throughput grows with the shard
/// count; see [`recommended_shards`].
///
/// ## Features
/// - ✅ Unique across shards without cross-shard coordination
/// - ✅ Compact text tokens via [`Coder::code`], [`Coder::code16`],
///   [`Coder::code64`]
/// - ❌ Not ordered
///
/// # Example
/// ```
/// use ferroshard::{Coder, Context, MemoryStore, ScriptedRandom};
///
/// let store = MemoryStore::default();
/// let ctx = Context::background();
/// let mut coder = Coder::with_rng(&store, "codes", "orders", 10, ScriptedRandom::new([3]));
///
/// let v = coder.number(&ctx).unwrap();
/// assert_eq!(v % 10, 3);
/// assert_eq!(v / 10, 1);
/// ```
///
/// [`recommended_shards`]: crate::recommended_shards
#[derive(Debug)]
pub struct Coder<S, R = ThreadRandom> {
    store: S,
    engine: Engine<R>,
}

impl<S: DocumentStore> Coder<S> {
    /// Creates a coder over `num_shards` shards (at least one) drawing shard
    /// indices from [`ThreadRandom`].
    pub fn new(
        store: S,
        collection: impl Into<String>,
        id: impl Into<String>,
        num_shards: u32,
    ) -> Self {
        Self::with_rng(store, collection, id, num_shards, ThreadRandom)
    }
}

impl<S, R> Coder<S, R>
where
    S: DocumentStore,
    R: RandSource,
{
    pub fn with_rng(
        store: S,
        collection: impl Into<String>,
        id: impl Into<String>,
        num_shards: u32,
        rng: R,
    ) -> Self {
        Self {
            store,
            engine: Engine {
                set: ShardSet::new(collection, id, num_shards, 1),
                rng,
                phase: Phase::default(),
            },
        }
    }

    pub fn shard_set(&self) -> &ShardSet {
        &self.engine.set
    }

    /// Read phase. Picks a shard, reads its local counter and returns the
    /// value the matching write phase will issue.
    ///
    /// # Errors
    ///
    /// - Liveness and argument errors before any read.
    /// - [`Error::Protocol`] if `tx` is closed or this attempt already holds
    ///   a pending decision.
    /// - [`Error::Store`] if the read fails.
    pub fn number_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64> {
        self.engine.read(ctx, tx)
    }

    /// Write phase. Creates the picked shard at `1` or increments it.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if no read phase is pending for `tx`.
    pub fn number_wx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64> {
        self.engine.write(ctx, tx)
    }

    /// Issues a value in a transaction of its own.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(id = %self.engine.set.id()))
    )]
    pub fn number(&mut self, ctx: &Context) -> Result<u64> {
        let Self { store, engine } = self;
        let result = store.run_transaction(ctx, |tx| {
            engine.read(ctx, tx)?;
            engine.write(ctx, tx)
        });
        if result.is_err() {
            engine.phase.reset();
        }
        result.map_err(|e| engine.set.attach(e))
    }

    /// Issues a value as a 13-character Crockford base32 token.
    pub fn code(&mut self, ctx: &Context) -> Result<String> {
        self.number(ctx).map(encoding::code)
    }

    /// Issues a value as a 16-character hex token.
    pub fn code16(&mut self, ctx: &Context) -> Result<String> {
        self.number(ctx).map(encoding::code16)
    }

    /// Issues a value as an 11-character URL-safe base64 token.
    pub fn code64(&mut self, ctx: &Context) -> Result<String> {
        self.number(ctx).map(encoding::code64)
    }

    pub fn shards_count(&self, ctx: &Context) -> Result<usize> {
        self.engine.set.shards_count(ctx, &self.store)
    }

    pub fn shards_info(&self, ctx: &Context) -> Result<Vec<ShardInfo>> {
        self.engine.set.shards_info(ctx, &self.store)
    }

    /// Removes every shard and the container. Values issued afterwards may
    /// repeat earlier ones.
    pub fn delete(&self, ctx: &Context) -> Result<usize> {
        self.engine.set.delete_shards(ctx, &self.store)
    }

    /// Schedules as much of the deletion as fits inside the caller's
    /// transaction. See [`ShardSet::delete_shards_tx`].
    pub fn delete_tx(&self, ctx: &Context, tx: &mut S::Tx) -> Result<(usize, bool)> {
        self.engine.set.delete_shards_tx(ctx, &self.store, tx)
    }
}

impl<S, R> CoderGenerator<S> for Coder<S, R>
where
    S: DocumentStore,
    R: RandSource,
{
    fn number_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64> {
        self.number_rx(ctx, tx)
    }

    fn number_wx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64> {
        self.number_wx(ctx, tx)
    }

    fn number(&mut self, ctx: &Context) -> Result<u64> {
        self.number(ctx)
    }

    fn code(&mut self, ctx: &Context) -> Result<String> {
        self.code(ctx)
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
