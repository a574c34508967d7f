use chrono::{DateTime, Utc};

use crate::{Context, DocumentStore, Level, Result, ShardInfo};

/// A minimal interface for strictly increasing serial numbers.
pub trait SerialGenerator<S: DocumentStore> {
    /// Read phase: decides the next number inside `tx` and returns it.
    fn number_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64>;

    /// Write phase: persists the decision made by [`Self::number_rx`].
    fn number_wx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64>;

    /// Runs both phases in a transaction of its own.
    fn number(&mut self, ctx: &Context) -> Result<u64>;

    /// The last issued number, or `0` if none was issued yet.
    fn current(&self, ctx: &Context) -> Result<u64>;

    /// Removes the serial document.
    fn delete(&self, ctx: &Context) -> Result<()>;
}

/// A minimal interface for unique, unordered numbers spread over shards.
pub trait CoderGenerator<S: DocumentStore> {
    fn number_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64>;

    fn number_wx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64>;

    fn number(&mut self, ctx: &Context) -> Result<u64>;

    /// [`Self::number`] rendered as a Crockford base32 token.
    fn code(&mut self, ctx: &Context) -> Result<String>;

    fn shards_count(&self, ctx: &Context) -> Result<usize>;

    fn shards_info(&self, ctx: &Context) -> Result<Vec<ShardInfo>>;

    fn delete(&self, ctx: &Context) -> Result<usize>;
}

/// A minimal interface for sharded signed accumulators.
pub trait CounterGenerator<S: DocumentStore> {
    fn increment_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<()>;

    fn increment_wx(&mut self, ctx: &Context, tx: &mut S::Tx, delta: i64) -> Result<()>;

    fn increment(&mut self, ctx: &Context, delta: i64) -> Result<()>;

    /// Sum of every committed delta.
    fn count_all(&self, ctx: &Context) -> Result<i64>;

    /// Sum of the `level` buckets starting in `[from, to)`.
    fn count_period(
        &self,
        ctx: &Context,
        level: Level,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64>;

    fn shards_count(&self, ctx: &Context) -> Result<usize>;

    fn shards_info(&self, ctx: &Context) -> Result<Vec<ShardInfo>>;

    fn delete(&self, ctx: &Context) -> Result<usize>;
}
