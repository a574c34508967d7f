#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Context, DocumentStore, Fields, Phase, Result, SerialGenerator, ShardSet, StoreResultExt,
    Transaction, Value, generator::stored_count,
};

const NUMBER: &str = "N";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Decision {
    value: u64,
    exists: bool,
}

#[derive(Debug)]
struct Engine {
    set: ShardSet,
    phase: Phase<Decision>,
}

impl Engine {
    fn read<T: Transaction>(&mut self, ctx: &Context, tx: &mut T) -> Result<u64> {
        self.set.check(ctx)?;
        self.phase.ensure_readable("serial.number_rx", tx)?;
        let path = self.set.container();
        let doc = tx.get(&path).at(self.set.collection(), self.set.id())?;
        let decision = Decision {
            value: stored_count(doc.as_ref(), NUMBER) + 1,
            exists: doc.is_some(),
        };
        self.phase.park(tx, decision);
        Ok(decision.value)
    }

    fn write<T: Transaction>(&mut self, ctx: &Context, tx: &mut T) -> Result<u64> {
        self.set.check(ctx)?;
        let Decision { value, exists } = self.phase.take("serial.number_wx", tx)?;
        let (collection, id) = (self.set.collection(), self.set.id());
        let path = self.set.container();
        if exists {
            tx.increment(&path, NUMBER, 1).at(collection, id)?;
        } else {
            let mut fields = Fields::new();
            fields.insert("id".to_owned(), Value::from(id));
            fields.insert(NUMBER.to_owned(), Value::Int(1));
            tx.set_merge(&path, fields).at(collection, id)?;
        }
        Ok(value)
    }
}

/// A strictly increasing serial number backed by a single document.
///
/// Every call reads and rewrites the same document, so concurrent callers
/// conflict and the store retries them. Suited to about one call per second
/// per id; use [`Coder`] for anything busier.
///
/// Within one attempt the read phase may run only once before its write
/// phase. A second read would observe the value the pending write has not
/// bumped yet, and is rejected with
/// [`ProtocolViolation::ReadAlreadyPending`].
///
/// # Example
/// ```
/// use ferroshard::{Context, MemoryStore, Serial};
///
/// let store = MemoryStore::default();
/// let ctx = Context::background();
/// let mut invoices = Serial::new(&store, "serials", "invoices");
///
/// assert_eq!(invoices.number(&ctx).unwrap(), 1);
/// assert_eq!(invoices.number(&ctx).unwrap(), 2);
/// assert_eq!(invoices.current(&ctx).unwrap(), 2);
/// ```
///
/// [`Coder`]: crate::Coder
/// [`ProtocolViolation::ReadAlreadyPending`]: crate::ProtocolViolation::ReadAlreadyPending
#[derive(Debug)]
pub struct Serial<S> {
    store: S,
    engine: Engine,
}

impl<S: DocumentStore> Serial<S> {
    pub fn new(store: S, collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            store,
            engine: Engine {
                set: ShardSet::new(collection, id, 1, 1),
                phase: Phase::default(),
            },
        }
    }

    pub fn shard_set(&self) -> &ShardSet {
        &self.engine.set
    }

    /// Read phase. Returns the number the matching write phase will issue.
    ///
    /// # Errors
    ///
    /// - Liveness and argument errors before any read.
    /// - [`Error::Protocol`] if `tx` is closed or this attempt already holds
    ///   a pending decision.
    /// - [`Error::Store`] if the read fails.
    ///
    /// [`Error::Protocol`]: crate::Error::Protocol
    /// [`Error::Store`]: crate::Error::Store
    pub fn number_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64> {
        self.engine.read(ctx, tx)
    }

    /// Write phase. Creates the document at `1` or increments it by one.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if no read phase is pending for `tx`. Nothing is
    /// written in that case.
    ///
    /// [`Error::Protocol`]: crate::Error::Protocol
    pub fn number_wx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64> {
        self.engine.write(ctx, tx)
    }

    /// Issues the next number in a transaction of its own.
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

    /// Reads the last issued number outside any transaction.
    pub fn current(&self, ctx: &Context) -> Result<u64> {
        let set = &self.engine.set;
        set.check(ctx)?;
        let doc = self
            .store
            .get(&set.container())
            .at(set.collection(), set.id())?;
        Ok(stored_count(doc.as_ref(), NUMBER))
    }

    /// Removes the serial document. The next number issued is `1` again.
    pub fn delete(&self, ctx: &Context) -> Result<()> {
        self.engine.set.delete_shards(ctx, &self.store).map(drop)
    }

    /// Schedules the deletion inside the caller's transaction.
    pub fn delete_tx(&self, ctx: &Context, tx: &mut S::Tx) -> Result<()> {
        self.engine
            .set
            .delete_shards_tx(ctx, &self.store, tx)
            .map(drop)
    }
}

impl<S: DocumentStore> SerialGenerator<S> for Serial<S> {
    fn number_rx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64> {
        self.number_rx(ctx, tx)
    }

    fn number_wx(&mut self, ctx: &Context, tx: &mut S::Tx) -> Result<u64> {
        self.number_wx(ctx, tx)
    }

    fn number(&mut self, ctx: &Context) -> Result<u64> {
        self.number(ctx)
    }

    fn current(&self, ctx: &Context) -> Result<u64> {
        self.current(ctx)
    }

    fn delete(&self, ctx: &Context) -> Result<()> {
        self.delete(ctx)
    }
}
