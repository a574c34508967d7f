use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Context, Error, Result,
    store::{DocPath, Fields, Query, Snapshot, StoreError},
};

/// A handle to one attempt of a store transaction.
///
/// Implementations must enforce "all reads before any writes": once a write
/// has been buffered, `get` and `query` fail with
/// [`StoreError::ReadAfterWrite`]. Writes are buffered and only become visible
/// on commit.
pub trait Transaction {
    /// Identifier unique to this attempt. A retried body sees a new id.
    fn id(&self) -> u64;

    /// Whether the transaction can still read and write.
    fn is_active(&self) -> bool;

    /// Reads a document. `Ok(None)` if it does not exist.
    fn get(&mut self, path: &DocPath) -> Result<Option<Snapshot>, StoreError>;

    /// Runs a query inside the transaction. Returned documents join the read
    /// set.
    fn query(&mut self, query: &Query) -> Result<Vec<Snapshot>, StoreError>;

    /// Creates the document or merges `fields` into it.
    fn set_merge(&mut self, path: &DocPath, fields: Fields) -> Result<(), StoreError>;

    /// Atomically adds `delta` to an integer field, creating the document and
    /// field as needed.
    fn increment(&mut self, path: &DocPath, field: &str, delta: i64) -> Result<(), StoreError>;

    /// Deletes a document. Deleting a missing document is not an error.
    fn delete(&mut self, path: &DocPath) -> Result<(), StoreError>;
}

/// The transactional document store generators are built on.
///
/// Besides the primitive operations, the trait provides
/// [`DocumentStore::run_transaction`], which re-executes a body on conflict.
pub trait DocumentStore: Send + Sync {
    type Tx: Transaction;

    /// Opens a new transaction attempt.
    fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Validates and applies the transaction's writes.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if a document in the read set changed since it
    /// was read. The transaction is closed either way.
    fn commit(&self, tx: &mut Self::Tx) -> Result<(), StoreError>;

    /// Discards the transaction's writes and closes it.
    fn rollback(&self, tx: &mut Self::Tx);

    /// Reads a document outside any transaction.
    fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError>;

    /// Runs a query outside any transaction.
    fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError>;

    /// Deletes up to [`DocumentStore::max_batch_size`] documents atomically.
    ///
    /// # Errors
    ///
    /// [`StoreError::BatchTooLarge`] if `paths` exceeds the limit. Callers
    /// must chunk.
    fn batch_delete(&self, paths: &[DocPath]) -> Result<(), StoreError>;

    /// Maximum number of documents one batch or transaction may touch.
    fn max_batch_size(&self) -> usize;

    /// How many attempts [`DocumentStore::run_transaction`] makes before
    /// giving up with [`Error::Contention`].
    fn max_attempts(&self) -> usize;

    /// Runs `body` inside a transaction and commits it, re-executing the whole
    /// body when the commit reports a conflict.
    ///
    /// The body may run several times. It must not carry side effects that
    /// are unsafe to repeat.
    ///
    /// # Errors
    ///
    /// - Liveness errors from `ctx`, checked before every attempt.
    /// - Any error returned by `body`; the attempt is rolled back and not
    ///   retried.
    /// - [`Error::Contention`] once `max_attempts` commits have conflicted.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all))]
    fn run_transaction<T, F>(&self, ctx: &Context, mut body: F) -> Result<T>
    where
        F: FnMut(&mut Self::Tx) -> Result<T>,
    {
        let attempts = self.max_attempts().max(1);
        for _attempt in 1..=attempts {
            ctx.check()?;
            let mut tx = self.begin()?;
            let value = match body(&mut tx) {
                Ok(value) => value,
                Err(e) => {
                    self.rollback(&mut tx);
                    return Err(e);
                }
            };
            match self.commit(&mut tx) {
                Ok(()) => return Ok(value),
                Err(StoreError::Conflict { path: _path }) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt = _attempt, path = %_path, "transaction conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Contention { attempts })
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    type Tx = S::Tx;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin()
    }

    fn commit(&self, tx: &mut Self::Tx) -> Result<(), StoreError> {
        (**self).commit(tx)
    }

    fn rollback(&self, tx: &mut Self::Tx) {
        (**self).rollback(tx);
    }

    fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        (**self).get(path)
    }

    fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        (**self).query(query)
    }

    fn batch_delete(&self, paths: &[DocPath]) -> Result<(), StoreError> {
        (**self).batch_delete(paths)
    }

    fn max_batch_size(&self) -> usize {
        (**self).max_batch_size()
    }

    fn max_attempts(&self) -> usize {
        (**self).max_attempts()
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for &S {
    type Tx = S::Tx;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin()
    }

    fn commit(&self, tx: &mut Self::Tx) -> Result<(), StoreError> {
        (**self).commit(tx)
    }

    fn rollback(&self, tx: &mut Self::Tx) {
        (**self).rollback(tx);
    }

    fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        (**self).get(path)
    }

    fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        (**self).query(query)
    }

    fn batch_delete(&self, paths: &[DocPath]) -> Result<(), StoreError> {
        (**self).batch_delete(paths)
    }

    fn max_batch_size(&self) -> usize {
        (**self).max_batch_size()
    }

    fn max_attempts(&self) -> usize {
        (**self).max_attempts()
    }
}
