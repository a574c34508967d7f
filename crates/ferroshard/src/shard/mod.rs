//! Shard-set base shared by every generator.
//!
//! A shard-set is identified by `(collection, id)`. It owns a container
//! document at `{collection}/{id}` and a variable number of shard documents in
//! the sub-collection `{collection}/{id}/shards`. Shards are created lazily on
//! first write and removed only by [`ShardSet::delete_shards`].

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Context, DocPath, DocumentStore, Error, Fields, Query, Result, StoreResultExt, Transaction,
};


/// Name of the sub-collection holding shard documents.
pub const SHARDS: &str = "shards";

/// Recommended lower bound on the number of shards.
pub const RECOMMENDED_MIN_SHARDS: u32 = 10;

/// Suggests a shard count for an expected peak of concurrent writers per
/// second: roughly 100 shards per writer, never below
/// [`RECOMMENDED_MIN_SHARDS`].
///
/// ```
/// assert_eq!(ferroshard::recommended_shards(0), 10);
/// assert_eq!(ferroshard::recommended_shards(3), 300);
/// ```
pub const fn recommended_shards(peak_writers_per_second: u32) -> u32 {
    let n = peak_writers_per_second.saturating_mul(100);
    if n < RECOMMENDED_MIN_SHARDS {
        RECOMMENDED_MIN_SHARDS
    } else {
        n
    }
}

/// Diagnostic view of one shard document.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShardInfo {
    /// Document id within the shard sub-collection.
    pub key: String,
    pub fields: Fields,
    pub version: u64,
}

/// Addressing and housekeeping for one `(collection, id)` shard-set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardSet {
    collection: String,
    id: String,
    num_shards: u32,
}

impl ShardSet {
    /// Creates a shard-set. `num_shards` is raised to `floor` when below it.
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        num_shards: u32,
        floor: u32,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            num_shards: num_shards.max(floor).max(1),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// Path of the container document.
    pub fn container(&self) -> DocPath {
        DocPath::new(self.collection.as_str(), self.id.as_str())
    }

    /// Collection path of the shard sub-collection.
    pub fn shards_collection(&self) -> String {
        self.container().sub_collection(SHARDS)
    }

    /// Path of the shard document named `key`.
    pub fn shard(&self, key: impl Into<String>) -> DocPath {
        DocPath::new(self.shards_collection(), key)
    }

    /// Validates a live context and a non-empty address. Runs before any I/O.
    ///
    /// # Errors
    ///
    /// - Liveness errors from `ctx`.
    /// - [`Error::InvalidArgument`] if the collection or id is empty.
    pub fn check(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        if self.collection.is_empty() {
            return Err(Error::invalid("collection must not be empty"));
        }
        if self.id.is_empty() {
            return Err(Error::invalid("id must not be empty"));
        }
        Ok(())
    }

    /// Tags a store failure that surfaced without an address, such as a
    /// failed commit, with this set's `(collection, id)`. Other errors pass
    /// through unchanged.
    pub fn attach(&self, err: Error) -> Error {
        match err {
            Error::Backend(source) => Error::Store {
                collection: self.collection.clone(),
                id: self.id.clone(),
                source,
            },
            other => other,
        }
    }

    /// Counts the shard documents that currently exist.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(id = %self.id)))]
    pub fn shards_count<S: DocumentStore>(&self, ctx: &Context, store: &S) -> Result<usize> {
        self.check(ctx)?;
        let docs = store
            .query(&Query::new(self.shards_collection()))
            .at(&self.collection, &self.id)?;
        Ok(docs.len())
    }

    /// Lists every shard document, ordered by key.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(id = %self.id)))]
    pub fn shards_info<S>(&self, ctx: &Context, store: &S) -> Result<Vec<ShardInfo>>
    where
        S: DocumentStore,
    {
        self.check(ctx)?;
        let docs = store
            .query(&Query::new(self.shards_collection()))
            .at(&self.collection, &self.id)?;
        Ok(docs
            .into_iter()
            .map(|doc| ShardInfo {
                key: doc.path.id,
                fields: doc.fields,
                version: doc.version,
            })
            .collect())
    }

    /// Deletes every shard and then the container document, outside any
    /// transaction.
    ///
    /// Each pass deletes at most [`DocumentStore::max_batch_size`] documents
    /// and the loop runs until no shard remains or `ctx` expires. Deleting an
    /// empty or never-used shard-set succeeds. Returns the number of shard
    /// documents removed.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(id = %self.id)))]
    pub fn delete_shards<S: DocumentStore>(&self, ctx: &Context, store: &S) -> Result<usize> {
        self.check(ctx)?;
        let chunk = store.max_batch_size().max(1);
        let mut deleted = 0;
        loop {
            ctx.check()?;
            let batch: Vec<DocPath> = store
                .query(&Query::new(self.shards_collection()).limit(chunk))
                .at(&self.collection, &self.id)?
                .into_iter()
                .map(|doc| doc.path)
                .collect();
            if batch.is_empty() {
                break;
            }
            store.batch_delete(&batch).at(&self.collection, &self.id)?;
            deleted += batch.len();
            #[cfg(feature = "tracing")]
            tracing::trace!(deleted, "deleted shard chunk");
        }
        store
            .batch_delete(&[self.container()])
            .at(&self.collection, &self.id)?;
        Ok(deleted)
    }

    /// Deletes shards inside the caller's transaction.
    ///
    /// The store caps how many documents one transaction may touch, so at
    /// most `max_batch_size - 1` shards are deleted here, leaving room for the
    /// container. The container is deleted only when every shard fits;
    /// otherwise the remainder is left for [`ShardSet::delete_shards`].
    /// Returns the number of shard documents scheduled for deletion and
    /// whether the set will be empty on commit.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(id = %self.id)))]
    pub fn delete_shards_tx<S: DocumentStore>(
        &self,
        ctx: &Context,
        store: &S,
        tx: &mut S::Tx,
    ) -> Result<(usize, bool)> {
        self.check(ctx)?;
        let room = store.max_batch_size().max(1) - 1;
        // One extra to learn whether anything is left behind.
        let docs = tx
            .query(&Query::new(self.shards_collection()).limit(room + 1))
            .at(&self.collection, &self.id)?;
        let complete = docs.len() <= room;
        let scheduled = docs.len().min(room);
        for doc in docs.iter().take(room) {
            tx.delete(&doc.path).at(&self.collection, &self.id)?;
        }
        if complete {
            tx.delete(&self.container()).at(&self.collection, &self.id)?;
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(scheduled, "shard-set exceeds one transaction, remainder left");
        }
        Ok((scheduled, complete))
    }
}
