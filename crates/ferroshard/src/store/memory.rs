use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use parking_lot::RwLock;
use portable_atomic::{AtomicU64, Ordering};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::store::{
    DocPath, DocumentStore, Fields, Query, Snapshot, StoreError, Transaction, Value,
};

/// Limits of a [`MemoryStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryStoreConfig {
    /// Documents one batch delete or one transaction commit may touch.
    pub max_batch_size: usize,
    /// Attempts made by `run_transaction` before reporting contention.
    pub max_attempts: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            max_attempts: 5,
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    fields: Fields,
    version: u64,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<DocPath, Entry>,
    /// Last commit sequence that touched each path, deletions included, so an
    /// absent read can be validated as well as a present one.
    versions: HashMap<DocPath, u64>,
    commit_seq: u64,
}

impl Inner {
    fn version_of(&self, path: &DocPath) -> u64 {
        self.versions.get(path).copied().unwrap_or(0)
    }

    fn snapshot(&self, path: &DocPath) -> Option<Snapshot> {
        self.docs.get(path).map(|e| Snapshot {
            path: path.clone(),
            fields: e.fields.clone(),
            version: e.version,
        })
    }

    fn run_query(&self, query: &Query) -> Vec<Snapshot> {
        let lo = DocPath::new(query.collection.clone(), String::new());
        let docs = self
            .docs
            .range(lo..)
            .take_while(|(path, _)| path.collection == query.collection)
            .map(|(path, e)| Snapshot {
                path: path.clone(),
                fields: e.fields.clone(),
                version: e.version,
            })
            .filter(|s| query.matches(s))
            .collect();
        query.finish(docs)
    }

    /// Applies `writes` atomically under one new commit sequence.
    fn apply(&mut self, writes: &[Write]) -> Result<(), StoreError> {
        // Validate first so a type mismatch leaves the store untouched.
        let mut staged: BTreeMap<DocPath, Option<Fields>> = BTreeMap::new();
        for write in writes {
            let path = write.path();
            let current = match staged.get(path) {
                Some(state) => state.clone(),
                None => self.docs.get(path).map(|e| e.fields.clone()),
            };
            let next = match write {
                Write::SetMerge { fields, .. } => {
                    let mut merged = current.unwrap_or_default();
                    merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Some(merged)
                }
                Write::Increment { field, delta, .. } => {
                    let mut merged = current.unwrap_or_default();
                    let base = match merged.get(field) {
                        None => 0,
                        Some(Value::Int(n)) => *n,
                        Some(_) => {
                            return Err(StoreError::TypeMismatch {
                                path: path.clone(),
                                field: field.clone(),
                            });
                        }
                    };
                    merged.insert(field.clone(), Value::Int(base.wrapping_add(*delta)));
                    Some(merged)
                }
                Write::Delete { .. } => None,
            };
            staged.insert(path.clone(), next);
        }

        self.commit_seq += 1;
        let version = self.commit_seq;
        for (path, state) in staged {
            self.versions.insert(path.clone(), version);
            match state {
                Some(fields) => {
                    self.docs.insert(path, Entry { fields, version });
                }
                None => {
                    self.docs.remove(&path);
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum Write {
    SetMerge { path: DocPath, fields: Fields },
    Increment { path: DocPath, field: String, delta: i64 },
    Delete { path: DocPath },
}

impl Write {
    fn path(&self) -> &DocPath {
        match self {
            Self::SetMerge { path, .. } | Self::Increment { path, .. } | Self::Delete { path } => {
                path
            }
        }
    }
}

/// An in-process [`DocumentStore`] with optimistic concurrency control.
///
/// Every document carries the commit sequence of its last write. A
/// transaction records the version of everything it reads (zero for absent
/// documents) and commit fails with [`StoreError::Conflict`] if any of those
/// versions moved. Writes are buffered and applied atomically on commit.
///
/// Cloning is cheap; clones share the same documents.
///
/// ## Recommended When
/// - Unit and scenario tests that must not touch the network
/// - Local load runs of the generators
///
/// # Example
/// ```
/// use ferroshard::{Context, DocPath, DocumentStore, MemoryStore, Transaction};
///
/// let store = MemoryStore::default();
/// let path = DocPath::new("things", "a");
///
/// store
///     .run_transaction(&Context::background(), |tx| {
///         tx.increment(&path, "N", 2)?;
///         Ok(())
///     })
///     .unwrap();
///
/// assert_eq!(store.get(&path).unwrap().unwrap().int("N"), Some(2));
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    next_tx: Arc<AtomicU64>,
    config: MemoryStoreConfig,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> MemoryStoreConfig {
        self.config
    }

    /// Number of documents currently stored, across all collections.
    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// A single attempt of a [`MemoryStore`] transaction.
///
/// Reads go to the live store rather than a frozen snapshot. Commit-time
/// validation of every recorded version gives the same guarantee for
/// read-then-write bodies.
#[derive(Debug)]
pub struct MemoryTransaction {
    id: u64,
    state: TxState,
    inner: Arc<RwLock<Inner>>,
    reads: HashMap<DocPath, u64>,
    writes: Vec<Write>,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.state == TxState::Open {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed { tx: self.id })
        }
    }

    fn ensure_readable(&self, path: &DocPath) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.writes.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ReadAfterWrite { path: path.clone() })
        }
    }

    /// Keeps the first observed version of `path` so a change between two
    /// reads of the same document is still caught at commit.
    fn record_read(&mut self, path: &DocPath, version: u64) {
        self.reads.entry(path.clone()).or_insert(version);
    }

    fn touched(&self) -> usize {
        self.writes.iter().map(Write::path).collect::<HashSet<_>>().len()
    }
}

impl Transaction for MemoryTransaction {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_active(&self) -> bool {
        self.state == TxState::Open
    }

    fn get(&mut self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        self.ensure_readable(path)?;
        let (version, snapshot) = {
            let inner = self.inner.read();
            (inner.version_of(path), inner.snapshot(path))
        };
        self.record_read(path, version);
        Ok(snapshot)
    }

    fn query(&mut self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        self.ensure_readable(&DocPath::new(query.collection.clone(), String::new()))?;
        let docs = self.inner.read().run_query(query);
        for doc in &docs {
            self.record_read(&doc.path, doc.version);
        }
        Ok(docs)
    }

    fn set_merge(&mut self, path: &DocPath, fields: Fields) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.writes.push(Write::SetMerge {
            path: path.clone(),
            fields,
        });
        Ok(())
    }

    fn increment(&mut self, path: &DocPath, field: &str, delta: i64) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.writes.push(Write::Increment {
            path: path.clone(),
            field: field.to_owned(),
            delta,
        });
        Ok(())
    }

    fn delete(&mut self, path: &DocPath) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.writes.push(Write::Delete { path: path.clone() });
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    type Tx = MemoryTransaction;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(MemoryTransaction {
            id: self.next_tx.fetch_add(1, Ordering::Relaxed) + 1,
            state: TxState::Open,
            inner: Arc::clone(&self.inner),
            reads: HashMap::new(),
            writes: Vec::new(),
        })
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(tx = tx.id)))]
    fn commit(&self, tx: &mut Self::Tx) -> Result<(), StoreError> {
        tx.ensure_open()?;
        tx.state = TxState::Committed;

        let touched = tx.touched();
        if touched > self.config.max_batch_size {
            return Err(StoreError::BatchTooLarge {
                len: touched,
                max: self.config.max_batch_size,
            });
        }

        let mut inner = self.inner.write();
        if let Some(path) = tx
            .reads
            .iter()
            .find(|(path, seen)| inner.version_of(path) != **seen)
            .map(|(path, _)| path.clone())
        {
            return Err(StoreError::Conflict { path });
        }
        if tx.writes.is_empty() {
            return Ok(());
        }
        inner.apply(&tx.writes)
    }

    fn rollback(&self, tx: &mut Self::Tx) {
        if tx.state == TxState::Open {
            tx.state = TxState::RolledBack;
            tx.writes.clear();
        }
    }

    fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.inner.read().snapshot(path))
    }

    fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self.inner.read().run_query(query))
    }

    fn batch_delete(&self, paths: &[DocPath]) -> Result<(), StoreError> {
        if paths.len() > self.config.max_batch_size {
            return Err(StoreError::BatchTooLarge {
                len: paths.len(),
                max: self.config.max_batch_size,
            });
        }
        if paths.is_empty() {
            return Ok(());
        }
        let writes: Vec<_> = paths
            .iter()
            .map(|path| Write::Delete { path: path.clone() })
            .collect();
        self.inner.write().apply(&writes)
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    fn max_attempts(&self) -> usize {
        self.config.max_attempts
    }
}
