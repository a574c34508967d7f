use crate::store::DocPath;

/// Errors raised by a [`DocumentStore`] implementation.
///
/// [`DocumentStore`]: crate::DocumentStore
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A document read by the transaction changed before commit. The
    /// transaction runner retries the body on this error.
    #[error("transaction conflict on {path}")]
    Conflict { path: DocPath },

    /// A read was issued after a write in the same transaction.
    #[error("read of {path} after a write in the same transaction")]
    ReadAfterWrite { path: DocPath },

    /// The transaction already committed or rolled back.
    #[error("transaction {tx} is closed")]
    TransactionClosed { tx: u64 },

    /// More documents were touched than one batch or transaction allows.
    #[error("batch touches {len} documents, limit is {max}")]
    BatchTooLarge { len: usize, max: usize },

    /// An increment targeted a field that is not an integer.
    #[error("field {field} of {path} is not an integer")]
    TypeMismatch { path: DocPath, field: String },

    /// The backend could not be reached.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}
