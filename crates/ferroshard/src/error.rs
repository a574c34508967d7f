//! Error types for shard-set generators.
//!
//! Everything `ferroshard` can fail with funnels into [`Error`]:
//!
//! - `Protocol`: the RX/WX call order was violated. Nothing was read or
//!   written.
//! - `InvalidArgument`: a precondition on collection, id or query range did
//!   not hold. Checked before any I/O.
//! - `Cancelled` / `DeadlineExceeded`: the caller's [`Context`] was no longer
//!   live. Checked before any I/O.
//! - `Store`: the backing store failed while working on a specific shard-set.
//!   The `(collection, id)` pair is attached.
//! - `Contention`: the transaction runner gave up after its retry budget.
//! - `Decode`: a code token could not be reversed.
//!
//! A document that "does not exist yet" is never an error; generators treat
//! it as the create branch.
//!
//! [`Context`]: crate::Context

use core::fmt;

use crate::{encoding::DecodeError, store::StoreError};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The ways the RX/WX protocol can be misused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolViolation {
    /// `*WX` was called with no pending read decision.
    WriteWithoutRead,
    /// `*RX` was handed a transaction that already committed or rolled back.
    ReadOutsideTransaction,
    /// `*RX` was called twice in the same transaction attempt without a `*WX`
    /// in between. The second read would observe a stale value.
    ReadAlreadyPending,
    /// `*WX` was called from a different transaction attempt than the one
    /// that produced the pending decision.
    TransactionMismatch,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::WriteWithoutRead => "write phase called without a prior read phase",
            Self::ReadOutsideTransaction => "read phase called outside an active transaction",
            Self::ReadAlreadyPending => "read phase called twice before the write phase",
            Self::TransactionMismatch => "write phase called from a different transaction",
        };
        f.write_str(msg)
    }
}

/// Unified error type for shard-set generators.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// RX/WX methods were called in an illegal order.
    #[error("{op}: {violation}")]
    Protocol {
        op: &'static str,
        violation: ProtocolViolation,
    },

    /// A precondition on the arguments did not hold.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The caller's context was cancelled.
    #[error("context cancelled")]
    Cancelled,

    /// The caller's context deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The store failed while operating on a shard-set.
    #[error("{collection}/{id}: {source}")]
    Store {
        collection: String,
        id: String,
        #[source]
        source: StoreError,
    },

    /// The store kept reporting conflicts until the retry budget ran out.
    #[error("transaction contention: gave up after {attempts} attempts")]
    Contention { attempts: usize },

    /// A store failure outside of any particular shard-set.
    #[error(transparent)]
    Backend(#[from] StoreError),

    /// A code token could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    pub(crate) const fn protocol(op: &'static str, violation: ProtocolViolation) -> Self {
        Self::Protocol { op, violation }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns the protocol violation, if this error is one.
    pub fn violation(&self) -> Option<ProtocolViolation> {
        match self {
            Self::Protocol { violation, .. } => Some(*violation),
            _ => None,
        }
    }

    /// Whether the error came from the liveness token rather than the work
    /// itself.
    pub fn is_liveness(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Attaches `(collection, id)` to store failures.
pub(crate) trait StoreResultExt<T> {
    fn at(self, collection: &str, id: &str) -> Result<T>;
}

impl<T> StoreResultExt<T> for core::result::Result<T, StoreError> {
    fn at(self, collection: &str, id: &str) -> Result<T> {
        self.map_err(|source| Error::Store {
            collection: collection.to_owned(),
            id: id.to_owned(),
            source,
        })
    }
}
