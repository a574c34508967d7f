//! The two-phase read/write protocol shared by every generator.
//!
//! Stores that forbid reading after writing inside a transaction force every
//! decision to be made up front. Each generator therefore exposes a pair of
//! methods: `*_rx` performs all reads and parks a decision in a [`Phase`],
//! `*_wx` takes that decision back out and performs the writes.
//!
//! ```text
//!            rx (same tx)                wx (same tx)
//!   Idle ─────────────────▶ ReadPending ─────────────▶ Idle
//!                              │  rx (same tx)  → ReadAlreadyPending
//!                              │  rx (new tx)   → stale decision dropped
//!                              │  wx (other tx) → TransactionMismatch
//! ```

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::{Error, ProtocolViolation, Result, Transaction};

/// RX/WX state of one generator instance.
///
/// Not synchronized: one instance supports exactly one in-flight read/write
/// pair at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase<D> {
    Idle,
    ReadPending {
        /// Attempt id of the transaction the decision was read in.
        tx: u64,
        decision: D,
    },
}

impl<D> Default for Phase<D> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<D> Phase<D> {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Validates that `tx` may start a read phase.
    ///
    /// A decision left behind by an earlier attempt (the store re-ran the
    /// body, or the caller abandoned a transaction) is discarded. A decision
    /// from this very attempt is not: reading again would observe a value the
    /// pending write has not bumped yet.
    ///
    /// # Errors
    ///
    /// - [`ProtocolViolation::ReadOutsideTransaction`] if `tx` is closed.
    /// - [`ProtocolViolation::ReadAlreadyPending`] if this attempt already
    ///   holds a decision.
    pub fn ensure_readable<T>(&mut self, op: &'static str, tx: &T) -> Result<()>
    where
        T: Transaction + ?Sized,
    {
        if !tx.is_active() {
            return Err(Error::protocol(op, ProtocolViolation::ReadOutsideTransaction));
        }
        match self {
            Self::ReadPending { tx: pending, .. } if *pending == tx.id() => {
                Err(Error::protocol(op, ProtocolViolation::ReadAlreadyPending))
            }
            Self::ReadPending { tx: _stale, .. } => {
                #[cfg(feature = "tracing")]
                debug!(
                    op,
                    stale = *_stale,
                    tx = tx.id(),
                    "dropping decision from an earlier attempt"
                );
                *self = Self::Idle;
                Ok(())
            }
            Self::Idle => Ok(()),
        }
    }

    /// Parks `decision` for `tx`. Must follow a successful
    /// [`Phase::ensure_readable`] and the reads it guarded.
    pub fn park<T: Transaction + ?Sized>(&mut self, tx: &T, decision: D) {
        *self = Self::ReadPending {
            tx: tx.id(),
            decision,
        };
    }

    /// Takes the parked decision out, returning the phase to idle.
    ///
    /// # Errors
    ///
    /// - [`ProtocolViolation::WriteWithoutRead`] if nothing is parked.
    /// - [`ProtocolViolation::TransactionMismatch`] if the decision belongs
    ///   to another attempt. The decision stays parked.
    pub fn take<T: Transaction + ?Sized>(&mut self, op: &'static str, tx: &T) -> Result<D> {
        match self {
            Self::Idle => Err(Error::protocol(op, ProtocolViolation::WriteWithoutRead)),
            Self::ReadPending { tx: pending, .. } if *pending != tx.id() => {
                Err(Error::protocol(op, ProtocolViolation::TransactionMismatch))
            }
            Self::ReadPending { .. } => match core::mem::replace(self, Self::Idle) {
                Self::ReadPending { decision, .. } => Ok(decision),
                Self::Idle => Err(Error::protocol(op, ProtocolViolation::WriteWithoutRead)),
            },
        }
    }

    /// Forgets any parked decision.
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }
}
