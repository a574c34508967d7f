mod coder;
mod counter;
mod interface;
mod serial;

pub use coder::*;
pub use counter::*;
pub use interface::*;
pub use serial::*;

#[cfg(test)]
mod tests;

use crate::Snapshot;

/// Reads a non-negative counter field, treating absence as zero.
fn stored_count(doc: Option<&Snapshot>, field: &str) -> u64 {
    doc.and_then(|d| d.int(field))
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}
