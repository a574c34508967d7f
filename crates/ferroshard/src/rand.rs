use core::sync::atomic::{AtomicUsize, Ordering};

use ::rand::{Rng, rng};

/// A trait for random sources that pick shard indices.
///
/// This abstraction allows you to plug in a real random source or a mocked
/// random source in tests.
///
/// # Example
/// ```
/// use ferroshard::RandSource;
///
/// struct AlwaysThree;
/// impl RandSource for AlwaysThree {
///     fn pick(&self, bound: u32) -> u32 {
///         3 % bound
///     }
/// }
///
/// assert_eq!(AlwaysThree.pick(10), 3);
/// ```
pub trait RandSource {
    /// Returns an index in `0..bound`. Callers never pass `bound == 0`.
    fn pick(&self, bound: u32) -> u32;
}

/// A `RandSource` that uses the thread-local RNG (`rand::rng()`).
///
/// This type does **not** store the RNG itself; it simply accesses the
/// thread-local generator on each call, so it may be freely shared across
/// threads.
#[derive(Default, Clone, Copy, Debug)]
pub struct ThreadRandom;

impl RandSource for ThreadRandom {
    fn pick(&self, bound: u32) -> u32 {
        rng().random_range(0..bound)
    }
}

/// A deterministic `RandSource` that replays `picks` in order, wrapping
/// around when exhausted. Every pick is reduced modulo `bound`.
///
/// Useful for tests that need to know which shard a call lands on.
#[derive(Debug)]
pub struct ScriptedRandom {
    picks: Vec<u32>,
    cursor: AtomicUsize,
}

impl ScriptedRandom {
    pub fn new(picks: impl Into<Vec<u32>>) -> Self {
        let picks = picks.into();
        Self {
            picks: if picks.is_empty() { vec![0] } else { picks },
            cursor: AtomicUsize::new(0),
        }
    }
}

impl RandSource for ScriptedRandom {
    fn pick(&self, bound: u32) -> u32 {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.picks.len();
        self.picks[i] % bound
    }
}

impl<R: RandSource + ?Sized> RandSource for &R {
    fn pick(&self, bound: u32) -> u32 {
        (**self).pick(bound)
    }
}
