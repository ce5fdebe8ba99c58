//! Randomness capability.
//!
//! Everything that draws randomness (key generation, short identifiers,
//! connection ids, SNI and short-id selection) takes a `RandomSource`
//! instead of reaching for a global RNG, so tests can substitute a seeded one.

use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};

/// Source of cryptographically secure randomness
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);

    /// Uniform integer in `0..bound`. `bound` must be non-zero.
    fn below(&self, bound: usize) -> usize;

    /// Uniformly pick one element, `None` for an empty slice
    fn choose<'a, T>(&self, items: &'a [T]) -> Option<&'a T>
    where
        Self: Sized,
    {
        pick(self, items)
    }
}

/// `choose` for trait objects
pub fn pick<'a, T, R: RandomSource + ?Sized>(rng: &R, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        items.get(rng.below(items.len()))
    }
}

/// Random string of `len` characters drawn from `alphabet`
pub fn token<R: RandomSource + ?Sized>(rng: &R, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| alphabet[rng.below(alphabet.len())] as char)
        .collect()
}

/// Operating-system RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    fn below(&self, bound: usize) -> usize {
        OsRng.gen_range(0..bound)
    }
}

/// Deterministic RNG for tests and reproducible runs
pub struct SeededRandom {
    inner: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl std::fmt::Debug for SeededRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRandom").finish_non_exhaustive()
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        self.inner.lock().fill_bytes(dest);
    }

    fn below(&self, bound: usize) -> usize {
        self.inner.lock().gen_range(0..bound)
    }
}
