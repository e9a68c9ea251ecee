//! Random sources used to pick a beverage.
//!
//! The selector never reaches for a global generator. It is handed a
//! [`RandomSource`] when it is built, so tests can swap in a predictable one.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

/// A source of uniformly distributed indexes.
///
/// Implementations are shared between server tasks, so they must be usable
/// from many threads at once.
pub trait RandomSource: Send + Sync {
    /// Returns an index in `0..len`. Callers never pass `len == 0`.
    fn pick(&self, len: usize) -> usize;
}

impl<T: RandomSource + ?Sized> RandomSource for Arc<T> {
    fn pick(&self, len: usize) -> usize {
        (**self).pick(len)
    }
}

impl<T: RandomSource + ?Sized> RandomSource for Box<T> {
    fn pick(&self, len: usize) -> usize {
        (**self).pick(len)
    }
}

/// Draws from the calling thread's generator.
///
/// Every worker thread owns its own generator, so concurrent requests never
/// contend on a lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// A single seeded generator behind a mutex.
///
/// Two sources built from the same seed produce the same sequence of picks.
#[derive(Debug)]
pub struct SeededRandom {
    seed: u64,
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Seeds from the wall clock, once, at construction.
    pub fn from_time() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        Self::new(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for SeededRandom {
    fn pick(&self, len: usize) -> usize {
        // A panic while holding the lock cannot leave StdRng half-updated.
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..len)
    }
}
