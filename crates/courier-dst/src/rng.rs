//! Deterministic RNG for simulation
//!
//! TigerStyle: ChaCha20-based RNG for reproducibility.

use courier_core::RngProvider;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Deterministic random number generator
///
/// Given the same seed, produces the same sequence. Drives candidate
/// selection in the registry and probabilistic fault injection.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    rng: Arc<Mutex<ChaCha20Rng>>,
    fork_counter: Arc<AtomicU64>,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            fork_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seed from `DST_SEED` or pick one at random
    ///
    /// Always logs the seed for reproducibility.
    pub fn from_env_or_random() -> Self {
        let seed = seed_from_env_or_random();
        Self::new(seed)
    }

    /// The seed this RNG was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn lock(&self) -> MutexGuard<'_, ChaCha20Rng> {
        // A panicking holder cannot leave ChaCha state half-updated
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn next_u64(&self) -> u64 {
        self.lock().gen()
    }

    pub fn next_f64(&self) -> f64 {
        self.lock().gen()
    }

    /// Random bool with the given probability of true
    pub fn next_bool(&self, probability: f64) -> bool {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );
        self.next_f64() < probability
    }

    /// Random value in [min, max)
    pub fn next_range(&self, min: u64, max: u64) -> u64 {
        debug_assert!(min < max, "min must be less than max");
        min + (self.next_u64() % (max - min))
    }

    pub fn next_index(&self, len: usize) -> usize {
        debug_assert!(len > 0, "length must be positive");
        (self.next_u64() as usize) % len
    }

    pub fn shuffle<T>(&self, slice: &mut [T]) {
        let mut rng = self.lock();
        for i in (1..slice.len()).rev() {
            let j = rng.gen_range(0..=i);
            slice.swap(i, j);
        }
    }

    pub fn choose<'a, T>(&self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            Some(&slice[self.next_index(slice.len())])
        }
    }

    /// Fork an independent stream, seeded deterministically from the parent
    pub fn fork(&self) -> Self {
        let fork_id = self.fork_counter.fetch_add(1, Ordering::SeqCst);
        let fork_seed = self
            .seed
            .wrapping_add(fork_id)
            .wrapping_mul(0x9E3779B97F4A7C15);
        Self::new(fork_seed)
    }
}

impl RngProvider for DeterministicRng {
    fn next_u64(&self) -> u64 {
        DeterministicRng::next_u64(self)
    }

    fn next_f64(&self) -> f64 {
        DeterministicRng::next_f64(self)
    }

    fn gen_index(&self, len: usize) -> usize {
        assert!(len > 0, "cannot pick from an empty collection");
        self.next_index(len)
    }
}

/// Read `DST_SEED` or generate a seed, and log it
pub(crate) fn seed_from_env_or_random() -> u64 {
    let seed = std::env::var("DST_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(rand::random);
    tracing::info!(seed, "DST seed (set DST_SEED={} to replay)", seed);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let a = DeterministicRng::new(42);
        let b = DeterministicRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let a = DeterministicRng::new(1);
        let b = DeterministicRng::new(2);
        let a_values: Vec<u64> = (0..8).map(|_| a.next_u64()).collect();
        let b_values: Vec<u64> = (0..8).map(|_| b.next_u64()).collect();
        assert_ne!(a_values, b_values);
    }

    #[test]
    fn test_fork_is_deterministic() {
        let a = DeterministicRng::new(7);
        let b = DeterministicRng::new(7);
        let fa = a.fork();
        let fb = b.fork();
        assert_eq!(fa.seed(), fb.seed());
        assert_eq!(fa.next_u64(), fb.next_u64());
        assert_ne!(a.fork().seed(), fa.seed());
    }

    #[test]
    fn test_range_and_index_bounds() {
        let rng = DeterministicRng::new(3);
        for _ in 0..1000 {
            let v = rng.next_range(10, 20);
            assert!((10..20).contains(&v));
            assert!(rng.next_index(5) < 5);
        }
    }

    #[test]
    fn test_provider_index_in_bounds() {
        let rng = DeterministicRng::new(9);
        let provider: &dyn RngProvider = &rng;
        for _ in 0..1000 {
            assert!(provider.gen_index(3) < 3);
        }
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let rng = DeterministicRng::new(11);
        let mut values: Vec<u32> = (0..20).collect();
        rng.shuffle(&mut values);
        let mut sorted = values.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }
}
