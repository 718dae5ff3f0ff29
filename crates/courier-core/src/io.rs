//! I/O abstraction layer for deterministic simulation testing
//!
//! TigerStyle: All external I/O goes through abstraction traits.
//!
//! Heartbeat timestamps, staleness checks, TTL expiry and random instance
//! selection all depend on time or randomness. Routing them through these
//! traits lets the same registry code run against a wall clock in production
//! and a manually advanced clock in simulation.
//!
//! ```text
//!     ┌───────────────────────────────────────┐
//!     │  Registry / Liveness / MemoryStore    │
//!     └──────────────────┬────────────────────┘
//!                        │
//!     ┌──────────────────▼────────────────────┐
//!     │      TimeProvider, RngProvider        │
//!     └──────────────────┬────────────────────┘
//!           ┌────────────┴────────────┐
//!     ┌─────▼─────┐            ┌─────▼─────┐
//!     │ WallClock │            │ SimClock  │
//!     │ StdRng    │            │ DetRng    │
//!     └───────────┘            └───────────┘
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// Code that needs the current time or a sleep goes through this trait,
/// never `SystemTime::now()` directly.
///
/// # Implementations
///
/// - `WallClockTime`: production, system clock
/// - `SimTime` (in courier-dst): simulation, manually advanced
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);
}

/// Production time provider using the wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number generator abstraction
///
/// # Implementations
///
/// - `StdRngProvider`: production, xorshift seeded from the clock
/// - `DeterministicRng` (in courier-dst): seeded, reproducible
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Generate a random u64
    fn next_u64(&self) -> u64;

    /// Generate a random f64 in [0, 1)
    fn next_f64(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate random boolean with given probability of true
    fn gen_bool(&self, probability: f64) -> bool {
        assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );
        self.next_f64() < probability
    }

    /// Generate random u64 in range [min, max)
    fn gen_range(&self, min: u64, max: u64) -> u64 {
        assert!(min < max, "min must be less than max");
        let range = max - min;
        min + (self.next_u64() % range)
    }

    /// Pick a uniformly random index into a collection of `len` items
    fn gen_index(&self, len: usize) -> usize {
        assert!(len > 0, "cannot pick from an empty collection");
        self.gen_range(0, len as u64) as usize
    }
}

/// Production RNG provider
///
/// Lock-free xorshift64*. Not cryptographically secure.
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    /// Create a new RNG provider seeded from system time
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(seed)
    }

    /// Create with a specific seed
    pub fn with_seed(seed: u64) -> Self {
        // xorshift has a fixed point at zero
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self {
            state: AtomicU64::new(seed),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;

            match self
                .state
                .compare_exchange_weak(state, x, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return x.wrapping_mul(0x2545F4914F6CDD1D),
                Err(s) => state = s,
            }
        }
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of all I/O providers
#[derive(Clone)]
pub struct IoContext {
    pub time: Arc<dyn TimeProvider>,
    pub rng: Arc<dyn RngProvider>,
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("time", &self.time)
            .field("rng", &self.rng)
            .finish()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Production context with wall clock and clock-seeded RNG
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }

    pub fn new(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self { time, rng }
    }

    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    pub async fn sleep_ms(&self, ms: u64) {
        self.time.sleep_ms(ms).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
