//! TigerStyle constants for Courier
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Identifier Limits
// =============================================================================

/// Maximum length of an instance ID in bytes
pub const INSTANCE_ID_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of a user ID in bytes
pub const USER_ID_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of an instance connection address in bytes
pub const INSTANCE_ADDRESS_LENGTH_BYTES_MAX: usize = 2048;

/// Maximum length of the store key namespace in bytes
pub const KEY_NAMESPACE_LENGTH_BYTES_MAX: usize = 64;

// =============================================================================
// Heartbeat
// =============================================================================

/// Default heartbeat write period in milliseconds (1 sec)
pub const HEARTBEAT_INTERVAL_MS_DEFAULT: u64 = 1000;

/// Minimum heartbeat write period in milliseconds
pub const HEARTBEAT_INTERVAL_MS_MIN: u64 = 100;

/// Maximum heartbeat write period in milliseconds (1 min)
pub const HEARTBEAT_INTERVAL_MS_MAX: u64 = 60 * 1000;

/// Default TTL on the heartbeat record in milliseconds (5 sec)
pub const HEARTBEAT_TTL_MS_DEFAULT: u64 = 5 * 1000;

/// Default bound on a single heartbeat write in milliseconds
pub const HEARTBEAT_WRITE_TIMEOUT_MS_DEFAULT: u64 = 800;

// =============================================================================
// Liveness
// =============================================================================

/// Default age after which a heartbeat is stale in milliseconds (3 sec)
pub const LIVENESS_STALENESS_THRESHOLD_MS_DEFAULT: u64 = 3 * 1000;

/// Staleness threshold must be at least this multiple of the heartbeat
/// interval, expressed as a ratio (numerator / denominator) = 1.5
pub const LIVENESS_THRESHOLD_INTERVAL_RATIO_NUMERATOR: u64 = 3;
pub const LIVENESS_THRESHOLD_INTERVAL_RATIO_DENOMINATOR: u64 = 2;

// =============================================================================
// Registry
// =============================================================================

/// Default number of random draws before giving up on selection
pub const ASSIGNMENT_SELECTION_ATTEMPTS_DEFAULT: u32 = 10;

/// Maximum configurable number of random draws
pub const ASSIGNMENT_SELECTION_ATTEMPTS_MAX: u32 = 100;

/// Maximum number of keys fetched per SCAN round during reconcile
pub const RECONCILE_SCAN_BATCH_COUNT_MAX: usize = 500;

// =============================================================================
// Expiration Listener
// =============================================================================

/// Delay before resubscribing after the expiration stream ends (1 sec)
pub const LISTENER_RESUBSCRIBE_DELAY_MS_DEFAULT: u64 = 1000;

/// Capacity of the in-process expiration notification channel
pub const EXPIRATION_CHANNEL_CAPACITY_COUNT: usize = 1024;

// =============================================================================
// Worker Registration
// =============================================================================

/// Initial backoff after a failed registration attempt (2 sec)
pub const REGISTRATION_BACKOFF_MS_INITIAL: u64 = 2 * 1000;

/// Cap on the registration backoff (30 sec)
pub const REGISTRATION_BACKOFF_MS_MAX: u64 = 30 * 1000;

/// Default period between re-registrations once accepted (30 sec)
pub const REGISTRATION_REFRESH_INTERVAL_MS_DEFAULT: u64 = 30 * 1000;

// =============================================================================
// Server
// =============================================================================

/// Default HTTP bind address for the registry server
pub const SERVER_BIND_ADDRESS_DEFAULT: &str = "0.0.0.0:8080";

/// Default Redis connection URL
pub const REDIS_URL_DEFAULT: &str = "redis://127.0.0.1:6379";

/// Period between TTL sweeps of the in-memory store backend
pub const MEMORY_SWEEP_INTERVAL_MS_DEFAULT: u64 = 250;

// =============================================================================
// Deterministic Simulation
// =============================================================================

/// Maximum simulated time for a single DST run (24 hours)
pub const DST_TIME_MS_MAX: u64 = 24 * 60 * 60 * 1000;

/// Simulated clock start, 2024-01-01T00:00:00Z
pub const DST_CLOCK_START_MS_DEFAULT: u64 = 1_704_067_200_000;

// Compile-time assertions
const _: () = {
    assert!(HEARTBEAT_INTERVAL_MS_DEFAULT >= HEARTBEAT_INTERVAL_MS_MIN);
    assert!(HEARTBEAT_INTERVAL_MS_DEFAULT <= HEARTBEAT_INTERVAL_MS_MAX);
    assert!(HEARTBEAT_WRITE_TIMEOUT_MS_DEFAULT < HEARTBEAT_INTERVAL_MS_DEFAULT);
    assert!(HEARTBEAT_TTL_MS_DEFAULT > HEARTBEAT_INTERVAL_MS_DEFAULT);
    assert!(
        LIVENESS_STALENESS_THRESHOLD_MS_DEFAULT * LIVENESS_THRESHOLD_INTERVAL_RATIO_DENOMINATOR
            >= HEARTBEAT_INTERVAL_MS_DEFAULT * LIVENESS_THRESHOLD_INTERVAL_RATIO_NUMERATOR
    );
    assert!(ASSIGNMENT_SELECTION_ATTEMPTS_DEFAULT >= 1);
    assert!(ASSIGNMENT_SELECTION_ATTEMPTS_DEFAULT <= ASSIGNMENT_SELECTION_ATTEMPTS_MAX);
    assert!(REGISTRATION_BACKOFF_MS_INITIAL < REGISTRATION_BACKOFF_MS_MAX);
};
