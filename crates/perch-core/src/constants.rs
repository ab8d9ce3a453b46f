//! Constants for Perch
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Key Schema
// =============================================================================

/// Key prefix used when no custom prefix is configured
pub const KEY_PREFIX_DEFAULT: &str = "perch/registry";

/// Separator between key segments
pub const KEY_SEPARATOR: char = '/';

/// Maximum length of a service name in bytes
pub const SERVICE_NAME_LENGTH_BYTES_MAX: usize = 256;

// =============================================================================
// Leases
// =============================================================================

/// Default lease TTL in seconds
pub const LEASE_TTL_SECS_DEFAULT: i64 = 60;

/// Maximum lease TTL in seconds, matching the etcd server limit
pub const LEASE_TTL_SECS_MAX: i64 = 9_000_000_000;

/// Environment variable overriding the lease TTL (seconds)
pub const ENV_LEASE_TTL: &str = "PERCH_REGISTRY_LEASE_TTL";

/// Keepalive heartbeats are sent this many times per lease TTL
pub const KEEPALIVE_HEARTBEATS_PER_TTL: u64 = 3;

// =============================================================================
// Address Overrides
// =============================================================================

/// Environment variable replacing the registered host
pub const ENV_IP_TO_REGISTRY: &str = "PERCH_IP_TO_REGISTRY";

/// Environment variable replacing the registered port
pub const ENV_PORT_TO_REGISTRY: &str = "PERCH_PORT_TO_REGISTRY";

// =============================================================================
// Store Calls
// =============================================================================

/// Default timeout for a single store call in milliseconds (3 sec)
pub const STORE_CALL_TIMEOUT_MS_DEFAULT: u64 = 3 * 1000;

/// Maximum timeout for a single store call in milliseconds (1 min)
pub const STORE_CALL_TIMEOUT_MS_MAX: u64 = 60 * 1000;

/// Default store endpoint
pub const STORE_ENDPOINT_DEFAULT: &str = "127.0.0.1:2379";

// =============================================================================
// Discovery
// =============================================================================

/// Weight substituted for instances registered with weight <= 0
pub const INSTANCE_WEIGHT_DEFAULT: i64 = 10;

// =============================================================================
// Keep-Register Watchdog
// =============================================================================

/// Default number of consecutive failures before the watchdog gives up
pub const WATCHDOG_ATTEMPTS_COUNT_DEFAULT: u32 = 5;

/// Default delay between key observations in milliseconds (30 sec)
pub const WATCHDOG_OBSERVE_DELAY_MS_DEFAULT: u64 = 30 * 1000;

/// Default delay after a failed observation or heal in milliseconds (10 sec)
pub const WATCHDOG_RETRY_DELAY_MS_DEFAULT: u64 = 10 * 1000;
