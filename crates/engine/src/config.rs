//! Engine configuration loaded from environment variables.

use std::time::Duration;

/// Floor for idempotency record retention. Shorter retention would let a
/// key be reclaimed while its client could still legitimately retry.
pub const MIN_KEY_RETENTION_HOURS: u64 = 48;

/// Flash-sale engine tuning with sensible defaults.
///
/// Reads from environment variables:
/// - `RESERVATION_TTL_SECONDS` — how long a PENDING reservation holds stock (default: `900`)
/// - `LOCK_WAIT_MS` — bound on waiting for store row locks (default: `250`)
/// - `SWEEP_INTERVAL_SECONDS` — expiry sweeper period (default: `30`)
/// - `SWEEP_BATCH_SIZE` — max orders expired per sweeper pass (default: `100`)
/// - `CANCEL_WINDOW_HOURS` — how long a confirmed order stays cancellable (default: `24`)
/// - `LOW_STOCK_THRESHOLD` — largest `available` still reported as low stock (default: `10`)
/// - `KEY_RETENTION_HOURS` — idempotency record retention, clamped to at least 48 (default: `48`)
/// - `MAX_QUANTITY_PER_ORDER` — per-order quantity cap (default: `10`)
#[derive(Debug, Clone)]
pub struct SaleConfig {
    pub reservation_ttl: chrono::Duration,
    pub lock_wait: Duration,
    pub sweep_interval: Duration,
    pub sweep_batch_size: usize,
    pub cancel_window: chrono::Duration,
    pub low_stock_threshold: u32,
    pub key_retention: chrono::Duration,
    pub max_quantity_per_order: u32,
}

impl SaleConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            reservation_ttl: chrono::Duration::seconds(
                env_u64("RESERVATION_TTL_SECONDS", 900) as i64
            ),
            lock_wait: Duration::from_millis(env_u64("LOCK_WAIT_MS", 250)),
            sweep_interval: Duration::from_secs(env_u64("SWEEP_INTERVAL_SECONDS", 30)),
            sweep_batch_size: env_u64("SWEEP_BATCH_SIZE", 100) as usize,
            cancel_window: chrono::Duration::hours(env_u64("CANCEL_WINDOW_HOURS", 24) as i64),
            low_stock_threshold: env_u64("LOW_STOCK_THRESHOLD", 10) as u32,
            key_retention: retention_from_hours(env_u64(
                "KEY_RETENTION_HOURS",
                MIN_KEY_RETENTION_HOURS,
            )),
            max_quantity_per_order: env_u64("MAX_QUANTITY_PER_ORDER", 10) as u32,
        }
    }

    /// Sets the idempotency record retention, clamped to the 48-hour floor.
    pub fn with_key_retention_hours(mut self, hours: u64) -> Self {
        self.key_retention = retention_from_hours(hours);
        self
    }
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: chrono::Duration::seconds(900),
            lock_wait: Duration::from_millis(250),
            sweep_interval: Duration::from_secs(30),
            sweep_batch_size: 100,
            cancel_window: chrono::Duration::hours(24),
            low_stock_threshold: 10,
            key_retention: chrono::Duration::hours(MIN_KEY_RETENTION_HOURS as i64),
            max_quantity_per_order: 10,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn retention_from_hours(hours: u64) -> chrono::Duration {
    chrono::Duration::hours(hours.max(MIN_KEY_RETENTION_HOURS) as i64)
}
