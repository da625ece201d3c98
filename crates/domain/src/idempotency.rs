//! Idempotency records and request fingerprinting.

use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 fingerprint of a purchase request's shape, hex-encoded.
///
/// Two requests with the same idempotency key but different fingerprints
/// are a key reuse, rejected as a conflicting payload. Hash input is the
/// user id, the product id, and the quantity, in that order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Computes the fingerprint of a purchase request.
    pub fn compute(user_id: UserId, product_id: &ProductId, quantity: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_uuid().as_bytes());
        hasher.update(product_id.as_str().as_bytes());
        hasher.update(quantity.to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the fingerprint as a hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Does not recompute; for fingerprints loaded from storage.
impl From<String> for RequestFingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Deduplication gate for one idempotency key.
///
/// Inserted atomically before the order is placed; `order_id` is bound once
/// the order exists and the record is immutable from then on. A record whose
/// attempt failed before any order was created is removed so retries of the
/// same key are not wedged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The client-supplied key.
    pub key: IdempotencyKey,

    /// Fingerprint of the request shape the key was first used with.
    pub fingerprint: RequestFingerprint,

    /// The order the key resolved to; None while the first attempt is in
    /// flight.
    pub order_id: Option<OrderId>,

    /// Creation instant; drives retention pruning.
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates an unresolved record for a freshly admitted key.
    pub fn new(key: IdempotencyKey, fingerprint: RequestFingerprint, now: DateTime<Utc>) -> Self {
        Self {
            key,
            fingerprint,
            order_id: None,
            created_at: now,
        }
    }

    /// Returns true once the key is bound to an order.
    pub fn is_resolved(&self) -> bool {
        self.order_id.is_some()
    }
}
