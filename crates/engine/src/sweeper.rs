//! Background sweeper for overdue reservations and stale idempotency records.

use chrono::{DateTime, Utc};
use domain::FinalizeDecision;
use store::{FinalizeOutcome, SaleStore, StoreError};

use crate::config::SaleConfig;

/// Expires overdue PENDING orders and prunes aged idempotency records.
///
/// Expiry goes through the store's finalize path, the same one payment
/// outcomes use. Its still-pending guard means a candidate settled by a
/// racing outcome is skipped, never released twice.
pub struct Sweeper<S: SaleStore> {
    store: S,
    interval: std::time::Duration,
    batch_size: usize,
    key_retention: chrono::Duration,
}

impl<S: SaleStore> Sweeper<S> {
    /// Creates a sweeper from the engine configuration.
    pub fn new(store: S, config: &SaleConfig) -> Self {
        Self {
            store,
            interval: config.sweep_interval,
            batch_size: config.sweep_batch_size,
            key_retention: config.key_retention,
        }
    }

    /// Runs one sweep pass. Returns the number of orders expired.
    ///
    /// At most one batch of candidates is processed; the next pass picks
    /// up the rest. A locked row is deferred to the next pass rather than
    /// waited on.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let candidates = self.store.find_expired(now, self.batch_size).await?;
        let mut expired = 0usize;

        for order_id in candidates {
            match self
                .store
                .finalize_order(order_id, FinalizeDecision::Expire, now)
                .await
            {
                Ok(FinalizeOutcome::Applied(_)) => {
                    expired += 1;
                    metrics::counter!("orders_expired_total").increment(1);
                }
                // Settled between the scan and the lock; nothing to do.
                Ok(FinalizeOutcome::AlreadyTerminal(_)) | Ok(FinalizeOutcome::NotFound) => {}
                Err(err) if err.is_retryable() => {
                    tracing::debug!(%order_id, "expiry deferred, row busy");
                }
                Err(err) => return Err(err),
            }
        }

        if expired > 0 {
            tracing::info!(expired, "expiry sweep released overdue reservations");
        }
        Ok(expired)
    }

    /// Runs the periodic sweep loop until `shutdown` flips to true.
    ///
    /// Each tick sweeps one batch and prunes idempotency records past
    /// their retention. Errors are logged and the loop keeps going.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            batch_size = self.batch_size,
            "expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if let Err(err) = self.sweep_once(now).await {
                        tracing::warn!(error = %err, "expiry sweep failed");
                    }
                    if let Err(err) = self.store.prune_keys(now - self.key_retention).await {
                        tracing::warn!(error = %err, "idempotency record pruning failed");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        tracing::info!("expiry sweeper stopped");
                        return;
                    }
                }
            }
        }
    }
}
