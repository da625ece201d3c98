use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId, ProductId, UserId};
use domain::{
    FinalizeDecision, IdempotencyRecord, InventoryError, InventoryLine, LedgerEffect, Money,
    Order, OrderStatus, RequestFingerprint, SaleWindow,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    memory::DEFAULT_LOCK_WAIT,
    store::{
        CancelOutcome, FinalizeOutcome, KeyAdmission, OrderDraft, PlacementOutcome, SaleStore,
    },
};

/// How many times `admit_key` retries its insert-then-read pair before
/// reporting contention.
const ADMIT_ATTEMPTS: usize = 3;

/// PostgreSQL-backed sale store.
///
/// Every composite operation runs in a single transaction with
/// `SET LOCAL lock_timeout`, so a request stuck behind a hot row fails fast
/// with [`StoreError::LockTimeout`] instead of queueing. Operations that
/// touch an order and its inventory line lock the order row first, then the
/// line; placement locks only the line. Multi-line callers must present
/// products in ascending order (see [`crate::store::lock_plan`]).
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_wait: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL sale store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Sets the per-transaction bound on waiting for row locks.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        // lock_timeout does not accept bind parameters; the value is our own
        // integer, not caller input.
        let millis = self.lock_wait.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    fn lock_error(&self, err: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.code().as_deref() == Some("55P03")
        {
            return StoreError::LockTimeout(self.lock_wait);
        }
        StoreError::Database(err)
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status_raw: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status_raw).ok_or_else(|| {
            StoreError::Integrity(format!("unknown order status in storage: {status_raw}"))
        })?;
        let quantity: i64 = row.try_get("quantity")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: quantity as u32,
            unit_price_snapshot: Money::from_cents(row.try_get("unit_price_cents")?),
            idempotency_key: IdempotencyKey::from(row.try_get::<String, _>("idempotency_key")?),
            status,
            payment_ref: row.try_get("payment_ref")?,
            refund_due: row.try_get("refund_due")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            reservation_deadline: row.try_get("reservation_deadline")?,
        })
    }

    fn row_to_line(row: PgRow) -> Result<InventoryLine> {
        let available: i64 = row.try_get("available")?;
        let reserved: i64 = row.try_get("reserved")?;
        let committed: i64 = row.try_get("committed")?;
        let version: i64 = row.try_get("version")?;

        Ok(InventoryLine {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            available: available as u32,
            reserved: reserved as u32,
            committed: committed as u32,
            version: version as u64,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            window: SaleWindow {
                opens_at: row.try_get("opens_at")?,
                closes_at: row.try_get("closes_at")?,
            },
        })
    }

    fn row_to_record(row: PgRow) -> Result<IdempotencyRecord> {
        Ok(IdempotencyRecord {
            key: IdempotencyKey::from(row.try_get::<String, _>("key")?),
            fingerprint: RequestFingerprint::from(row.try_get::<String, _>("fingerprint")?),
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl SaleStore for PostgresStore {
    async fn admit_key(&self, record: IdempotencyRecord) -> Result<KeyAdmission> {
        // Insert-or-read as two statements. Under READ COMMITTED the read
        // can miss a conflicting row that was inserted and rolled back in
        // between, so the pair is retried a bounded number of times.
        for _ in 0..ADMIT_ATTEMPTS {
            let inserted = sqlx::query(
                r#"
                INSERT INTO idempotency_keys (key, fingerprint, order_id, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (key) DO NOTHING
                "#,
            )
            .bind(record.key.as_str())
            .bind(record.fingerprint.as_str())
            .bind(record.order_id.map(|id| id.as_uuid()))
            .bind(record.created_at)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if inserted == 1 {
                return Ok(KeyAdmission::Inserted);
            }

            let row = sqlx::query(
                r#"
                SELECT key, fingerprint, order_id, created_at
                FROM idempotency_keys
                WHERE key = $1
                "#,
            )
            .bind(record.key.as_str())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                return Ok(KeyAdmission::Existing(Self::row_to_record(row)?));
            }
        }

        Err(StoreError::LockTimeout(self.lock_wait))
    }

    async fn release_key(&self, key: &IdempotencyKey) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND order_id IS NULL")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reserve_and_place(&self, draft: OrderDraft) -> Result<PlacementOutcome> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT product_id, available, reserved, committed, version, unit_price_cents,
                   opens_at, closes_at
            FROM inventory_lines
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(draft.product_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| self.lock_error(e))?;

        let Some(row) = row else {
            return Ok(PlacementOutcome::UnknownProduct {
                product_id: draft.product_id,
            });
        };
        let mut line = Self::row_to_line(row)?;

        if !line.is_open(draft.placed_at) {
            return Ok(PlacementOutcome::WindowClosed {
                product_id: draft.product_id,
            });
        }

        match line.reserve(draft.quantity) {
            Ok(()) => {}
            Err(InventoryError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => {
                return Ok(PlacementOutcome::InsufficientStock {
                    product_id,
                    requested,
                    available,
                });
            }
            Err(err) => return Err(StoreError::Integrity(err.to_string())),
        }

        sqlx::query(
            r#"
            UPDATE inventory_lines
            SET available = $2, reserved = $3, version = $4
            WHERE product_id = $1
            "#,
        )
        .bind(line.product_id.as_str())
        .bind(line.available as i64)
        .bind(line.reserved as i64)
        .bind(line.version as i64)
        .execute(&mut *tx)
        .await?;

        let order = Order::place(
            draft.order_id,
            draft.user_id,
            draft.product_id.clone(),
            draft.quantity,
            line.unit_price,
            draft.idempotency_key.clone(),
            draft.placed_at,
            draft.reservation_deadline,
        );

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, product_id, quantity, unit_price_cents,
                                idempotency_key, status, payment_ref, refund_due,
                                created_at, updated_at, reservation_deadline)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.product_id.as_str())
        .bind(order.quantity as i64)
        .bind(order.unit_price_snapshot.cents())
        .bind(order.idempotency_key.as_str())
        .bind(order.status.as_str())
        .bind(&order.payment_ref)
        .bind(order.refund_due)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.reservation_deadline)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_idempotency_key")
            {
                return StoreError::Integrity(format!(
                    "key {} is already bound to an order",
                    order.idempotency_key
                ));
            }
            self.lock_error(e)
        })?;

        let bound = sqlx::query(
            "UPDATE idempotency_keys SET order_id = $2 WHERE key = $1 AND order_id IS NULL",
        )
        .bind(order.idempotency_key.as_str())
        .bind(order.id.as_uuid())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if bound != 1 {
            return Err(StoreError::Integrity(format!(
                "no unresolved admission record for key {}",
                order.idempotency_key
            )));
        }

        tx.commit().await?;
        Ok(PlacementOutcome::Placed(order))
    }

    async fn finalize_order(
        &self,
        order_id: OrderId,
        decision: FinalizeDecision,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        let mut tx = self.begin().await?;

        // Order row first, then the inventory line. Every writer that
        // touches both tables takes locks in this order.
        let row = sqlx::query(
            r#"
            SELECT id, user_id, product_id, quantity, unit_price_cents, idempotency_key,
                   status, payment_ref, refund_due, created_at, updated_at, reservation_deadline
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| self.lock_error(e))?;

        let Some(row) = row else {
            return Ok(FinalizeOutcome::NotFound);
        };
        let mut order = Self::row_to_order(row)?;
        if !order.status.can_finalize() {
            return Ok(FinalizeOutcome::AlreadyTerminal(order.status));
        }

        let effect = order
            .finalize(decision, now)
            .map_err(|err| StoreError::Integrity(err.to_string()))?;

        let line_row = sqlx::query(
            r#"
            SELECT product_id, available, reserved, committed, version, unit_price_cents,
                   opens_at, closes_at
            FROM inventory_lines
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(order.product_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| self.lock_error(e))?;

        let Some(line_row) = line_row else {
            return Err(StoreError::Integrity(format!(
                "order {} references missing inventory line {}",
                order.id, order.product_id
            )));
        };
        let mut line = Self::row_to_line(line_row)?;
        match &effect {
            LedgerEffect::Commit { quantity, .. } => line.commit(*quantity),
            LedgerEffect::Release { quantity, .. } => line.release(*quantity),
        }
        .map_err(|err| StoreError::Integrity(err.to_string()))?;

        sqlx::query(
            r#"
            UPDATE inventory_lines
            SET available = $2, reserved = $3, committed = $4, version = $5
            WHERE product_id = $1
            "#,
        )
        .bind(line.product_id.as_str())
        .bind(line.available as i64)
        .bind(line.reserved as i64)
        .bind(line.committed as i64)
        .bind(line.version as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_ref = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(&order.payment_ref)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(FinalizeOutcome::Applied(order))
    }

    async fn cancel_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, product_id, quantity, unit_price_cents, idempotency_key,
                   status, payment_ref, refund_due, created_at, updated_at, reservation_deadline
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| self.lock_error(e))?;

        let Some(row) = row else {
            return Ok(CancelOutcome::NotFound);
        };
        let mut order = Self::row_to_order(row)?;
        if let Err(err) = order.cancel(user_id, window, now) {
            return Ok(CancelOutcome::Rejected(err));
        }

        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, refund_due = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.refund_due)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CancelOutcome::Cancelled(order))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, product_id, quantity, unit_price_cents, idempotency_key,
                   status, payment_ref, refund_due, created_at, updated_at, reservation_deadline
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_inventory(&self, product_id: &ProductId) -> Result<Option<InventoryLine>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, available, reserved, committed, version, unit_price_cents,
                   opens_at, closes_at
            FROM inventory_lines
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_line).transpose()
    }

    async fn seed_inventory(&self, line: InventoryLine) -> Result<()> {
        // On re-seed, reserved and committed belong to live orders and are
        // never overwritten.
        sqlx::query(
            r#"
            INSERT INTO inventory_lines (product_id, available, reserved, committed, version,
                                         unit_price_cents, opens_at, closes_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (product_id) DO UPDATE SET
                available = EXCLUDED.available,
                unit_price_cents = EXCLUDED.unit_price_cents,
                opens_at = EXCLUDED.opens_at,
                closes_at = EXCLUDED.closes_at,
                version = inventory_lines.version + 1
            "#,
        )
        .bind(line.product_id.as_str())
        .bind(line.available as i64)
        .bind(line.reserved as i64)
        .bind(line.committed as i64)
        .bind(line.version as i64)
        .bind(line.unit_price.cents())
        .bind(line.window.opens_at)
        .bind(line.window.closes_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OrderId>> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM orders
            WHERE status = 'pending' AND reservation_deadline < $1
            ORDER BY reservation_deadline ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(OrderId::from_uuid(row.try_get::<Uuid, _>("id")?)))
            .collect()
    }

    async fn prune_keys(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
