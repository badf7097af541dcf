use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    IdempotencyEntry, ReconciliationEntry, ReconciliationStatus, Result, SaleId, SagaOperation,
    SagaRecord, StoreError, store::SagaStore,
};

const ACTIVE_SAGA_INDEX: &str = "one_active_saga_per_sale";

const SAGA_COLUMNS: &str = "sale_id, operation, idempotency_key, attempt_count, last_error, state, version, created_at, updated_at";

const RECONCILIATION_COLUMNS: &str =
    "sale_id, operation, attempts, last_error, status, enqueued_at, updated_at, resolved_at, resolved_by, note";

/// PostgreSQL-backed saga store.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        let operation: String = row.try_get("operation")?;
        let state: String = row.try_get("state")?;
        Ok(SagaRecord {
            sale_id: SaleId::from_uuid(row.try_get::<Uuid, _>("sale_id")?),
            operation: operation.parse()?,
            idempotency_key: row.try_get("idempotency_key")?,
            attempt_count: to_u32(row.try_get("attempt_count")?)?,
            last_error: row.try_get("last_error")?,
            state: state.parse()?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_entry(row: PgRow) -> Result<ReconciliationEntry> {
        let operation: String = row.try_get("operation")?;
        let status: String = row.try_get("status")?;
        Ok(ReconciliationEntry {
            sale_id: SaleId::from_uuid(row.try_get::<Uuid, _>("sale_id")?),
            operation: operation.parse()?,
            attempts: to_u32(row.try_get("attempts")?)?,
            last_error: row.try_get("last_error")?,
            status: status.parse()?,
            enqueued_at: row.try_get("enqueued_at")?,
            updated_at: row.try_get("updated_at")?,
            resolved_at: row.try_get("resolved_at")?,
            resolved_by: row.try_get("resolved_by")?,
            note: row.try_get("note")?,
        })
    }

    /// Maps a violation of the active-saga index to the operation holding the slot.
    async fn active_conflict(&self, sale_id: SaleId, err: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.constraint() == Some(ACTIVE_SAGA_INDEX)
        {
            let active = sqlx::query_scalar::<_, String>(
                r#"
                SELECT operation FROM saga_records
                WHERE sale_id = $1
                  AND state IN ('stock_committing', 'cancel_committing', 'stock_sync_pending')
                "#,
            )
            .bind(sale_id.as_uuid())
            .fetch_optional(&self.pool)
            .await;

            if let Ok(Some(op)) = active
                && let Ok(active) = op.parse::<SagaOperation>()
            {
                return StoreError::SagaAlreadyActive { sale_id, active };
            }
        }
        StoreError::Database(err)
    }
}

fn to_u32(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("negative counter {value}")))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn begin_saga(&self, record: &SagaRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO saga_records
                (sale_id, operation, idempotency_key, attempt_count, last_error, state, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8)
            "#,
        )
        .bind(record.sale_id.as_uuid())
        .bind(record.operation.as_str())
        .bind(&record.idempotency_key)
        .bind(to_i32(record.attempt_count))
        .bind(&record.last_error)
        .bind(record.state.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(1),
            Err(sqlx::Error::Database(db_err)) if db_err.constraint() == Some("saga_records_pkey") => {
                Err(StoreError::DuplicateSaga {
                    sale_id: record.sale_id,
                    operation: record.operation,
                })
            }
            Err(e) => Err(self.active_conflict(record.sale_id, e).await),
        }
    }

    async fn get_saga(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<Option<SagaRecord>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM saga_records WHERE sale_id = $1 AND operation = $2"
        ))
        .bind(sale_id.as_uuid())
        .bind(operation.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn update_saga(&self, record: &SagaRecord) -> Result<i64> {
        let updated = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE saga_records
            SET attempt_count = $4, last_error = $5, state = $6, version = version + 1, updated_at = NOW()
            WHERE sale_id = $1 AND operation = $2 AND version = $3
            RETURNING version
            "#,
        )
        .bind(record.sale_id.as_uuid())
        .bind(record.operation.as_str())
        .bind(record.version)
        .bind(to_i32(record.attempt_count))
        .bind(&record.last_error)
        .bind(record.state.as_str())
        .fetch_optional(&self.pool)
        .await;

        let updated = match updated {
            Ok(v) => v,
            Err(e) => return Err(self.active_conflict(record.sale_id, e).await),
        };

        if let Some(version) = updated {
            return Ok(version);
        }

        // No row matched: either the record is gone or another writer got there first.
        match self.get_saga(record.sale_id, record.operation).await? {
            Some(current) => Err(StoreError::ConcurrencyConflict {
                sale_id: record.sale_id,
                operation: record.operation,
                expected: record.version,
                actual: current.version,
            }),
            None => Err(StoreError::NotFound {
                sale_id: record.sale_id,
                operation: record.operation,
            }),
        }
    }

    async fn sagas_for_sale(&self, sale_id: SaleId) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM saga_records WHERE sale_id = $1 ORDER BY created_at ASC"
        ))
        .bind(sale_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn in_flight_sagas(&self) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SAGA_COLUMNS} FROM saga_records
            WHERE state IN ('stock_committing', 'cancel_committing')
            ORDER BY created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn get_outcome(&self, key: &str) -> Result<Option<IdempotencyEntry>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT key, sale_id, operation, outcome, recorded_at
            FROM idempotency_entries
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let operation: String = row.try_get("operation")?;
                Ok(Some(IdempotencyEntry {
                    key: row.try_get("key")?,
                    sale_id: SaleId::from_uuid(row.try_get::<Uuid, _>("sale_id")?),
                    operation: operation.parse()?,
                    outcome: row.try_get("outcome")?,
                    recorded_at: row.try_get("recorded_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_outcome(&self, entry: &IdempotencyEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_entries (key, sale_id, operation, outcome, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&entry.key)
        .bind(entry.sale_id.as_uuid())
        .bind(entry.operation.as_str())
        .bind(&entry.outcome)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn enqueue_reconciliation(&self, entry: &ReconciliationEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO reconciliation_queue
                (sale_id, operation, attempts, last_error, status, enqueued_at, updated_at, resolved_at, resolved_by, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (sale_id, operation) DO NOTHING
            "#,
        )
        .bind(entry.sale_id.as_uuid())
        .bind(entry.operation.as_str())
        .bind(to_i32(entry.attempts))
        .bind(&entry.last_error)
        .bind(entry.status.as_str())
        .bind(entry.enqueued_at)
        .bind(entry.updated_at)
        .bind(entry.resolved_at)
        .bind(&entry.resolved_by)
        .bind(&entry.note)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_reconciliation(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<Option<ReconciliationEntry>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {RECONCILIATION_COLUMNS} FROM reconciliation_queue WHERE sale_id = $1 AND operation = $2"
        ))
        .bind(sale_id.as_uuid())
        .bind(operation.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_entry).transpose()
    }

    async fn update_reconciliation(&self, entry: &ReconciliationEntry) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reconciliation_queue
            SET attempts = $3, last_error = $4, status = $5, updated_at = $6, resolved_at = $7, resolved_by = $8, note = $9
            WHERE sale_id = $1 AND operation = $2
            "#,
        )
        .bind(entry.sale_id.as_uuid())
        .bind(entry.operation.as_str())
        .bind(to_i32(entry.attempts))
        .bind(&entry.last_error)
        .bind(entry.status.as_str())
        .bind(entry.updated_at)
        .bind(entry.resolved_at)
        .bind(&entry.resolved_by)
        .bind(&entry.note)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                sale_id: entry.sale_id,
                operation: entry.operation,
            });
        }
        Ok(())
    }

    async fn list_reconciliation(
        &self,
        status: Option<ReconciliationStatus>,
    ) -> Result<Vec<ReconciliationEntry>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {RECONCILIATION_COLUMNS} FROM reconciliation_queue WHERE status = $1 ORDER BY enqueued_at ASC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {RECONCILIATION_COLUMNS} FROM reconciliation_queue ORDER BY enqueued_at ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_entry).collect()
    }
}
