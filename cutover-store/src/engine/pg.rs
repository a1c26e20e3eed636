use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::{
    engine::Engine,
    error::{Result, StoreError},
    event::MigrationEvent,
    record::{MigrationRecord, MigrationStatus},
    store::Store,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    prefix: Option<String>,
}

impl PgStore {
    pub fn new(pool: &PgPool) -> Store {
        Store::new(Self {
            pool: pool.clone(),
            prefix: None,
        })
    }

    pub fn with_prefix(pool: &PgPool, prefix: impl Into<String>) -> Store {
        Store::new(Self {
            pool: pool.clone(),
            prefix: Some(prefix.into()),
        })
    }

    /// Creates the tables when missing and returns a store over them.
    pub async fn install(pool: &PgPool) -> Result<Store> {
        let engine = Self {
            pool: pool.clone(),
            prefix: None,
        };
        engine.setup().await?;

        Ok(Store::new(engine))
    }

    pub async fn install_with_prefix(pool: &PgPool, prefix: impl Into<String>) -> Result<Store> {
        let engine = Self {
            pool: pool.clone(),
            prefix: Some(prefix.into()),
        };
        engine.setup().await?;

        Ok(Store::new(engine))
    }

    pub fn table(&self, name: impl Into<String>) -> String {
        format!(
            "{}_{}",
            self.prefix.as_ref().unwrap_or(&"zdm".to_owned()),
            name.into()
        )
    }

    pub fn table_migrations(&self) -> String {
        self.table("migration")
    }

    pub fn table_events(&self) -> String {
        self.table("migration_event")
    }

    async fn setup(&self) -> Result<()> {
        let table_migrations = self.table_migrations();
        let table_events = self.table_events();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table_migrations} (
                    workspace_id VARCHAR(255) PRIMARY KEY,
                    source_table VARCHAR(255) NOT NULL,
                    target_table VARCHAR(255) NOT NULL,
                    status VARCHAR(30) NOT NULL,
                    dual_write_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                    backfill_batch_size INTEGER NOT NULL,
                    backfill_progress DOUBLE PRECISION NOT NULL DEFAULT 0,
                    backfill_processed_rows BIGINT NOT NULL DEFAULT 0,
                    backfill_total_rows BIGINT NOT NULL DEFAULT 0,
                    backfill_last_id TEXT NULL,
                    parity_score DOUBLE PRECISION NOT NULL DEFAULT 0,
                    last_verified_at TIMESTAMPTZ NULL,
                    error_message TEXT NULL,
                    error_count INTEGER NOT NULL DEFAULT 0,
                    version INTEGER NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )
                "#
            )
            .as_str(),
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table_events} (
                    id UUID PRIMARY KEY,
                    seq BIGSERIAL NOT NULL,
                    workspace_id VARCHAR(255) NOT NULL,
                    event_type VARCHAR(30) NOT NULL,
                    detail JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                )
                "#
            )
            .as_str(),
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            format!(
                "CREATE INDEX IF NOT EXISTS {table_events}_workspace_idx ON {table_events} (workspace_id, created_at)"
            )
            .as_str(),
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn insert_events(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        events: &[MigrationEvent],
    ) -> Result<()> {
        let table_events = self.table_events();

        for events in events.chunks(100) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table_events} (id, workspace_id, event_type, detail, created_at) "
            ));

            query_builder.push_values(events, |mut b, event| {
                b.push_bind(event.id)
                    .push_bind(event.workspace_id.to_owned())
                    .push_bind(event.event_type.to_string())
                    .push_bind(event.detail.clone())
                    .push_bind(event.created_at);
            });

            query_builder.build().execute(&mut **tx).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Engine for PgStore {
    async fn get(&self, workspace_id: &'_ str) -> Result<Option<MigrationRecord>> {
        let table_migrations = self.table_migrations();

        let row = sqlx::query_as::<_, RecordRow>(
            format!("SELECT * FROM {table_migrations} WHERE workspace_id = $1").as_str(),
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MigrationRecord::try_from).transpose()
    }

    async fn list(&self, status: Option<MigrationStatus>) -> Result<Vec<MigrationRecord>> {
        let table_migrations = self.table_migrations();

        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, RecordRow>(
                    format!(
                        "SELECT * FROM {table_migrations} WHERE status = $1 ORDER BY created_at ASC, workspace_id ASC"
                    )
                    .as_str(),
                )
                .bind(status.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RecordRow>(
                    format!(
                        "SELECT * FROM {table_migrations} ORDER BY created_at ASC, workspace_id ASC"
                    )
                    .as_str(),
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(MigrationRecord::try_from).collect()
    }

    async fn write(
        &self,
        mut record: MigrationRecord,
        original_version: u32,
        events: Vec<MigrationEvent>,
    ) -> Result<MigrationRecord> {
        let table_migrations = self.table_migrations();
        let mut tx = self.pool.begin().await?;

        record.version = original_version + 1;
        let row = RecordRow::try_from(record.clone())?;

        let rows_affected = if original_version == 0 {
            sqlx::query(
                format!(
                    r#"
                    INSERT INTO {table_migrations} (
                        workspace_id, source_table, target_table, status, dual_write_enabled,
                        backfill_batch_size, backfill_progress, backfill_processed_rows,
                        backfill_total_rows, backfill_last_id, parity_score, last_verified_at,
                        error_message, error_count, version, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                    ON CONFLICT (workspace_id) DO NOTHING
                    "#
                )
                .as_str(),
            )
            .bind(&row.workspace_id)
            .bind(&row.source_table)
            .bind(&row.target_table)
            .bind(&row.status)
            .bind(row.dual_write_enabled)
            .bind(row.backfill_batch_size)
            .bind(row.backfill_progress)
            .bind(row.backfill_processed_rows)
            .bind(row.backfill_total_rows)
            .bind(&row.backfill_last_id)
            .bind(row.parity_score)
            .bind(row.last_verified_at)
            .bind(&row.error_message)
            .bind(row.error_count)
            .bind(row.version)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                format!(
                    r#"
                    UPDATE {table_migrations} SET
                        source_table = $2, target_table = $3, status = $4, dual_write_enabled = $5,
                        backfill_batch_size = $6, backfill_progress = $7, backfill_processed_rows = $8,
                        backfill_total_rows = $9, backfill_last_id = $10, parity_score = $11,
                        last_verified_at = $12, error_message = $13, error_count = $14,
                        version = $15, updated_at = $16
                    WHERE workspace_id = $1 AND version = $17
                    "#
                )
                .as_str(),
            )
            .bind(&row.workspace_id)
            .bind(&row.source_table)
            .bind(&row.target_table)
            .bind(&row.status)
            .bind(row.dual_write_enabled)
            .bind(row.backfill_batch_size)
            .bind(row.backfill_progress)
            .bind(row.backfill_processed_rows)
            .bind(row.backfill_total_rows)
            .bind(&row.backfill_last_id)
            .bind(row.parity_score)
            .bind(row.last_verified_at)
            .bind(&row.error_message)
            .bind(row.error_count)
            .bind(row.version)
            .bind(row.updated_at)
            .bind(i32::try_from(original_version)?)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        if rows_affected == 0 {
            tx.rollback().await?;

            return Err(StoreError::UnexpectedOriginalVersion);
        }

        self.insert_events(&mut tx, &events).await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn remove(
        &self,
        workspace_id: &'_ str,
        original_version: u32,
        events: Vec<MigrationEvent>,
    ) -> Result<()> {
        let table_migrations = self.table_migrations();
        let mut tx = self.pool.begin().await?;

        let rows_affected = sqlx::query(
            format!("DELETE FROM {table_migrations} WHERE workspace_id = $1 AND version = $2")
                .as_str(),
        )
        .bind(workspace_id)
        .bind(i32::try_from(original_version)?)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;

            return Err(StoreError::UnexpectedOriginalVersion);
        }

        self.insert_events(&mut tx, &events).await?;

        tx.commit().await?;

        Ok(())
    }

    async fn append(&self, events: Vec<MigrationEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        self.insert_events(&mut tx, &events).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn read(
        &self,
        workspace_id: &'_ str,
        last: Option<usize>,
    ) -> Result<Vec<MigrationEvent>> {
        let table_events = self.table_events();

        let mut rows = match last {
            Some(last) => {
                sqlx::query_as::<_, EventRow>(
                    format!(
                        "SELECT * FROM {table_events} WHERE workspace_id = $1 ORDER BY created_at DESC, seq DESC LIMIT $2"
                    )
                    .as_str(),
                )
                .bind(workspace_id)
                .bind(i64::try_from(last)?)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, EventRow>(
                    format!(
                        "SELECT * FROM {table_events} WHERE workspace_id = $1 ORDER BY created_at ASC, seq ASC"
                    )
                    .as_str(),
                )
                .bind(workspace_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        if last.is_some() {
            rows.reverse();
        }

        rows.into_iter().map(MigrationEvent::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    workspace_id: String,
    source_table: String,
    target_table: String,
    status: String,
    dual_write_enabled: bool,
    backfill_batch_size: i32,
    backfill_progress: f64,
    backfill_processed_rows: i64,
    backfill_total_rows: i64,
    backfill_last_id: Option<String>,
    parity_score: f64,
    last_verified_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    error_count: i32,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for MigrationRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(MigrationRecord {
            status: row
                .status
                .parse()
                .map_err(|_| StoreError::InvalidStatus(row.status.to_owned()))?,
            workspace_id: row.workspace_id,
            source_table: row.source_table,
            target_table: row.target_table,
            dual_write_enabled: row.dual_write_enabled,
            backfill_batch_size: u32::try_from(row.backfill_batch_size)?,
            backfill_progress: row.backfill_progress,
            backfill_processed_rows: u64::try_from(row.backfill_processed_rows)?,
            backfill_total_rows: u64::try_from(row.backfill_total_rows)?,
            backfill_last_id: row.backfill_last_id,
            parity_score: row.parity_score,
            last_verified_at: row.last_verified_at,
            error_message: row.error_message,
            error_count: u32::try_from(row.error_count)?,
            version: u32::try_from(row.version)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<MigrationRecord> for RecordRow {
    type Error = StoreError;

    fn try_from(record: MigrationRecord) -> Result<Self> {
        Ok(RecordRow {
            status: record.status.to_string(),
            workspace_id: record.workspace_id,
            source_table: record.source_table,
            target_table: record.target_table,
            dual_write_enabled: record.dual_write_enabled,
            backfill_batch_size: i32::try_from(record.backfill_batch_size)?,
            backfill_progress: record.backfill_progress,
            backfill_processed_rows: i64::try_from(record.backfill_processed_rows)?,
            backfill_total_rows: i64::try_from(record.backfill_total_rows)?,
            backfill_last_id: record.backfill_last_id,
            parity_score: record.parity_score,
            last_verified_at: record.last_verified_at,
            error_message: record.error_message,
            error_count: i32::try_from(record.error_count)?,
            version: i32::try_from(record.version)?,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    workspace_id: String,
    event_type: String,
    detail: Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for MigrationEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(MigrationEvent {
            event_type: row
                .event_type
                .parse()
                .map_err(|_| StoreError::InvalidEventType(row.event_type.to_owned()))?,
            id: row.id,
            workspace_id: row.workspace_id,
            detail: row.detail,
            created_at: row.created_at,
        })
    }
}
