use chrono::Utc;
use cutover_store::{
    MigrationEvent, MigrationEventType, MigrationRecord, MigrationStatus, Store, StoreError,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use validator::{Validate, ValidationError};

use crate::{config::MigrationConfig, error::StateError};

/// Input of [`MigrationStateManager::create_migration`].
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_distinct_tables"))]
pub struct NewMigration {
    #[validate(custom = "validate_workspace_id")]
    pub workspace_id: String,
    #[validate(custom = "validate_table_name")]
    pub source_table: String,
    #[validate(custom = "validate_table_name")]
    pub target_table: String,
    #[validate(range(min = 1))]
    pub batch_size: Option<u32>,
}

impl NewMigration {
    pub fn new(
        workspace_id: impl Into<String>,
        source_table: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            source_table: source_table.into(),
            target_table: target_table.into(),
            batch_size: None,
        }
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    fn check(&self) -> Result<(), StateError> {
        let Err(errors) = self.validate() else {
            return Ok(());
        };

        let fields = errors.field_errors();

        if fields.contains_key("workspace_id") {
            return Err(StateError::InvalidWorkspaceId);
        }

        if fields.contains_key("source_table") {
            return Err(StateError::DisallowedCharacters(self.source_table.to_owned()));
        }

        if fields.contains_key("target_table") {
            return Err(StateError::DisallowedCharacters(self.target_table.to_owned()));
        }

        if fields.contains_key("batch_size") {
            return Err(StateError::InvalidInput(
                "Backfill batch size must be greater than zero".to_owned(),
            ));
        }

        // schema level checks only run once every field is valid
        Err(StateError::SameTables)
    }
}

fn validate_workspace_id(workspace_id: &str) -> Result<(), ValidationError> {
    if workspace_id.trim().is_empty() {
        return Err(ValidationError::new("workspace_id"));
    }

    Ok(())
}

/// Table names end up in generated SQL, only `[A-Za-z0-9_.]` is accepted.
fn validate_table_name(table: &str) -> Result<(), ValidationError> {
    let allowed = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');

    if !allowed {
        return Err(ValidationError::new("disallowed_characters"));
    }

    Ok(())
}

fn validate_distinct_tables(input: &NewMigration) -> Result<(), ValidationError> {
    if input.source_table == input.target_table {
        return Err(ValidationError::new("same_tables"));
    }

    Ok(())
}

/// Extra fields merged into the record by a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub dual_write_enabled: Option<bool>,
    pub backfill_total_rows: Option<u64>,
}

impl TransitionFields {
    pub fn dual_write(enabled: bool) -> Self {
        Self {
            dual_write_enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn total_rows(mut self, total_rows: u64) -> Self {
        self.backfill_total_rows = Some(total_rows);
        self
    }
}

/// Owns the migration state machine.
///
/// Every mutation is a read-modify-write on the [`Store`]: the record is read,
/// the preconditions are checked against that snapshot and the result is
/// written with a compare-and-swap on the record version. Losing the race
/// re-reads and re-checks, so a duplicate call that raced a successful one
/// fails with its state machine error instead of overwriting it.
#[derive(Clone)]
pub struct MigrationStateManager {
    store: Store,
    config: MigrationConfig,
}

impl MigrationStateManager {
    pub fn new(store: Store) -> Self {
        Self::with_config(store, MigrationConfig::default())
    }

    pub fn with_config(store: Store, config: MigrationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub async fn create_migration(&self, input: NewMigration) -> Result<MigrationRecord, StateError> {
        input.check()?;

        let workspace_id = input.workspace_id.to_owned();

        if self.store.get(&workspace_id).await?.is_some() {
            return Err(StateError::AlreadyExists(workspace_id));
        }

        let record = MigrationRecord::new(
            &workspace_id,
            &input.source_table,
            &input.target_table,
            input.batch_size.unwrap_or(self.config.default_batch_size),
        );

        let event = MigrationEvent::new(&workspace_id, MigrationEventType::MigrationCreated)
            .detail(json!({
                "source_table": record.source_table,
                "target_table": record.target_table,
                "backfill_batch_size": record.backfill_batch_size,
            }))?;

        let record = match self.store.create(record, event).await {
            Ok(record) => record,
            Err(StoreError::UnexpectedOriginalVersion) => {
                return Err(StateError::AlreadyExists(workspace_id))
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            workspace_id = %record.workspace_id,
            source_table = %record.source_table,
            target_table = %record.target_table,
            "migration created"
        );

        Ok(record)
    }

    pub async fn get_state(
        &self,
        workspace_id: impl AsRef<str>,
    ) -> Result<Option<MigrationRecord>, StateError> {
        Ok(self.store.get(workspace_id).await?)
    }

    /// Same as [`MigrationStateManager::get_state`] but a missing record is an error.
    pub async fn require_state(
        &self,
        workspace_id: impl AsRef<str>,
    ) -> Result<MigrationRecord, StateError> {
        let workspace_id = workspace_id.as_ref();

        self.store
            .get(workspace_id)
            .await?
            .ok_or_else(|| StateError::NotFound(workspace_id.to_owned()))
    }

    pub async fn transition_to(
        &self,
        workspace_id: impl AsRef<str>,
        target: MigrationStatus,
        fields: TransitionFields,
    ) -> Result<MigrationRecord, StateError> {
        let record = self
            .mutate(workspace_id.as_ref(), |record| {
                if !record.status.can_transition_to(target) {
                    return Err(StateError::InvalidTransition {
                        from: record.status,
                        to: target,
                    });
                }

                Ok(vec![apply_transition(record, target, &fields, false)?])
            })
            .await?;

        info!(workspace_id = %record.workspace_id, status = %record.status, "migration transitioned");

        Ok(record)
    }

    /// Moves to `target` without consulting the adjacency table, optionally
    /// only when the record is still in `expected`.
    ///
    /// Reserved for the escape hatches: rollback and stopping dual-write.
    pub(crate) async fn force_transition(
        &self,
        workspace_id: impl AsRef<str>,
        expected: Option<MigrationStatus>,
        target: MigrationStatus,
        fields: TransitionFields,
    ) -> Result<MigrationRecord, StateError> {
        let record = self
            .mutate(workspace_id.as_ref(), |record| {
                if expected.is_some_and(|expected| expected != record.status) {
                    return Err(StateError::InvalidTransition {
                        from: record.status,
                        to: target,
                    });
                }

                Ok(vec![apply_transition(record, target, &fields, true)?])
            })
            .await?;

        warn!(workspace_id = %record.workspace_id, status = %record.status, "migration force transitioned");

        Ok(record)
    }

    pub async fn update_backfill_progress(
        &self,
        workspace_id: impl AsRef<str>,
        processed_rows: u64,
        total_rows: u64,
        last_id: Option<String>,
    ) -> Result<MigrationRecord, StateError> {
        self.mutate(workspace_id.as_ref(), |record| {
            if record.status != MigrationStatus::Backfilling {
                return Err(StateError::InvalidStatus {
                    action: "update backfill progress",
                    status: record.status,
                });
            }

            record.backfill_progress = backfill_progress(processed_rows, total_rows);
            record.backfill_processed_rows = processed_rows;
            record.backfill_total_rows = total_rows;
            record.backfill_last_id = last_id.clone();

            let event = MigrationEvent::new(
                &record.workspace_id,
                MigrationEventType::BackfillProgress,
            )
            .detail(json!({
                "processed_rows": processed_rows,
                "total_rows": total_rows,
                "progress": record.backfill_progress,
                "last_id": last_id,
            }))?;

            Ok(vec![event])
        })
        .await
    }

    pub async fn update_parity_score(
        &self,
        workspace_id: impl AsRef<str>,
        score: f64,
    ) -> Result<MigrationRecord, StateError> {
        let score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 100.0)
        };

        self.mutate(workspace_id.as_ref(), |record| {
            if record.status != MigrationStatus::Verifying {
                return Err(StateError::InvalidStatus {
                    action: "update parity score",
                    status: record.status,
                });
            }

            record.parity_score = score;
            record.last_verified_at = Some(Utc::now());

            let event =
                MigrationEvent::new(&record.workspace_id, MigrationEventType::ParityChecked)
                    .detail(json!({ "parity_score": score }))?;

            Ok(vec![event])
        })
        .await
    }

    /// Records a failure and aborts the migration into `failed` when asked to
    /// or once the error budget is exhausted. Terminal migrations keep their status.
    pub async fn record_error(
        &self,
        workspace_id: impl AsRef<str>,
        message: impl Into<String>,
        force_fail: bool,
    ) -> Result<MigrationRecord, StateError> {
        let message = message.into();
        let max_error_count = self.config.max_error_count;

        let record = self
            .mutate(workspace_id.as_ref(), |record| {
                record.error_count = record.error_count.saturating_add(1);
                record.error_message = Some(message.to_owned());

                let mut events = vec![MigrationEvent::new(
                    &record.workspace_id,
                    MigrationEventType::Error,
                )
                .detail(json!({
                    "message": message,
                    "error_count": record.error_count,
                    "status": record.status,
                }))?];

                let abort = force_fail || record.error_count >= max_error_count;

                if abort
                    && !record.status.is_terminal()
                    && record.status != MigrationStatus::Failed
                {
                    events.push(apply_transition(
                        record,
                        MigrationStatus::Failed,
                        &TransitionFields::default(),
                        true,
                    )?);
                }

                Ok(events)
            })
            .await?;

        if record.status == MigrationStatus::Failed {
            warn!(
                workspace_id = %record.workspace_id,
                error_count = record.error_count,
                error = %message,
                "migration failed"
            );
        } else {
            debug!(
                workspace_id = %record.workspace_id,
                error_count = record.error_count,
                error = %message,
                "migration error recorded"
            );
        }

        Ok(record)
    }

    /// Removes the record. The audit log is kept and gains a `deleted` entry.
    pub async fn delete_migration(&self, workspace_id: impl AsRef<str>) -> Result<(), StateError> {
        let workspace_id = workspace_id.as_ref();
        let mut conflicts = 0;

        loop {
            let record = self.require_state(workspace_id).await?;

            if !record.status.is_deletable() {
                return Err(StateError::InvalidStatus {
                    action: "delete migration",
                    status: record.status,
                });
            }

            let event = MigrationEvent::new(workspace_id, MigrationEventType::Deleted)
                .detail(json!({ "status": record.status }))?;

            match self.store.delete(workspace_id, record.version, event).await {
                Ok(_) => {
                    info!(workspace_id = %workspace_id, "migration deleted");

                    return Ok(());
                }
                Err(err) => self.on_write_error(workspace_id, &mut conflicts, err)?,
            }
        }
    }

    pub async fn reset_migration(
        &self,
        workspace_id: impl AsRef<str>,
    ) -> Result<MigrationRecord, StateError> {
        let record = self
            .mutate(workspace_id.as_ref(), |record| {
                if record.status != MigrationStatus::Failed {
                    return Err(StateError::InvalidStatus {
                        action: "reset migration",
                        status: record.status,
                    });
                }

                let event = MigrationEvent::new(&record.workspace_id, MigrationEventType::Reset)
                    .detail(json!({
                        "error_count": record.error_count,
                        "error_message": record.error_message,
                    }))?;

                record.status = MigrationStatus::Idle;
                record.dual_write_enabled = false;
                record.backfill_progress = 0.0;
                record.backfill_processed_rows = 0;
                record.backfill_total_rows = 0;
                record.backfill_last_id = None;
                record.parity_score = 0.0;
                record.last_verified_at = None;
                record.error_message = None;
                record.error_count = 0;

                Ok(vec![event])
            })
            .await?;

        info!(workspace_id = %record.workspace_id, "migration reset");

        Ok(record)
    }

    pub async fn list_migrations(
        &self,
        status: Option<MigrationStatus>,
    ) -> Result<Vec<MigrationRecord>, StateError> {
        Ok(self.store.list(status).await?)
    }

    pub async fn get_events(
        &self,
        workspace_id: impl AsRef<str>,
    ) -> Result<Vec<MigrationEvent>, StateError> {
        Ok(self.store.events(workspace_id).await?)
    }

    pub async fn recent_events(
        &self,
        workspace_id: impl AsRef<str>,
    ) -> Result<Vec<MigrationEvent>, StateError> {
        Ok(self
            .store
            .recent_events(workspace_id, self.config.recent_events_limit)
            .await?)
    }

    async fn mutate<F>(&self, workspace_id: &str, mut apply: F) -> Result<MigrationRecord, StateError>
    where
        F: FnMut(&mut MigrationRecord) -> Result<Vec<MigrationEvent>, StateError> + Send,
    {
        let mut conflicts = 0;

        loop {
            let current = self.require_state(workspace_id).await?;
            let mut next = current.clone();
            let events = apply(&mut next)?;
            next.updated_at = Utc::now();

            match self.store.save(next, current.version, events).await {
                Ok(record) => return Ok(record),
                Err(err) => self.on_write_error(workspace_id, &mut conflicts, err)?,
            }
        }
    }

    /// Swallows a lost compare-and-swap while retries remain so the caller re-reads.
    fn on_write_error(
        &self,
        workspace_id: &str,
        conflicts: &mut u32,
        err: StoreError,
    ) -> Result<(), StateError> {
        match err {
            StoreError::UnexpectedOriginalVersion
                if *conflicts < self.config.max_write_conflict_retries =>
            {
                *conflicts += 1;
                debug!(workspace_id = %workspace_id, conflicts = *conflicts, "write conflict, retrying");

                Ok(())
            }
            StoreError::UnexpectedOriginalVersion => {
                Err(StateError::WriteConflict(workspace_id.to_owned()))
            }
            err => Err(err.into()),
        }
    }
}

fn backfill_progress(processed_rows: u64, total_rows: u64) -> f64 {
    if total_rows == 0 {
        return 0.0;
    }

    (processed_rows as f64 / total_rows as f64 * 100.0)
        .round()
        .min(100.0)
}

fn apply_transition(
    record: &mut MigrationRecord,
    target: MigrationStatus,
    fields: &TransitionFields,
    forced: bool,
) -> Result<MigrationEvent, StateError> {
    let from = record.status;

    if fields.dual_write_enabled == Some(true) && !target.allows_dual_write() {
        return Err(StateError::DualWriteOutsideActivePhase(target));
    }

    if from == MigrationStatus::Failed && target != MigrationStatus::Failed {
        record.error_message = None;
    }

    if let Some(enabled) = fields.dual_write_enabled {
        record.dual_write_enabled = enabled;
    }

    if !target.allows_dual_write() {
        record.dual_write_enabled = false;
    }

    if let Some(total_rows) = fields.backfill_total_rows {
        record.backfill_total_rows = total_rows;
    }

    record.status = target;

    Ok(
        MigrationEvent::new(&record.workspace_id, MigrationEventType::Transition).detail(json!({
            "from": from,
            "to": target,
            "forced": forced,
            "dual_write_enabled": record.dual_write_enabled,
        }))?,
    )
}
