use chrono::{DateTime, Utc};
use cutover_store::{MigrationEvent, MigrationRecord, MigrationStatus, Store};
use parse_display::Display;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::{
    config::MigrationConfig,
    data_plane::{CompareOptions, DataPlaneClient},
    error::{OrchestratorError, StateError},
    state::{MigrationStateManager, NewMigration, TransitionFields},
};

/// Steps of [`MigrationOrchestrator::run_full_migration`], in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    DualWrite,
    Backfill,
    Verification,
    CutoverReady,
    Cutover,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseProgress {
    pub phase: MigrationPhase,
    pub detail: String,
}

/// Receives one [`PhaseProgress`] per phase boundary. Sending never blocks the pipeline.
pub type ProgressSender = UnboundedSender<PhaseProgress>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillReport {
    pub processed_rows: u64,
    pub total_rows: u64,
    pub last_id: Option<String>,
    pub batches: u32,
    pub resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParityReport {
    pub parity_score: f64,
    pub matched: bool,
    pub full: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CutoverReport {
    pub read_path: String,
    pub trigger_disabled: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackReport {
    pub previous_status: MigrationStatus,
    pub trigger_disabled: bool,
    pub read_path_reverted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationSummary {
    pub state: MigrationRecord,
    pub recent_events: Vec<MigrationEvent>,
}

/// Outcome of [`MigrationOrchestrator::run_full_migration`]. Phases that never
/// ran are `None`; `error` holds the failure that stopped the pipeline.
#[derive(Debug, Default)]
pub struct FullMigrationReport {
    pub backfill: Option<BackfillReport>,
    pub parity: Option<ParityReport>,
    pub cutover: Option<CutoverReport>,
    pub error: Option<OrchestratorError>,
}

impl FullMigrationReport {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.cutover.is_some()
    }
}

/// Sequences state transitions with their data-plane effects.
///
/// Data-plane failures are recorded on the migration through
/// [`MigrationOrchestrator::record_error`] and returned as
/// [`OrchestratorError::DataPlane`], never as a raw client error.
#[derive(Clone)]
pub struct MigrationOrchestrator {
    state: MigrationStateManager,
    data_plane: Box<dyn DataPlaneClient>,
}

impl MigrationOrchestrator {
    pub fn new<D: DataPlaneClient + 'static>(store: Store, data_plane: D) -> Self {
        Self::with_config(store, data_plane, MigrationConfig::default())
    }

    pub fn with_config<D: DataPlaneClient + 'static>(
        store: Store,
        data_plane: D,
        config: MigrationConfig,
    ) -> Self {
        Self {
            state: MigrationStateManager::with_config(store, config),
            data_plane: Box::new(data_plane),
        }
    }

    pub fn state_manager(&self) -> &MigrationStateManager {
        &self.state
    }

    pub async fn initialize_migration(
        &self,
        input: NewMigration,
    ) -> Result<MigrationRecord, OrchestratorError> {
        match self.state.create_migration(input).await {
            Ok(record) => Ok(record),
            Err(StateError::AlreadyExists(workspace_id)) => {
                Err(OrchestratorError::AlreadyExists(workspace_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Installs the dual-write trigger, then enters `dual_write`. A trigger
    /// failure leaves the status untouched.
    pub async fn start_dual_write(
        &self,
        workspace_id: &str,
    ) -> Result<MigrationRecord, OrchestratorError> {
        let record = self.state.require_state(workspace_id).await?;

        if !record.status.can_transition_to(MigrationStatus::DualWrite) {
            return Err(StateError::InvalidTransition {
                from: record.status,
                to: MigrationStatus::DualWrite,
            }
            .into());
        }

        if let Err(err) = self
            .data_plane
            .enable_dual_write_trigger(&record.source_table, &record.target_table)
            .await
        {
            return Err(self
                .data_plane_failure(workspace_id, "enable dual-write trigger", err)
                .await);
        }

        let record = match self
            .state
            .transition_to(
                workspace_id,
                MigrationStatus::DualWrite,
                TransitionFields::dual_write(true),
            )
            .await
        {
            Ok(record) => record,
            Err(err) => {
                // triggers are shared per table pair, a concurrent winner owns it now
                let tracked = match self.state.get_state(workspace_id).await {
                    Ok(Some(current)) => {
                        current.dual_write_enabled && current.status.allows_dual_write()
                    }
                    Ok(None) => false,
                    Err(read_err) => {
                        warn!(workspace_id = %workspace_id, error = %read_err, "failed to re-read migration, keeping dual-write trigger");
                        true
                    }
                };

                if tracked {
                    debug!(workspace_id = %workspace_id, "dual-write trigger owned by a concurrent call");
                } else if let Err(cleanup) = self
                    .data_plane
                    .disable_dual_write_trigger(&record.source_table, &record.target_table)
                    .await
                {
                    warn!(workspace_id = %workspace_id, error = %cleanup, "failed to remove orphan dual-write trigger");
                }

                return Err(err.into());
            }
        };

        info!(workspace_id = %workspace_id, "dual-write enabled");

        Ok(record)
    }

    /// Removes the dual-write trigger and returns the migration to `idle`.
    /// Only possible before backfill has started.
    pub async fn stop_dual_write(
        &self,
        workspace_id: &str,
    ) -> Result<MigrationRecord, OrchestratorError> {
        let record = self.state.require_state(workspace_id).await?;

        if record.status != MigrationStatus::DualWrite {
            return Err(StateError::InvalidStatus {
                action: "stop dual-write",
                status: record.status,
            }
            .into());
        }

        if let Err(err) = self
            .data_plane
            .disable_dual_write_trigger(&record.source_table, &record.target_table)
            .await
        {
            return Err(self
                .data_plane_failure(workspace_id, "disable dual-write trigger", err)
                .await);
        }

        let record = self
            .state
            .force_transition(
                workspace_id,
                Some(MigrationStatus::DualWrite),
                MigrationStatus::Idle,
                TransitionFields::dual_write(false),
            )
            .await?;

        info!(workspace_id = %workspace_id, "dual-write stopped");

        Ok(record)
    }

    /// Copies the source table into the target chunk by chunk.
    ///
    /// The cursor is committed after every chunk, so calling this again on a
    /// migration that is still `backfilling` resumes after the last confirmed
    /// row. When the status changes under the loop (rollback) the next progress
    /// update is rejected and the loop stops with [`OrchestratorError::Interrupted`].
    pub async fn start_backfill(
        &self,
        workspace_id: &str,
    ) -> Result<BackfillReport, OrchestratorError> {
        let record = self.state.require_state(workspace_id).await?;

        if !record.dual_write_enabled {
            return Err(OrchestratorError::DualWriteNotEnabled(
                workspace_id.to_owned(),
            ));
        }

        let total_rows = match self.data_plane.count_rows(&record.source_table).await {
            Ok(total_rows) => total_rows,
            Err(err) => {
                return Err(self
                    .data_plane_failure(workspace_id, "count source rows", err)
                    .await)
            }
        };

        let resumed = record.status == MigrationStatus::Backfilling;

        let record = if resumed {
            info!(
                workspace_id = %workspace_id,
                processed_rows = record.backfill_processed_rows,
                last_id = ?record.backfill_last_id,
                "resuming backfill"
            );

            record
        } else {
            self.state
                .transition_to(
                    workspace_id,
                    MigrationStatus::Backfilling,
                    TransitionFields::default().total_rows(total_rows),
                )
                .await?
        };

        let mut processed_rows = record.backfill_processed_rows;
        let mut cursor = record.backfill_last_id.clone();
        let mut batches = 0;

        loop {
            let batch = match self
                .data_plane
                .copy_batch(
                    &record.source_table,
                    &record.target_table,
                    cursor.as_deref(),
                    record.backfill_batch_size,
                )
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    return Err(self
                        .data_plane_failure(workspace_id, "copy batch", err)
                        .await)
                }
            };

            processed_rows += batch.rows_copied;
            cursor = batch.next_cursor;
            batches += 1;

            match self
                .state
                .update_backfill_progress(workspace_id, processed_rows, total_rows, cursor.clone())
                .await
            {
                Ok(record) => debug!(
                    workspace_id = %workspace_id,
                    processed_rows,
                    total_rows,
                    progress = record.backfill_progress,
                    "backfill chunk committed"
                ),
                Err(StateError::InvalidStatus { status, .. }) => {
                    info!(workspace_id = %workspace_id, status = %status, "backfill interrupted");

                    return Err(OrchestratorError::Interrupted(status));
                }
                Err(err) => return Err(err.into()),
            }

            if batch.done {
                break;
            }
        }

        info!(workspace_id = %workspace_id, processed_rows, batches, "backfill finished");

        Ok(BackfillReport {
            processed_rows,
            total_rows,
            last_id: cursor,
            batches,
            resumed,
        })
    }

    pub async fn start_verification(
        &self,
        workspace_id: &str,
    ) -> Result<MigrationRecord, OrchestratorError> {
        Ok(self
            .state
            .transition_to(
                workspace_id,
                MigrationStatus::Verifying,
                TransitionFields::default(),
            )
            .await?)
    }

    /// Compares source and target and records the score. A quick check samples
    /// rows, a full check compares every row.
    pub async fn run_parity_check(
        &self,
        workspace_id: &str,
        full: bool,
    ) -> Result<ParityReport, OrchestratorError> {
        let record = self.state.require_state(workspace_id).await?;

        if record.status != MigrationStatus::Verifying {
            return Err(StateError::InvalidStatus {
                action: "run parity check",
                status: record.status,
            }
            .into());
        }

        let comparison = match self
            .data_plane
            .compare_tables(
                &record.source_table,
                &record.target_table,
                CompareOptions { full },
            )
            .await
        {
            Ok(comparison) => comparison,
            Err(err) => {
                return Err(self
                    .data_plane_failure(workspace_id, "compare tables", err)
                    .await)
            }
        };

        let record = self
            .state
            .update_parity_score(workspace_id, comparison.score)
            .await?;

        info!(workspace_id = %workspace_id, parity_score = record.parity_score, full, "parity checked");

        Ok(ParityReport {
            parity_score: record.parity_score,
            matched: comparison.matched,
            full,
        })
    }

    /// Enters `cutover_ready` once the recorded parity score reaches the threshold.
    pub async fn prepare_cutover(
        &self,
        workspace_id: &str,
    ) -> Result<MigrationRecord, OrchestratorError> {
        let record = self.state.require_state(workspace_id).await?;
        let threshold = self.state.config().parity_threshold;

        if record.status == MigrationStatus::Verifying && record.parity_score < threshold {
            let err = OrchestratorError::ParityBelowThreshold {
                score: record.parity_score,
                threshold,
            };

            warn!(workspace_id = %workspace_id, parity_score = record.parity_score, threshold, "parity below cutover threshold");
            self.record_error(workspace_id, err.to_string(), false).await?;

            return Err(err);
        }

        Ok(self
            .state
            .transition_to(
                workspace_id,
                MigrationStatus::CutoverReady,
                TransitionFields::default(),
            )
            .await?)
    }

    /// Switches reads and writes to the target table, drops the now redundant
    /// dual-write trigger and completes the migration.
    pub async fn execute_cutover(
        &self,
        workspace_id: &str,
    ) -> Result<CutoverReport, OrchestratorError> {
        let record = self.state.require_state(workspace_id).await?;

        if record.status != MigrationStatus::CutoverReady {
            return Err(StateError::InvalidStatus {
                action: "execute cutover",
                status: record.status,
            }
            .into());
        }

        if let Err(err) = self
            .data_plane
            .switch_read_path(workspace_id, &record.target_table)
            .await
        {
            return Err(self
                .data_plane_failure(workspace_id, "switch read path", err)
                .await);
        }

        let trigger_error = self
            .data_plane
            .disable_dual_write_trigger(&record.source_table, &record.target_table)
            .await
            .err();

        // reads already hit the target, completion is committed before any error is counted
        let record = self
            .state
            .transition_to(
                workspace_id,
                MigrationStatus::CutoverComplete,
                TransitionFields::dual_write(false),
            )
            .await?;

        info!(workspace_id = %workspace_id, target_table = %record.target_table, "cutover complete");

        let trigger_disabled = trigger_error.is_none();

        if let Some(err) = trigger_error {
            warn!(workspace_id = %workspace_id, error = %err, "failed to disable dual-write trigger after cutover");
            self.record_error(
                workspace_id,
                format!("disable dual-write trigger failed: {err}"),
                false,
            )
            .await?;
        }

        Ok(CutoverReport {
            read_path: record.target_table,
            trigger_disabled,
            completed_at: record.updated_at,
        })
    }

    /// Runs every remaining phase up to `cutover_complete`, stopping at the
    /// first failure. A migration already past `idle` continues from its
    /// current phase.
    #[tracing::instrument(skip(self, progress))]
    pub async fn run_full_migration(
        &self,
        workspace_id: &str,
        progress: Option<ProgressSender>,
    ) -> FullMigrationReport {
        let mut report = FullMigrationReport::default();

        if let Err(err) = self.run_pipeline(workspace_id, &progress, &mut report).await {
            error!(workspace_id = %workspace_id, error = %err, "migration pipeline stopped");
            report.error = Some(err);
        }

        report
    }

    async fn run_pipeline(
        &self,
        workspace_id: &str,
        progress: &Option<ProgressSender>,
        report: &mut FullMigrationReport,
    ) -> Result<(), OrchestratorError> {
        let record = self.state.require_state(workspace_id).await?;

        let status = record.status;

        if !matches!(
            status,
            MigrationStatus::Idle
                | MigrationStatus::DualWrite
                | MigrationStatus::Backfilling
                | MigrationStatus::Verifying
                | MigrationStatus::CutoverReady
        ) {
            return Err(StateError::InvalidStatus {
                action: "run full migration",
                status,
            }
            .into());
        }

        if status == MigrationStatus::Idle {
            emit(progress, MigrationPhase::DualWrite, "enabling dual-write");
            self.start_dual_write(workspace_id).await?;
        }

        if matches!(
            status,
            MigrationStatus::Idle | MigrationStatus::DualWrite | MigrationStatus::Backfilling
        ) {
            emit(progress, MigrationPhase::Backfill, "copying historical rows");
            let backfill = self.start_backfill(workspace_id).await?;
            report.backfill = Some(backfill);

            self.start_verification(workspace_id).await?;
        }

        if status != MigrationStatus::CutoverReady {
            emit(progress, MigrationPhase::Verification, "running full parity check");
            let parity = self.run_parity_check(workspace_id, true).await?;
            report.parity = Some(parity);

            emit(progress, MigrationPhase::CutoverReady, "checking cutover threshold");
            self.prepare_cutover(workspace_id).await?;
        }

        emit(progress, MigrationPhase::Cutover, "switching read path");
        let cutover = self.execute_cutover(workspace_id).await?;
        report.cutover = Some(cutover);

        emit(progress, MigrationPhase::Complete, "migration complete");

        Ok(())
    }

    /// Returns the migration to the source table from any status, including
    /// after cutover.
    ///
    /// Data-plane failures are logged and recorded on the migration but never
    /// prevent the move to `rolled_back`. An in-flight backfill notices the new
    /// status on its next progress update and stops.
    pub async fn rollback(&self, workspace_id: &str) -> Result<RollbackReport, OrchestratorError> {
        let record = self.state.require_state(workspace_id).await?;
        let mut failures = Vec::new();

        let trigger_disabled = match self
            .data_plane
            .disable_dual_write_trigger(&record.source_table, &record.target_table)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(workspace_id = %workspace_id, error = %err, "rollback failed to disable dual-write trigger");
                failures.push(format!("disable dual-write trigger failed: {err}"));

                false
            }
        };

        let read_path_reverted = match self
            .data_plane
            .revert_read_path(workspace_id, &record.source_table)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(workspace_id = %workspace_id, error = %err, "rollback failed to revert read path");
                failures.push(format!("revert read path failed: {err}"));

                false
            }
        };

        self.state
            .force_transition(
                workspace_id,
                None,
                MigrationStatus::RolledBack,
                TransitionFields::dual_write(false),
            )
            .await?;

        for failure in failures {
            self.record_error(workspace_id, failure, false).await?;
        }

        info!(workspace_id = %workspace_id, previous_status = %record.status, "migration rolled back");

        Ok(RollbackReport {
            previous_status: record.status,
            trigger_disabled,
            read_path_reverted,
        })
    }

    pub async fn get_state(
        &self,
        workspace_id: &str,
    ) -> Result<Option<MigrationRecord>, OrchestratorError> {
        Ok(self.state.get_state(workspace_id).await?)
    }

    pub async fn get_summary(
        &self,
        workspace_id: &str,
    ) -> Result<MigrationSummary, OrchestratorError> {
        let state = self.state.require_state(workspace_id).await?;
        let recent_events = self.state.recent_events(workspace_id).await?;

        Ok(MigrationSummary {
            state,
            recent_events,
        })
    }

    pub async fn get_events(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<MigrationEvent>, OrchestratorError> {
        Ok(self.state.get_events(workspace_id).await?)
    }

    pub async fn list_migrations(
        &self,
        status: Option<MigrationStatus>,
    ) -> Result<Vec<MigrationRecord>, OrchestratorError> {
        Ok(self.state.list_migrations(status).await?)
    }

    pub async fn delete_migration(&self, workspace_id: &str) -> Result<(), OrchestratorError> {
        Ok(self.state.delete_migration(workspace_id).await?)
    }

    pub async fn reset_migration(
        &self,
        workspace_id: &str,
    ) -> Result<MigrationRecord, OrchestratorError> {
        Ok(self.state.reset_migration(workspace_id).await?)
    }

    /// Records an error on the migration, see [`MigrationStateManager::record_error`].
    ///
    /// When the error aborts the migration into `failed` the dual-write trigger
    /// is removed on a best-effort basis, so the data plane stops mirroring
    /// once the record says dual-write is off.
    pub async fn record_error(
        &self,
        workspace_id: &str,
        message: impl Into<String>,
        force_fail: bool,
    ) -> Result<MigrationRecord, OrchestratorError> {
        let record = self
            .state
            .record_error(workspace_id, message, force_fail)
            .await?;

        if record.status == MigrationStatus::Failed {
            if let Err(cleanup) = self
                .data_plane
                .disable_dual_write_trigger(&record.source_table, &record.target_table)
                .await
            {
                warn!(workspace_id = %workspace_id, error = %cleanup, "failed to disable dual-write trigger of failed migration");
            }
        }

        Ok(record)
    }

    /// Records a data-plane failure on the migration and converts it.
    async fn data_plane_failure(
        &self,
        workspace_id: &str,
        operation: &'static str,
        err: anyhow::Error,
    ) -> OrchestratorError {
        error!(workspace_id = %workspace_id, operation, error = %err, "data plane failure");

        if let Err(record_err) = self
            .record_error(workspace_id, format!("{operation} failed: {err}"), false)
            .await
        {
            warn!(workspace_id = %workspace_id, error = %record_err, "failed to record data plane failure");
        }

        OrchestratorError::data_plane(operation, err)
    }
}

fn emit(progress: &Option<ProgressSender>, phase: MigrationPhase, detail: &str) {
    if let Some(progress) = progress {
        // a dropped receiver only means nobody is watching
        if progress
            .send(PhaseProgress {
                phase,
                detail: detail.to_owned(),
            })
            .is_err()
        {
            debug!(%phase, "progress receiver dropped");
        }
    }
}
