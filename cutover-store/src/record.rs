use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};

/// Lifecycle of a table migration.
///
/// The regular path is `idle → dual_write → backfilling → verifying →
/// cutover_ready → cutover_complete`. `failed` is reachable from any
/// non-terminal status and only leaves through `idle`. `rolled_back` is the
/// escape hatch and is never entered through [`MigrationStatus::can_transition_to`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromStr, Serialize, Deserialize, Default,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    #[default]
    Idle,
    DualWrite,
    Backfilling,
    Verifying,
    CutoverReady,
    CutoverComplete,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub const ALL: [MigrationStatus; 8] = [
        MigrationStatus::Idle,
        MigrationStatus::DualWrite,
        MigrationStatus::Backfilling,
        MigrationStatus::Verifying,
        MigrationStatus::CutoverReady,
        MigrationStatus::CutoverComplete,
        MigrationStatus::Failed,
        MigrationStatus::RolledBack,
    ];

    /// Adjacency table of the regular state machine.
    pub fn can_transition_to(&self, target: MigrationStatus) -> bool {
        use MigrationStatus::*;

        matches!(
            (self, target),
            (Idle, DualWrite)
                | (DualWrite, Backfilling)
                | (Backfilling, Verifying)
                | (Verifying, CutoverReady)
                | (CutoverReady, CutoverComplete)
                | (Failed, Idle)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::CutoverComplete | MigrationStatus::RolledBack
        )
    }

    /// Statuses a record may be removed from without leaving a half-migrated table behind.
    pub fn is_deletable(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Idle
                | MigrationStatus::Failed
                | MigrationStatus::CutoverComplete
                | MigrationStatus::RolledBack
        )
    }

    /// Statuses in which the dual-write trigger may be active.
    pub fn allows_dual_write(&self) -> bool {
        matches!(
            self,
            MigrationStatus::DualWrite
                | MigrationStatus::Backfilling
                | MigrationStatus::Verifying
                | MigrationStatus::CutoverReady
        )
    }
}

/// Persisted state of the migration of one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub workspace_id: String,
    pub source_table: String,
    pub target_table: String,
    pub status: MigrationStatus,
    pub dual_write_enabled: bool,
    pub backfill_batch_size: u32,
    pub backfill_progress: f64,
    pub backfill_processed_rows: u64,
    pub backfill_total_rows: u64,
    pub backfill_last_id: Option<String>,
    pub parity_score: f64,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_count: u32,
    /// Optimistic concurrency token, `0` until the record is first written.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationRecord {
    pub fn new(
        workspace_id: impl Into<String>,
        source_table: impl Into<String>,
        target_table: impl Into<String>,
        backfill_batch_size: u32,
    ) -> Self {
        let now = Utc::now();

        Self {
            workspace_id: workspace_id.into(),
            source_table: source_table.into(),
            target_table: target_table.into(),
            status: MigrationStatus::Idle,
            dual_write_enabled: false,
            backfill_batch_size,
            backfill_progress: 0.0,
            backfill_processed_rows: 0,
            backfill_total_rows: 0,
            backfill_last_id: None,
            parity_score: 0.0,
            last_verified_at: None,
            error_message: None,
            error_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
