#![allow(dead_code)]

use cutover::{
    MemoryDataPlane, MemoryStore, MigrationOrchestrator, MigrationRecord, MigrationStateManager,
    MigrationStatus, NewMigration, TransitionFields,
};
use serde_json::json;

pub const SOURCE: &str = "leads";
pub const TARGET: &str = "leads_v2";

pub fn state_manager() -> MigrationStateManager {
    MigrationStateManager::new(MemoryStore::create())
}

pub async fn create(
    manager: &MigrationStateManager,
    workspace_id: &str,
) -> anyhow::Result<MigrationRecord> {
    Ok(manager
        .create_migration(NewMigration::new(workspace_id, SOURCE, TARGET).batch_size(100))
        .await?)
}

/// Walks the regular path from `idle` up to `status`; `failed` is reached by a forced error.
pub async fn advance(
    manager: &MigrationStateManager,
    workspace_id: &str,
    status: MigrationStatus,
) -> anyhow::Result<MigrationRecord> {
    if status == MigrationStatus::Failed {
        return Ok(manager.record_error(workspace_id, "boom", true).await?);
    }

    let mut record = manager.require_state(workspace_id).await?;

    while record.status != status {
        let (next, fields) = match record.status {
            MigrationStatus::Idle => (
                MigrationStatus::DualWrite,
                TransitionFields::dual_write(true),
            ),
            MigrationStatus::DualWrite => (MigrationStatus::Backfilling, TransitionFields::default()),
            MigrationStatus::Backfilling => (MigrationStatus::Verifying, TransitionFields::default()),
            MigrationStatus::Verifying => (MigrationStatus::CutoverReady, TransitionFields::default()),
            MigrationStatus::CutoverReady => (
                MigrationStatus::CutoverComplete,
                TransitionFields::default(),
            ),
            other => anyhow::bail!("cannot advance from {other} to {status}"),
        };

        record = manager.transition_to(workspace_id, next, fields).await?;
    }

    Ok(record)
}

pub fn row_key(n: usize) -> String {
    format!("lead-{n:04}")
}

/// Data plane with `rows` rows in the source table and an empty target table.
pub fn data_plane(rows: usize) -> MemoryDataPlane {
    let data_plane = MemoryDataPlane::new();

    data_plane.seed(
        SOURCE,
        (0..rows).map(|n| {
            (
                row_key(n),
                json!({ "id": n, "email": format!("lead{n}@example.com") }),
            )
        }),
    );
    data_plane.create_table(TARGET);

    data_plane
}

pub async fn orchestrator(
    data_plane: &MemoryDataPlane,
    workspace_id: &str,
    batch_size: u32,
) -> anyhow::Result<MigrationOrchestrator> {
    let orchestrator = MigrationOrchestrator::new(MemoryStore::create(), data_plane.clone());

    orchestrator
        .initialize_migration(NewMigration::new(workspace_id, SOURCE, TARGET).batch_size(batch_size))
        .await?;

    Ok(orchestrator)
}
