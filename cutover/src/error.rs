use cutover_store::{MigrationStatus, StoreError};

/// Coarse classification shared by [`StateError`] and [`OrchestratorError`],
/// meant for callers that branch on the failure class rather than on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or a missing/duplicate record.
    Validation,
    /// The operation is not legal from the current status.
    Fsm,
    /// The data plane failed to apply an effect.
    DataPlane,
    /// The persistence layer failed or kept losing write races.
    Storage,
}

/// Caller mistakes rejected by the state manager. Never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid workspace ID")]
    InvalidWorkspaceId,

    #[error("Source and target tables cannot be the same")]
    SameTables,

    #[error("Table name '{0}' contains disallowed characters")]
    DisallowedCharacters(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Migration already exists for workspace '{0}'")]
    AlreadyExists(String),

    #[error("No migration configured for workspace '{0}'")]
    NotFound(String),

    #[error("Invalid transition from '{from}' to '{to}'")]
    InvalidTransition {
        from: MigrationStatus,
        to: MigrationStatus,
    },

    #[error("Cannot {action} in '{status}' state")]
    InvalidStatus {
        action: &'static str,
        status: MigrationStatus,
    },

    #[error("Dual-write cannot be enabled in '{0}' state")]
    DualWriteOutsideActivePhase(MigrationStatus),

    #[error("Concurrent modification of migration for workspace '{0}'")]
    WriteConflict(String),

    #[error("store `{0}`")]
    Store(#[from] StoreError),
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::InvalidWorkspaceId
            | StateError::SameTables
            | StateError::DisallowedCharacters(_)
            | StateError::InvalidInput(_)
            | StateError::AlreadyExists(_)
            | StateError::NotFound(_) => ErrorKind::Validation,
            StateError::InvalidTransition { .. }
            | StateError::InvalidStatus { .. }
            | StateError::DualWriteOutsideActivePhase(_) => ErrorKind::Fsm,
            StateError::WriteConflict(_) | StateError::Store(_) => ErrorKind::Storage,
        }
    }
}

/// Workflow failures: data-plane errors, failed gates and translated state errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Migration for workspace '{0}' already exists")]
    AlreadyExists(String),

    #[error("Dual-write must be enabled before backfill can start for workspace '{0}'")]
    DualWriteNotEnabled(String),

    #[error("Parity score {score} is below the cutover threshold {threshold}")]
    ParityBelowThreshold { score: f64, threshold: f64 },

    #[error("Backfill interrupted: migration is now '{0}'")]
    Interrupted(MigrationStatus),

    #[error("{operation} failed: {source}")]
    DataPlane {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::AlreadyExists(_) => ErrorKind::Validation,
            OrchestratorError::DualWriteNotEnabled(_)
            | OrchestratorError::ParityBelowThreshold { .. }
            | OrchestratorError::Interrupted(_) => ErrorKind::Fsm,
            OrchestratorError::DataPlane { .. } => ErrorKind::DataPlane,
            OrchestratorError::State(err) => err.kind(),
        }
    }

    pub(crate) fn data_plane(operation: &'static str, source: anyhow::Error) -> Self {
        OrchestratorError::DataPlane { operation, source }
    }
}
