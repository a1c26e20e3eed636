//! Tunables of the migration engine.
//!
//! Every value has a constant default; [`ConfigBuilder`] overrides them for a
//! single state manager or orchestrator.

/// Batch size used when a migration is created without one.
pub const DEFAULT_BACKFILL_BATCH_SIZE: u32 = 1000;

/// Number of recorded errors after which a migration is forced into `failed`.
///
/// Stops an unattended caller from looping forever against a broken data plane.
pub const MAX_ERROR_COUNT_BEFORE_ABORT: u32 = 10;

/// Minimum parity score (percent) required before a migration may become `cutover_ready`.
pub const CUTOVER_PARITY_THRESHOLD: f64 = 99.9;

/// Number of audit events returned with a migration summary.
pub const RECENT_EVENTS_LIMIT: usize = 20;

/// How many times a mutation is re-read and re-applied after losing a
/// compare-and-swap race before the conflict is surfaced.
pub const MAX_WRITE_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Batch size for migrations created without an explicit one
    pub default_batch_size: u32,

    /// Errors tolerated before the migration is aborted
    pub max_error_count: u32,

    /// Parity score required to enter `cutover_ready`
    pub parity_threshold: f64,

    /// Events included in a summary
    pub recent_events_limit: usize,

    /// Compare-and-swap retries per mutation
    pub max_write_conflict_retries: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BACKFILL_BATCH_SIZE,
            max_error_count: MAX_ERROR_COUNT_BEFORE_ABORT,
            parity_threshold: CUTOVER_PARITY_THRESHOLD,
            recent_events_limit: RECENT_EVENTS_LIMIT,
            max_write_conflict_retries: MAX_WRITE_CONFLICT_RETRIES,
        }
    }
}

#[derive(Debug)]
pub struct ConfigBuilder {
    config: MigrationConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MigrationConfig::default(),
        }
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.config.default_batch_size = size;
        self
    }

    pub fn max_error_count(mut self, max: u32) -> Self {
        self.config.max_error_count = max;
        self
    }

    pub fn parity_threshold(mut self, threshold: f64) -> Self {
        self.config.parity_threshold = threshold;
        self
    }

    pub fn recent_events_limit(mut self, limit: usize) -> Self {
        self.config.recent_events_limit = limit;
        self
    }

    pub fn max_write_conflict_retries(mut self, retries: u32) -> Self {
        self.config.max_write_conflict_retries = retries;
        self
    }

    pub fn build(self) -> MigrationConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
