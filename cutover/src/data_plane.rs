use async_trait::async_trait;
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::*;

/// Outcome of copying one chunk of rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyBatch {
    pub rows_copied: u64,
    /// Key of the last row copied, the resume point of the next chunk.
    pub next_cursor: Option<String>,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Compare every row instead of a sample.
    pub full: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableComparison {
    /// Percentage of compared rows that match, `0..=100`.
    pub score: f64,
    #[serde(rename = "match")]
    pub matched: bool,
}

/// Performs the real effects of a migration on the database.
///
/// `copy_batch` must be idempotent (upsert) since a chunk whose progress was
/// never committed is copied again on resume.
#[async_trait]
pub trait DataPlaneClient: DynClone + Send + Sync {
    async fn enable_dual_write_trigger(&self, source: &'_ str, target: &'_ str)
        -> anyhow::Result<()>;

    async fn disable_dual_write_trigger(
        &self,
        source: &'_ str,
        target: &'_ str,
    ) -> anyhow::Result<()>;

    async fn count_rows(&self, table: &'_ str) -> anyhow::Result<u64>;

    async fn copy_batch(
        &self,
        source: &'_ str,
        target: &'_ str,
        cursor: Option<&'_ str>,
        batch_size: u32,
    ) -> anyhow::Result<CopyBatch>;

    async fn compare_tables(
        &self,
        source: &'_ str,
        target: &'_ str,
        options: CompareOptions,
    ) -> anyhow::Result<TableComparison>;

    async fn switch_read_path(&self, workspace_id: &'_ str, target: &'_ str) -> anyhow::Result<()>;

    async fn revert_read_path(&self, workspace_id: &'_ str, source: &'_ str) -> anyhow::Result<()>;
}

dyn_clone::clone_trait_object!(DataPlaneClient);
