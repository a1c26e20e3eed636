use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::{
    error::Result,
    event::MigrationEvent,
    record::{MigrationRecord, MigrationStatus},
};

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "pg")]
mod pg;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "pg")]
pub use pg::*;

/// Storage port for migration records and their audit log.
///
/// `write` and `remove` are compare-and-swap operations on the record version:
/// an `original_version` of `0` creates the record and fails when one already
/// exists, any other value must match the stored version. Events passed along
/// are appended in the same atomic unit as the record change.
#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    async fn get(&self, workspace_id: &'_ str) -> Result<Option<MigrationRecord>>;

    async fn list(&self, status: Option<MigrationStatus>) -> Result<Vec<MigrationRecord>>;

    async fn write(
        &self,
        record: MigrationRecord,
        original_version: u32,
        events: Vec<MigrationEvent>,
    ) -> Result<MigrationRecord>;

    async fn remove(
        &self,
        workspace_id: &'_ str,
        original_version: u32,
        events: Vec<MigrationEvent>,
    ) -> Result<()>;

    async fn append(&self, events: Vec<MigrationEvent>) -> Result<()>;

    async fn read(&self, workspace_id: &'_ str, last: Option<usize>)
        -> Result<Vec<MigrationEvent>>;
}

dyn_clone::clone_trait_object!(Engine);
