use crate::{
    engine::Engine,
    error::Result,
    event::MigrationEvent,
    record::{MigrationRecord, MigrationStatus},
};

#[derive(Clone)]
pub struct Store {
    pub(crate) engine: Box<dyn Engine>,
}

impl Store {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
        }
    }

    pub async fn get(&self, workspace_id: impl AsRef<str>) -> Result<Option<MigrationRecord>> {
        self.engine.get(workspace_id.as_ref()).await
    }

    pub async fn list(&self, status: Option<MigrationStatus>) -> Result<Vec<MigrationRecord>> {
        self.engine.list(status).await
    }

    /// Inserts a brand new record, failing with
    /// [`StoreError::UnexpectedOriginalVersion`](crate::StoreError::UnexpectedOriginalVersion)
    /// when the workspace already has one.
    pub async fn create(
        &self,
        record: MigrationRecord,
        event: MigrationEvent,
    ) -> Result<MigrationRecord> {
        self.engine.write(record, 0, vec![event]).await
    }

    pub async fn save(
        &self,
        record: MigrationRecord,
        original_version: u32,
        events: Vec<MigrationEvent>,
    ) -> Result<MigrationRecord> {
        self.engine.write(record, original_version, events).await
    }

    pub async fn delete(
        &self,
        workspace_id: impl AsRef<str>,
        original_version: u32,
        event: MigrationEvent,
    ) -> Result<()> {
        self.engine
            .remove(workspace_id.as_ref(), original_version, vec![event])
            .await
    }

    pub async fn append(&self, event: MigrationEvent) -> Result<()> {
        self.engine.append(vec![event]).await
    }

    pub async fn events(&self, workspace_id: impl AsRef<str>) -> Result<Vec<MigrationEvent>> {
        self.engine.read(workspace_id.as_ref(), None).await
    }

    pub async fn recent_events(
        &self,
        workspace_id: impl AsRef<str>,
        last: usize,
    ) -> Result<Vec<MigrationEvent>> {
        self.engine.read(workspace_id.as_ref(), Some(last)).await
    }
}
