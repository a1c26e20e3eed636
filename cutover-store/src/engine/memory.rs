use async_trait::async_trait;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

use crate::{
    engine::Engine,
    error::{Result, StoreError},
    event::MigrationEvent,
    record::{MigrationRecord, MigrationStatus},
    store::Store,
};

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<String, MigrationRecord>,
    events: Vec<MigrationEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<RwLock<Tables>>);

impl MemoryStore {
    pub fn create() -> Store {
        Store::new(Self::default())
    }
}

#[async_trait]
impl Engine for MemoryStore {
    async fn get(&self, workspace_id: &'_ str) -> Result<Option<MigrationRecord>> {
        Ok(self.0.read().records.get(workspace_id).cloned())
    }

    async fn list(&self, status: Option<MigrationStatus>) -> Result<Vec<MigrationRecord>> {
        let mut records = self
            .0
            .read()
            .records
            .values()
            .filter(|record| status.map_or(true, |status| record.status == status))
            .cloned()
            .collect::<Vec<_>>();

        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.workspace_id.cmp(&b.workspace_id))
        });

        Ok(records)
    }

    async fn write(
        &self,
        mut record: MigrationRecord,
        original_version: u32,
        events: Vec<MigrationEvent>,
    ) -> Result<MigrationRecord> {
        let mut data = self.0.write();

        let version = data
            .records
            .get(&record.workspace_id)
            .map(|r| r.version)
            .unwrap_or(0);

        if version != original_version {
            return Err(StoreError::UnexpectedOriginalVersion);
        }

        record.version = original_version + 1;
        data.records
            .insert(record.workspace_id.to_owned(), record.clone());
        data.events.extend(events);

        Ok(record)
    }

    async fn remove(
        &self,
        workspace_id: &'_ str,
        original_version: u32,
        events: Vec<MigrationEvent>,
    ) -> Result<()> {
        let mut data = self.0.write();

        match data.records.get(workspace_id) {
            Some(record) if record.version == original_version => {}
            _ => return Err(StoreError::UnexpectedOriginalVersion),
        };

        data.records.remove(workspace_id);
        data.events.extend(events);

        Ok(())
    }

    async fn append(&self, events: Vec<MigrationEvent>) -> Result<()> {
        self.0.write().events.extend(events);

        Ok(())
    }

    async fn read(
        &self,
        workspace_id: &'_ str,
        last: Option<usize>,
    ) -> Result<Vec<MigrationEvent>> {
        let mut events = self
            .0
            .read()
            .events
            .iter()
            .filter(|event| event.workspace_id == workspace_id)
            .cloned()
            .collect::<Vec<_>>();

        // stable: events sharing a timestamp keep their append order
        events.sort_by_key(|event| event.created_at);

        if let Some(last) = last {
            let skip = events.len().saturating_sub(last);
            events.drain(..skip);
        }

        Ok(events)
    }
}
