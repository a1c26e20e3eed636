use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromStr, Serialize, Deserialize)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MigrationEventType {
    MigrationCreated,
    Transition,
    BackfillProgress,
    ParityChecked,
    Error,
    Deleted,
    Reset,
}

/// Audit entry. Events are appended and never mutated or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub id: Uuid,
    pub workspace_id: String,
    pub event_type: MigrationEventType,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

impl MigrationEvent {
    pub fn new(workspace_id: impl Into<String>, event_type: MigrationEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            event_type,
            detail: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn detail<D: Serialize>(mut self, value: D) -> Result<Self> {
        self.detail = serde_json::to_value(&value)?;

        Ok(self)
    }

    pub fn to_detail<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_value(self.detail.clone())?)
    }
}
