use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::entities::{history_entry, target};
use crate::db::services;
use crate::monitor::models::{
    normalize_locator, snap_interval, EventCategory, EventMetadata, HistoryEntry, NewTarget,
    Target, TargetPatch,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Target {0} not found")]
    NotFound(i32),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Change notifications emitted after each successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    TargetCreated(Target),
    TargetUpdated(Target),
    TargetDeleted(i32),
    CheckStateChanged(Target),
    HistoryAppended(HistoryEntry),
}

/// Persistence boundary for targets and their history.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get_active(&self) -> Result<Vec<Target>, StoreError>;
    async fn get_all(&self) -> Result<Vec<Target>, StoreError>;
    async fn get_by_id(&self, id: i32) -> Result<Target, StoreError>;
    async fn create(&self, new_target: NewTarget) -> Result<Target, StoreError>;
    async fn update(&self, id: i32, patch: TargetPatch) -> Result<Target, StoreError>;
    /// Removes the target and all of its history.
    async fn delete(&self, id: i32) -> Result<(), StoreError>;
    async fn update_check_state(
        &self,
        id: i32,
        last_checked_at: i64,
        signal_active: bool,
    ) -> Result<Target, StoreError>;
    async fn update_failure_count(&self, id: i32, failures: i32) -> Result<Target, StoreError>;
    async fn update_metadata(&self, id: i32, metadata: EventMetadata)
    -> Result<Target, StoreError>;
    async fn append_history(&self, target_id: i32, note: String)
    -> Result<HistoryEntry, StoreError>;
    /// Newest first.
    async fn get_history(&self, target_id: i32) -> Result<Vec<HistoryEntry>, StoreError>;
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

impl From<target::Model> for Target {
    fn from(model: target::Model) -> Self {
        let category = model
            .category
            .parse::<EventCategory>()
            .unwrap_or_default();
        Target {
            id: model.id,
            locator: model.locator,
            interval_minutes: model.interval_minutes,
            active: model.is_active,
            metadata: EventMetadata {
                name: model.event_name,
                date: model.event_date,
                category,
            },
            last_checked_at: model.last_checked_at,
            consecutive_failures: model.consecutive_failures,
            signal_active: model.signal_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

impl From<history_entry::Model> for HistoryEntry {
    fn from(model: history_entry::Model) -> Self {
        HistoryEntry {
            id: model.id,
            target_id: model.target_id,
            timestamp: model.timestamp,
            note: model.note,
        }
    }
}

fn validate_locator(raw: &str) -> Result<String, StoreError> {
    if raw.trim().is_empty() {
        return Err(StoreError::InvalidInput("locator must not be empty".into()));
    }
    let locator = normalize_locator(raw);
    url::Url::parse(&locator)
        .map_err(|e| StoreError::InvalidInput(format!("invalid locator '{locator}': {e}")))?;
    Ok(locator)
}

fn validate_interval(minutes: i32) -> Result<i32, StoreError> {
    snap_interval(minutes).ok_or_else(|| {
        StoreError::InvalidInput(format!(
            "interval must be between 1 and 360 minutes, got {minutes}"
        ))
    })
}

#[derive(Clone)]
pub struct SeaOrmTargetStore {
    db: DatabaseConnection,
    events: broadcast::Sender<StoreEvent>,
}

impl SeaOrmTargetStore {
    pub fn new(db: DatabaseConnection) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { db, events }
    }

    fn publish(&self, event: StoreEvent) {
        if self.events.receiver_count() == 0 {
            return;
        }
        if let Err(e) = self.events.send(event) {
            debug!(error = %e, "No store event subscribers.");
        }
    }
}

#[async_trait]
impl TargetStore for SeaOrmTargetStore {
    async fn get_active(&self) -> Result<Vec<Target>, StoreError> {
        let models = services::get_active_targets(&self.db).await?;
        Ok(models.into_iter().map(Target::from).collect())
    }

    async fn get_all(&self) -> Result<Vec<Target>, StoreError> {
        let models = services::get_all_targets(&self.db).await?;
        Ok(models.into_iter().map(Target::from).collect())
    }

    async fn get_by_id(&self, id: i32) -> Result<Target, StoreError> {
        services::get_target_by_id(&self.db, id)
            .await?
            .map(Target::from)
            .ok_or(StoreError::NotFound(id))
    }

    async fn create(&self, new_target: NewTarget) -> Result<Target, StoreError> {
        let new_target = NewTarget {
            locator: validate_locator(&new_target.locator)?,
            interval_minutes: validate_interval(new_target.interval_minutes)?,
            active: new_target.active,
        };
        let target = Target::from(services::create_target(&self.db, new_target).await?);
        self.publish(StoreEvent::TargetCreated(target.clone()));
        Ok(target)
    }

    async fn update(&self, id: i32, patch: TargetPatch) -> Result<Target, StoreError> {
        let patch = TargetPatch {
            locator: patch.locator.as_deref().map(validate_locator).transpose()?,
            interval_minutes: patch.interval_minutes.map(validate_interval).transpose()?,
            active: patch.active,
            event_name: patch.event_name.map(|name| name.trim().to_string()),
            event_date: patch.event_date.map(|date| date.trim().to_string()),
        };
        let target = services::update_target(&self.db, id, patch)
            .await?
            .map(Target::from)
            .ok_or(StoreError::NotFound(id))?;
        self.publish(StoreEvent::TargetUpdated(target.clone()));
        Ok(target)
    }

    async fn delete(&self, id: i32) -> Result<(), StoreError> {
        if services::delete_target(&self.db, id).await? == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.publish(StoreEvent::TargetDeleted(id));
        Ok(())
    }

    async fn update_check_state(
        &self,
        id: i32,
        last_checked_at: i64,
        signal_active: bool,
    ) -> Result<Target, StoreError> {
        let target = services::update_check_state(&self.db, id, last_checked_at, signal_active)
            .await?
            .map(Target::from)
            .ok_or(StoreError::NotFound(id))?;
        self.publish(StoreEvent::CheckStateChanged(target.clone()));
        Ok(target)
    }

    async fn update_failure_count(&self, id: i32, failures: i32) -> Result<Target, StoreError> {
        services::update_failure_count(&self.db, id, failures.max(0))
            .await?
            .map(Target::from)
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_metadata(
        &self,
        id: i32,
        metadata: EventMetadata,
    ) -> Result<Target, StoreError> {
        let target = services::update_metadata(
            &self.db,
            id,
            metadata.name,
            metadata.date,
            metadata.category,
        )
        .await?
        .map(Target::from)
        .ok_or(StoreError::NotFound(id))?;
        self.publish(StoreEvent::CheckStateChanged(target.clone()));
        Ok(target)
    }

    async fn append_history(
        &self,
        target_id: i32,
        note: String,
    ) -> Result<HistoryEntry, StoreError> {
        if services::get_target_by_id(&self.db, target_id).await?.is_none() {
            return Err(StoreError::NotFound(target_id));
        }
        let entry = HistoryEntry::from(services::append_history(&self.db, target_id, note).await?);
        self.publish(StoreEvent::HistoryAppended(entry.clone()));
        Ok(entry)
    }

    async fn get_history(&self, target_id: i32) -> Result<Vec<HistoryEntry>, StoreError> {
        let models = services::get_history(&self.db, target_id).await?;
        Ok(models.into_iter().map(HistoryEntry::from).collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
