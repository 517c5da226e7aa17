//! CRUD and check-state writes for monitored targets.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::db::entities::{prelude::*, target};
use crate::db::services::history_service;
use crate::monitor::models::{now_millis, EventCategory, NewTarget, TargetPatch};

pub async fn create_target(
    db: &DatabaseConnection,
    new_target: NewTarget,
) -> Result<target::Model, DbErr> {
    let now = now_millis();
    let category = EventCategory::classify(None, &new_target.locator);
    let model = target::ActiveModel {
        locator: Set(new_target.locator),
        interval_minutes: Set(new_target.interval_minutes),
        is_active: Set(new_target.active),
        event_name: Set(None),
        event_date: Set(None),
        category: Set(category.to_string()),
        last_checked_at: Set(0),
        consecutive_failures: Set(0),
        signal_active: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    model.insert(db).await
}

pub async fn get_target_by_id(
    db: &DatabaseConnection,
    id: i32,
) -> Result<Option<target::Model>, DbErr> {
    TargetEntity::find_by_id(id).one(db).await
}

pub async fn get_all_targets(db: &DatabaseConnection) -> Result<Vec<target::Model>, DbErr> {
    TargetEntity::find()
        .order_by_asc(TargetColumn::Id)
        .all(db)
        .await
}

pub async fn get_active_targets(db: &DatabaseConnection) -> Result<Vec<target::Model>, DbErr> {
    TargetEntity::find()
        .filter(TargetColumn::IsActive.eq(true))
        .order_by_asc(TargetColumn::Id)
        .all(db)
        .await
}

pub async fn update_target(
    db: &DatabaseConnection,
    id: i32,
    patch: TargetPatch,
) -> Result<Option<target::Model>, DbErr> {
    let Some(existing) = get_target_by_id(db, id).await? else {
        return Ok(None);
    };
    // A user-set name re-derives the category.
    let category = patch.event_name.as_deref().map(|name| {
        let locator = patch.locator.as_deref().unwrap_or(&existing.locator);
        EventCategory::classify(Some(name), locator)
    });
    let mut model = existing.into_active_model();
    if let Some(locator) = patch.locator {
        model.locator = Set(locator);
    }
    if let Some(interval) = patch.interval_minutes {
        model.interval_minutes = Set(interval);
    }
    if let Some(active) = patch.active {
        model.is_active = Set(active);
    }
    if let Some(name) = patch.event_name {
        model.event_name = Set((!name.is_empty()).then_some(name));
    }
    if let Some(date) = patch.event_date {
        model.event_date = Set((!date.is_empty()).then_some(date));
    }
    if let Some(category) = category {
        model.category = Set(category.to_string());
    }
    model.updated_at = Set(now_millis());
    model.update(db).await.map(Some)
}

/// Deletes the target and its history in one transaction.
///
/// Returns the number of target rows removed (0 or 1).
pub async fn delete_target(db: &DatabaseConnection, id: i32) -> Result<u64, DbErr> {
    let txn = db.begin().await?;
    history_service::delete_history_for_target(&txn, id).await?;
    let result = TargetEntity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;
    Ok(result.rows_affected)
}

pub async fn update_check_state(
    db: &DatabaseConnection,
    id: i32,
    last_checked_at: i64,
    signal_active: bool,
) -> Result<Option<target::Model>, DbErr> {
    let Some(existing) = get_target_by_id(db, id).await? else {
        return Ok(None);
    };
    let mut model = existing.into_active_model();
    model.last_checked_at = Set(last_checked_at);
    model.signal_active = Set(signal_active);
    model.update(db).await.map(Some)
}

pub async fn update_failure_count(
    db: &DatabaseConnection,
    id: i32,
    consecutive_failures: i32,
) -> Result<Option<target::Model>, DbErr> {
    let Some(existing) = get_target_by_id(db, id).await? else {
        return Ok(None);
    };
    let mut model = existing.into_active_model();
    model.consecutive_failures = Set(consecutive_failures);
    model.update(db).await.map(Some)
}

pub async fn update_metadata(
    db: &DatabaseConnection,
    id: i32,
    event_name: Option<String>,
    event_date: Option<String>,
    category: EventCategory,
) -> Result<Option<target::Model>, DbErr> {
    let Some(existing) = get_target_by_id(db, id).await? else {
        return Ok(None);
    };
    let mut model = existing.into_active_model();
    model.event_name = Set(event_name);
    model.event_date = Set(event_date);
    model.category = Set(category.to_string());
    model.updated_at = Set(now_millis());
    model.update(db).await.map(Some)
}
