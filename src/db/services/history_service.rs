use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};

use crate::db::entities::{history_entry, prelude::*};
use crate::monitor::models::now_millis;

pub async fn append_history(
    db: &DatabaseConnection,
    target_id: i32,
    note: String,
) -> Result<history_entry::Model, DbErr> {
    history_entry::ActiveModel {
        target_id: Set(target_id),
        timestamp: Set(now_millis()),
        note: Set(note),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Newest first.
pub async fn get_history(
    db: &DatabaseConnection,
    target_id: i32,
) -> Result<Vec<history_entry::Model>, DbErr> {
    HistoryEntryEntity::find()
        .filter(HistoryEntryColumn::TargetId.eq(target_id))
        .order_by_desc(HistoryEntryColumn::Timestamp)
        .order_by_desc(HistoryEntryColumn::Id)
        .all(db)
        .await
}

pub async fn delete_history_for_target<C: ConnectionTrait>(
    conn: &C,
    target_id: i32,
) -> Result<u64, DbErr> {
    let result = HistoryEntryEntity::delete_many()
        .filter(HistoryEntryColumn::TargetId.eq(target_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
