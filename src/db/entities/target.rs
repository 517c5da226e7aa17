use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "targets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub locator: String,
    pub interval_minutes: i32,
    pub is_active: bool,
    #[sea_orm(nullable)]
    pub event_name: Option<String>,
    #[sea_orm(nullable)]
    pub event_date: Option<String>,
    pub category: String,
    pub last_checked_at: i64,
    pub consecutive_failures: i32,
    pub signal_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::history_entry::Entity")]
    HistoryEntry,
}

impl Related<super::history_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::HistoryEntry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
