//! SeaORM entities mapping the `targets` and `history_entries` tables.

pub mod history_entry;
pub mod target;

pub mod prelude {
    pub use super::target::ActiveModel as TargetActiveModel;
    pub use super::target::Column as TargetColumn;
    pub use super::target::Entity as TargetEntity;
    pub use super::target::Model as TargetModel;

    pub use super::history_entry::ActiveModel as HistoryEntryActiveModel;
    pub use super::history_entry::Column as HistoryEntryColumn;
    pub use super::history_entry::Entity as HistoryEntryEntity;
    pub use super::history_entry::Model as HistoryEntryModel;
}
