//! Persistence: SeaORM entities over SQLite, the service functions that
//! query them, and the `TargetStore` boundary the monitor talks to.

pub mod entities;
pub mod services;
pub mod store;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

use entities::prelude::*;

pub use store::{SeaOrmTargetStore, StoreError, StoreEvent, TargetStore};

pub const MEMORY_DATABASE_URL: &str = "sqlite::memory:";

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    if database_url.contains(":memory:") || database_url.contains("mode=memory") {
        // Every pooled connection would otherwise get its own empty database.
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(5);
    }
    opt.sqlx_logging(false);

    let db = Database::connect(opt).await?;
    ensure_schema(&db).await?;
    info!(database_url = %database_url, "Database ready.");
    Ok(db)
}

/// Creates missing tables and indexes from the entity definitions.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut targets = schema.create_table_from_entity(TargetEntity);
    targets.if_not_exists();
    db.execute(backend.build(&targets)).await?;

    let mut history = schema.create_table_from_entity(HistoryEntryEntity);
    history.if_not_exists();
    db.execute(backend.build(&history)).await?;

    for mut index in schema.create_index_from_entity(HistoryEntryEntity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    Ok(())
}
