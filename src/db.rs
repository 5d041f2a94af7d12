use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use std::str::FromStr;
use tracing::info;

pub type DbPool = SqlitePool;

pub const DEFAULT_DB_URL: &str = "sqlite://ocelot.db";

pub async fn init_pool(db_url: &str) -> Result<SqlitePool, Box<dyn std::error::Error>> {
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        info!("Creating database: {}", db_url);
        Sqlite::create_database(db_url).await?;
    }

    // WAL keeps readers (status polls) from colliding with the dispatcher's writes.
    let options = SqliteConnectOptions::from_str(db_url)?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(50)
        .connect_with(options)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            token INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}
