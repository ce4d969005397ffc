use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{error, info};

pub async fn get_connection_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    info!("Creating database connection pool...");

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

pub async fn migrate_database(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        error!("Migration error: {}", e);
        sqlx::Error::Protocol(format!("Migration error: {}", e))
    })
}
