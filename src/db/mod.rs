pub(crate) mod models;
pub(crate) mod types;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, SqlitePool};

use crate::core::config::Settings;

pub(crate) async fn init_pool(settings: &Settings) -> Result<SqlitePool, sqlx::Error> {
    let database = settings.database();
    let connect_options = SqliteConnectOptions::from_str(&database.database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .disable_statement_logging();

    let mut pool_options = SqlitePoolOptions::new()
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .test_before_acquire(true);

    // Every connection to `:memory:` opens its own empty database.
    pool_options = if database.is_in_memory() {
        pool_options.max_connections(1).idle_timeout(None).max_lifetime(None)
    } else {
        pool_options.max_connections(database.max_connections)
    };

    pool_options.connect_with(connect_options).await
}

/// Provisions the papers/questions schema. Safe to call on every start.
pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub(crate) async fn ping(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
