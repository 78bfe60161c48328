pub mod models;
pub mod schema;

use diesel::Connection;
use diesel_async::{
    async_connection_wrapper::AsyncConnectionWrapper,
    pg::AsyncPgConnection,
    pooled_connection::{
        deadpool::{BuildError, Pool},
        AsyncDieselConnectionManager,
    },
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use thiserror::Error;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Connection error: {0}")]
    ConnectError(#[from] diesel::ConnectionError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Task join error: {0}")]
    TaskJoinError(#[from] tokio::task::JoinError),
}

pub async fn build_db_pool(db_url: &str) -> Result<Pool<AsyncPgConnection>, BuildError> {
    // TODO: I should probably move this but the type is a bit weird
    let pool_config = AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new(db_url);
    let pool = Pool::builder(pool_config).build()?;

    Ok(pool)
}

/// Runs the embedded migrations on a dedicated blocking connection.
pub async fn run_migrations(db_url: &str) -> Result<(), MigrationError> {
    let db_url = db_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn: AsyncConnectionWrapper<AsyncPgConnection> =
            AsyncConnectionWrapper::establish(&db_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map(|_| ())
            .map_err(|e| MigrationError::MigrationFailed(e.to_string()))
    })
    .await?
}
