use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

pub mod images;
pub mod jobs;
pub mod memory;
pub mod videos;

pub use images::{ImageRecordRepo, PgImageRecordRepo};
pub use jobs::{JobStore, PgJobStore};
pub use memory::{MemoryImageRecordRepo, MemoryJobStore, MemoryVideoRecordRepo};
pub use videos::{PgVideoRecordRepo, VideoRecordRepo};

/// Initialize PostgreSQL connection pool.
///
/// `database_name`, when given, overrides the database named in the URL.
pub async fn init_pool(
    database_url: &str,
    database_name: Option<&str>,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    let mut options = PgConnectOptions::from_str(database_url)?;
    if let Some(name) = database_name {
        options = options.database(name);
    }

    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(options)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
