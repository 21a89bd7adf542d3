use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

pub mod directory;
pub mod memory;
pub mod queries;
pub mod store;

pub use directory::{Directory, PgDirectory};
pub use memory::{DemoData, MemoryDirectory, MemoryEmergencyStore};
pub use store::{EmergencyStore, PgEmergencyStore};

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
