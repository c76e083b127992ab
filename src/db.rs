use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::store::PgDocumentStore;

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Document store over this pool, with its table created if missing.
    pub async fn document_store(&self) -> anyhow::Result<PgDocumentStore> {
        let store = PgDocumentStore::new(self.pool.clone());
        store
            .ensure_schema()
            .await
            .map_err(|e| anyhow::anyhow!("failed to prepare documents table: {}", e))?;
        Ok(store)
    }
}
