use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{merge_patch, Document, DocumentStore, Filter, StoreError, WriteBatch, WriteOp};

/// Document store over a single Postgres JSONB table.
///
/// A batch is one SQL transaction; updates lock their row with
/// `SELECT ... FOR UPDATE` so preconditions are checked against the value the
/// transaction will overwrite.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

type DocumentRow = (Uuid, Value, DateTime<Utc>, DateTime<Utc>);

fn into_document((id, data, created_at, updated_at): DocumentRow) -> Document {
    Document {
        id,
        data,
        created_at,
        updated_at,
    }
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the documents table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id UUID NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS documents_data_gin ON documents USING GIN (data jsonb_path_ops)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply(tx: &mut Transaction<'_, Postgres>, op: WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::Create {
                collection,
                id,
                data,
            } => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO documents (collection, id, data, created_at, updated_at)
                    VALUES ($1, $2, $3, now(), now())
                    "#,
                )
                .bind(&collection)
                .bind(id)
                .bind(&data)
                .execute(&mut **tx)
                .await;

                match result {
                    Ok(_) => Ok(()),
                    Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                        StoreError::AlreadyExists(format!("{}/{}", collection, id)),
                    ),
                    Err(e) => Err(StoreError::Database(e)),
                }
            }
            WriteOp::Update {
                collection,
                id,
                patch,
                precondition,
            } => {
                let current: Option<(Value,)> = sqlx::query_as(
                    "SELECT data FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
                )
                .bind(&collection)
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;

                let Some((mut data,)) = current else {
                    return Err(StoreError::NotFound(format!("{}/{}", collection, id)));
                };

                if let Some(pre) = precondition {
                    if !pre.holds(&data) {
                        return Err(StoreError::PreconditionFailed(format!(
                            "{}/{}: {}",
                            collection, id, pre
                        )));
                    }
                }

                merge_patch(&mut data, &patch)?;

                sqlx::query(
                    "UPDATE documents SET data = $3, updated_at = now() WHERE collection = $1 AND id = $2",
                )
                .bind(&collection)
                .bind(id)
                .bind(&data)
                .execute(&mut **tx)
                .await?;

                Ok(())
            }
        }
    }
}

/// Append the SQL form of a filter to the builder.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::Eq { field, value } => {
            qb.push("(data -> ");
            qb.push_bind(field.clone());
            qb.push(") = ");
            qb.push_bind(value.clone());
        }
        Filter::Or(filters) if filters.is_empty() => {
            qb.push("FALSE");
        }
        Filter::And(filters) if filters.is_empty() => {
            qb.push("TRUE");
        }
        Filter::Or(filters) | Filter::And(filters) => {
            let joiner = if matches!(filter, Filter::Or(_)) {
                " OR "
            } else {
                " AND "
            };
            qb.push("(");
            for (idx, inner) in filters.iter().enumerate() {
                if idx > 0 {
                    qb.push(joiner);
                }
                push_filter(qb, inner);
            }
            qb.push(")");
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>, StoreError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, data, created_at, updated_at FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_document))
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT id, data, created_at, updated_at FROM documents WHERE collection = ",
        );
        qb.push_bind(collection.to_string());
        qb.push(" AND ");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at ASC, id ASC");

        let rows: Vec<DocumentRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(into_document).collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let writes = batch.len();

        for op in batch.into_ops() {
            // Dropping `tx` on error rolls the whole batch back.
            Self::apply(&mut tx, op).await?;
        }

        tx.commit().await?;
        tracing::debug!("Committed batch of {} writes", writes);
        Ok(())
    }
}
