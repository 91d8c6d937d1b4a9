//! System tables: the update log and the migration-tracking table
//!
//! The auditor's autofix path verifies these exist and creates them when
//! missing, along with the secondary indexes the engine's hot queries rely
//! on. All statements are idempotent.

use sqlx::{Pool, Postgres};

use crate::error::EngineResult;

#[derive(Clone)]
pub struct SystemRepository {
    pool: Pool<Postgres>,
}

impl SystemRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create the update log and migration-tracking tables if missing
    pub async fn ensure_system_tables(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS update_log (
                id BIGSERIAL PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                link TEXT,
                entity_id BIGINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version BIGINT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create the secondary indexes the engine queries depend on
    pub async fn ensure_indexes(&self) -> EngineResult<()> {
        let statements = [
            "CREATE INDEX IF NOT EXISTS idx_copies_book_status ON copies (book_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_loans_book_active ON loans (book_id) WHERE active",
            "CREATE INDEX IF NOT EXISTS idx_loans_copy_active ON loans (copy_id) WHERE active",
            "CREATE INDEX IF NOT EXISTS idx_reservations_book_queue \
             ON reservations (book_id, queue_position) WHERE status = 0",
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Append an entry to the update log
    pub async fn record(
        &self,
        kind: &str,
        title: &str,
        message: &str,
        link: Option<&str>,
        entity_id: Option<i64>,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO update_log (kind, title, message, link, entity_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(kind)
        .bind(title)
        .bind(message)
        .bind(link)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
