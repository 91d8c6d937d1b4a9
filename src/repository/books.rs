//! Books repository for database operations

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{EngineError, EngineResult},
    models::book::Book,
};

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: i64) -> EngineResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Book with id {} not found", id)))
    }

    /// Resolve the book a copy belongs to
    pub async fn book_id_of_copy(&self, copy_id: i64) -> EngineResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>("SELECT book_id FROM copies WHERE id = $1")
            .bind(copy_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// Total number of books in the catalog
    pub async fn count(&self) -> EngineResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All book ids, used by the single-pass recalculation
    pub async fn all_ids(&self) -> EngineResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM books ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Keyset page of book ids strictly after `last_id`
    pub async fn ids_after(&self, last_id: i64, limit: i64) -> EngineResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM books WHERE id > $1 ORDER BY id LIMIT $2",
        )
        .bind(last_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Lock a book row for update, returning it
    pub async fn lock(&self, conn: &mut PgConnection, id: i64) -> EngineResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(book)
    }

    /// Count non-lost copies of a book, on the caller's connection
    pub async fn count_copies(&self, conn: &mut PgConnection, book_id: i64) -> EngineResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM copies WHERE book_id = $1 AND status <> 3",
        )
        .bind(book_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    /// Count copies currently in the available state, on the caller's connection
    pub async fn count_available_copies(
        &self,
        conn: &mut PgConnection,
        book_id: i64,
    ) -> EngineResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM copies WHERE book_id = $1 AND status = 0",
        )
        .bind(book_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    /// Align derived status with the cached counter, without recomputing the
    /// counter itself. Returns rows changed.
    pub async fn align_status_with_counters(&self) -> EngineResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE books
            SET status = CASE WHEN available_copies > 0 THEN 0 ELSE 1 END
            WHERE (status = 0) <> (available_copies > 0)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Write the derived counters and status. Returns true when the row
    /// actually changed, so repeated recalculation reaches a fixed point.
    pub async fn update_derived(
        &self,
        conn: &mut PgConnection,
        id: i64,
        total_copies: i32,
        available_copies: i32,
        status: i16,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE books
            SET total_copies = $2, available_copies = $3, status = $4
            WHERE id = $1
              AND (total_copies <> $2 OR available_copies <> $3 OR status <> $4)
            "#,
        )
        .bind(id)
        .bind(total_copies)
        .bind(available_copies)
        .bind(status)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
