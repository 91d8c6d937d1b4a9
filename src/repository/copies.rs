//! Copies repository for database operations

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::EngineResult,
    models::copy::{Copy, CopyStatus},
};

#[derive(Clone)]
pub struct CopiesRepository {
    pool: Pool<Postgres>,
}

impl CopiesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Lock a copy row for update. The caller must re-verify availability on
    /// the returned row before acting on it.
    pub async fn lock(&self, conn: &mut PgConnection, id: i64) -> EngineResult<Option<Copy>> {
        let copy = sqlx::query_as::<_, Copy>("SELECT * FROM copies WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(copy)
    }

    /// First available copy of a book outside the exclusion set.
    ///
    /// Tie-break is lowest id. Copies with any live loan bound to them are
    /// skipped even when their status reads available, so a stale status can
    /// never lead to double-booking.
    pub async fn find_available_excluding(
        &self,
        book_id: i64,
        excluded: &[i64],
    ) -> EngineResult<Option<Copy>> {
        let copy = sqlx::query_as::<_, Copy>(
            r#"
            SELECT * FROM copies c
            WHERE c.book_id = $1
              AND c.status = 0
              AND NOT (c.id = ANY($2))
              AND NOT EXISTS (
                  SELECT 1 FROM loans l WHERE l.copy_id = c.id AND l.active
              )
            ORDER BY c.id
            LIMIT 1
            "#,
        )
        .bind(book_id)
        .bind(excluded)
        .fetch_optional(&self.pool)
        .await?;
        Ok(copy)
    }

    /// Lock the first available copy of a book, lowest id first, on the
    /// caller's connection. Same live-loan guard as the unlocked search.
    pub async fn lock_first_available(
        &self,
        conn: &mut PgConnection,
        book_id: i64,
    ) -> EngineResult<Option<Copy>> {
        let copy = sqlx::query_as::<_, Copy>(
            r#"
            SELECT * FROM copies c
            WHERE c.book_id = $1
              AND c.status = 0
              AND NOT EXISTS (
                  SELECT 1 FROM loans l WHERE l.copy_id = c.id AND l.active
              )
            ORDER BY c.id
            LIMIT 1
            FOR UPDATE OF c
            "#,
        )
        .bind(book_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(copy)
    }

    /// Set a copy's status on the caller's connection
    pub async fn set_status(
        &self,
        conn: &mut PgConnection,
        id: i64,
        status: CopyStatus,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE copies SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status as i16)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Derive copy statuses for one book from its occupying loans.
    ///
    /// Occupying means an active, overdue or pending loan, or a scheduled
    /// loan whose start date has arrived. Lost copies are never touched.
    /// Returns the number of rows that changed.
    pub async fn refresh_statuses_for_book(
        &self,
        conn: &mut PgConnection,
        book_id: i64,
    ) -> EngineResult<u64> {
        let result = sqlx::query(&Self::refresh_sql("WHERE c2.book_id = $1 AND c2.status <> 3"))
            .bind(book_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Derive copy statuses for the whole catalog in a single statement
    pub async fn refresh_statuses_all(&self) -> EngineResult<u64> {
        let result = sqlx::query(&Self::refresh_sql("WHERE c2.status <> 3"))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn refresh_sql(filter: &str) -> String {
        format!(
            r#"
            UPDATE copies c
            SET status = sub.next_status
            FROM (
                SELECT c2.id,
                    CASE
                        WHEN EXISTS (
                            SELECT 1 FROM loans l
                            WHERE l.copy_id = c2.id AND l.active AND l.status IN (1, 2, 3)
                        ) THEN 1
                        WHEN EXISTS (
                            SELECT 1 FROM loans l
                            WHERE l.copy_id = c2.id AND l.active AND l.status = 0
                              AND l.start_date <= NOW()
                        ) THEN 2
                        ELSE 0
                    END AS next_status
                FROM copies c2
                {filter}
            ) sub
            WHERE c.id = sub.id AND c.status <> sub.next_status
            "#
        )
    }
}
