//! Reservations repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::EngineResult,
    models::reservation::{Reservation, ReservationStatus},
};

#[derive(Clone)]
pub struct ReservationsRepository {
    pool: Pool<Postgres>,
}

impl ReservationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Active reservations whose requested start has arrived, ordered by
    /// (book, queue position) for the per-book conversion throttle.
    pub async fn due_active_ordered(&self, now: DateTime<Utc>) -> EngineResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status = 0 AND (start_date IS NULL OR start_date <= $1)
            ORDER BY book_id, queue_position
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Head of a book's queue among date-eligible active reservations, on the
    /// caller's connection (the book row is expected to be locked).
    pub async fn first_in_queue(
        &self,
        conn: &mut PgConnection,
        book_id: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE book_id = $1 AND status = 0 AND (start_date IS NULL OR start_date <= $2)
            ORDER BY queue_position
            LIMIT 1
            "#,
        )
        .bind(book_id)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Set a reservation's status on the caller's connection
    pub async fn set_status(
        &self,
        conn: &mut PgConnection,
        id: i64,
        status: ReservationStatus,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE reservations SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status as i16)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Number of active reservations whose window covers the given instant
    /// (soft holds), on the caller's connection.
    pub async fn soft_holds_at(
        &self,
        conn: &mut PgConnection,
        book_id: i64,
        at: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM reservations
            WHERE book_id = $1 AND status = 0
              AND start_date IS NOT NULL AND start_date <= $2
              AND (end_date IS NULL OR end_date >= $2)
            "#,
        )
        .bind(book_id)
        .bind(at)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    /// Re-number active queue positions to a contiguous 1..N per book,
    /// preserving the existing order. Returns rows changed.
    pub async fn resequence_all(&self) -> EngineResult<u64> {
        let result = sqlx::query(
            r#"
            WITH ranked AS (
                SELECT id,
                       ROW_NUMBER() OVER (
                           PARTITION BY book_id
                           ORDER BY queue_position, id
                       ) AS rn
                FROM reservations
                WHERE status = 0
            )
            UPDATE reservations r
            SET queue_position = ranked.rn
            FROM ranked
            WHERE r.id = ranked.id AND r.queue_position <> ranked.rn
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Same re-numbering restricted to one book, on the caller's connection
    pub async fn resequence_book(
        &self,
        conn: &mut PgConnection,
        book_id: i64,
    ) -> EngineResult<u64> {
        let result = sqlx::query(
            r#"
            WITH ranked AS (
                SELECT id,
                       ROW_NUMBER() OVER (ORDER BY queue_position, id) AS rn
                FROM reservations
                WHERE status = 0 AND book_id = $1
            )
            UPDATE reservations r
            SET queue_position = ranked.rn
            FROM ranked
            WHERE r.id = ranked.id AND r.queue_position <> ranked.rn
            "#,
        )
        .bind(book_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cancel active reservations past their absolute expiry. Returns rows
    /// changed.
    pub async fn expire_lapsed(&self) -> EngineResult<u64> {
        let result = sqlx::query(
            "UPDATE reservations SET status = 2 WHERE status = 0 AND expires_at < NOW()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cancel active reservations overlapping a live loan's occupied period
    /// for the same book. Returns rows changed.
    pub async fn cancel_overlapping_loans(&self) -> EngineResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reservations r
            SET status = 1
            WHERE r.status = 0
              AND r.start_date IS NOT NULL
              AND EXISTS (
                  SELECT 1 FROM loans l
                  WHERE l.book_id = r.book_id
                    AND l.active
                    AND l.status IN (1, 2, 3)
                    AND l.due_date IS NOT NULL
                    AND l.start_date <= COALESCE(r.end_date, r.start_date)
                    AND l.due_date >= r.start_date
              )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cancel the later-created of any two overlapping active reservations
    /// for the same book, keeping the earliest. Returns rows changed.
    pub async fn cancel_overlapping_reservations(&self) -> EngineResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reservations r
            SET status = 1
            WHERE r.status = 0
              AND r.start_date IS NOT NULL
              AND EXISTS (
                  SELECT 1 FROM reservations r2
                  WHERE r2.book_id = r.book_id
                    AND r2.status = 0
                    AND r2.id <> r.id
                    AND r2.created_at < r.created_at
                    AND r2.start_date IS NOT NULL
                    AND r2.start_date <= COALESCE(r.end_date, r.start_date)
                    AND COALESCE(r2.end_date, r2.start_date) >= r.start_date
              )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
