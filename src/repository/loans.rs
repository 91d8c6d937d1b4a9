//! Loans repository for database operations
//!
//! Queue-entry semantics live here: a blocked queue entry is an active
//! scheduled loan whose bound copy is missing, loaned out, or lost. A
//! scheduled loan holding a reserved copy is satisfied, not blocked.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::EngineResult,
    models::loan::{Loan, LoanState},
};

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Oldest blocked queue entry for a book, FIFO by creation time.
    ///
    /// Unlocked optimistic read; the caller re-verifies the candidate copy
    /// under a row lock before binding.
    pub async fn oldest_blocked(&self, book_id: i64) -> EngineResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            SELECT l.* FROM loans l
            LEFT JOIN copies c ON l.copy_id = c.id
            WHERE l.book_id = $1
              AND l.active
              AND l.status = 0
              AND (l.copy_id IS NULL OR c.status IN (1, 3))
            ORDER BY l.created_at
            LIMIT 1
            "#,
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(loan)
    }

    /// The active queue-entry loan currently bound to a copy, if any
    pub async fn queue_entry_bound_to(&self, copy_id: i64) -> EngineResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE copy_id = $1 AND active AND status = 0 LIMIT 1",
        )
        .bind(copy_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(loan)
    }

    /// True when any live loan is bound to the copy, on the caller's
    /// connection. Guards against a stale available status on a copy that is
    /// already promised to a future-start loan.
    pub async fn copy_has_live_loan(
        &self,
        conn: &mut PgConnection,
        copy_id: i64,
    ) -> EngineResult<bool> {
        let engaged: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM loans WHERE copy_id = $1 AND active)",
        )
        .bind(copy_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(engaged)
    }

    /// Bind a copy to a loan, on the caller's connection
    pub async fn bind_copy(
        &self,
        conn: &mut PgConnection,
        loan_id: i64,
        copy_id: i64,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE loans SET copy_id = $2 WHERE id = $1")
            .bind(loan_id)
            .bind(copy_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Release the bound copy, putting the loan back to "waiting, no copy"
    pub async fn release_copy(&self, conn: &mut PgConnection, loan_id: i64) -> EngineResult<()> {
        sqlx::query("UPDATE loans SET copy_id = NULL WHERE id = $1")
            .bind(loan_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Set a loan's state, on the caller's connection
    pub async fn set_state(
        &self,
        conn: &mut PgConnection,
        loan_id: i64,
        state: LoanState,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE loans SET status = $2 WHERE id = $1")
            .bind(loan_id)
            .bind(state as i16)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Scheduled loans whose start date has arrived and that hold a copy
    pub async fn due_scheduled(&self, now: DateTime<Utc>) -> EngineResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE active AND status = 0 AND copy_id IS NOT NULL AND start_date <= $1
            ORDER BY start_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    /// Promote active loans past their due date to overdue. Returns the
    /// number of rows promoted.
    pub async fn mark_overdue_bulk(&self) -> EngineResult<u64> {
        let result = sqlx::query(
            "UPDATE loans SET status = 2 WHERE active AND status = 1 AND due_date < NOW()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Active loans due within the next `days` days, for expiry warnings
    pub async fn due_within_days(&self, days: i64) -> EngineResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE active AND status = 1
              AND due_date BETWEEN NOW() AND NOW() + make_interval(days => $1::int)
            ORDER BY due_date
            "#,
        )
        .bind(days)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    /// All overdue loans, for overdue notices
    pub async fn overdue(&self) -> EngineResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE active AND status = 2 ORDER BY due_date",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    /// Loans with a due date, for the calendar export
    pub async fn with_due_dates(&self) -> EngineResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE active AND due_date IS NOT NULL ORDER BY due_date",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    /// Create a scheduled loan from a converted reservation, on the caller's
    /// connection. Returns the new loan id.
    pub async fn create_scheduled(
        &self,
        conn: &mut PgConnection,
        book_id: i64,
        user_id: i64,
        copy_id: i64,
        start_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO loans (book_id, user_id, copy_id, status, start_date, due_date, active)
            VALUES ($1, $2, $3, 0, $4, $5, TRUE)
            RETURNING id
            "#,
        )
        .bind(book_id)
        .bind(user_id)
        .bind(copy_id)
        .bind(start_date)
        .bind(due_date)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }
}
