//! Consistency auditor
//!
//! `verify` is a read-only sweep over the catalog that reports every class of
//! data-integrity violation as a structured issue. `autofix` repairs the
//! reparable subset; anything whose repair would need a data-loss decision
//! (orphan loans, stale pending loans) is reported and left alone.

use sqlx::Row;

use crate::{
    error::EngineResult,
    models::issue::{Issue, IssueKind},
    repository::Repository,
    services::recalculator::Recalculator,
};

/// How long a pending-pickup loan may sit before it is flagged as stale.
const STALE_PENDING_DAYS: i64 = 7;

/// Outcome of an autofix run
#[derive(Debug, Default)]
pub struct AutofixReport {
    pub fixed: u64,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct Auditor {
    repository: Repository,
    recalculator: Recalculator,
    canonical_base_url: String,
}

impl Auditor {
    pub fn new(
        repository: Repository,
        recalculator: Recalculator,
        canonical_base_url: String,
    ) -> Self {
        Self {
            repository,
            recalculator,
            canonical_base_url,
        }
    }

    /// Run every check and return the findings. Side-effect free.
    pub async fn verify(&self) -> EngineResult<Vec<Issue>> {
        let mut issues = Vec::new();

        self.check_counter_bounds(&mut issues).await?;
        self.check_orphan_loans(&mut issues).await?;
        self.check_due_dates(&mut issues).await?;
        self.check_status_mismatch(&mut issues).await?;
        self.check_reservation_loan_overlaps(&mut issues).await?;
        self.check_reservation_overlaps(&mut issues).await?;
        self.check_expired_reservations(&mut issues).await?;
        self.check_queue_gaps(&mut issues).await?;
        self.check_stale_pending(&mut issues).await?;

        // Deployment sanity, not a data check; piggybacked on the same
        // report so one admin page shows everything.
        if let Some(issue) = check_canonical_url(&self.canonical_base_url) {
            issues.push(issue);
        }

        Ok(issues)
    }

    /// Repair the reparable subset of issues. Repairs run before the
    /// recalculation so the refreshed counters see the final reservation
    /// set; a second run on an already-fixed catalog fixes nothing.
    pub async fn autofix(&self) -> EngineResult<AutofixReport> {
        let mut report = AutofixReport::default();

        let steps: [(&str, EngineResult<u64>); 4] = [
            (
                "expire lapsed reservations",
                self.repository.reservations.expire_lapsed().await,
            ),
            (
                "cancel reservations overlapping loans",
                self.repository.reservations.cancel_overlapping_loans().await,
            ),
            (
                "cancel overlapping reservations",
                self.repository
                    .reservations
                    .cancel_overlapping_reservations()
                    .await,
            ),
            (
                "promote overdue loans",
                self.repository.loans.mark_overdue_bulk().await,
            ),
        ];
        for (label, result) in steps {
            match result {
                Ok(n) => report.fixed += n,
                Err(e) => report.errors.push(format!("{}: {}", label, e)),
            }
        }

        match self.recalculator.recalculate_all().await {
            Ok(recalc) => {
                report.fixed += recalc.updated;
                report.errors.extend(recalc.errors);
            }
            Err(e) => report.errors.push(format!("recalculate all: {}", e)),
        }

        // Catches books the recalculation pass errored on.
        match self.repository.books.align_status_with_counters().await {
            Ok(n) => report.fixed += n,
            Err(e) => report.errors.push(format!("align book status: {}", e)),
        }

        match self.repository.reservations.resequence_all().await {
            Ok(n) => report.fixed += n,
            Err(e) => report.errors.push(format!("resequence queues: {}", e)),
        }

        // Idempotent schema repair, not a data operation.
        if let Err(e) = self.repository.system.ensure_system_tables().await {
            report.errors.push(format!("ensure system tables: {}", e));
        }
        if let Err(e) = self.repository.system.ensure_indexes().await {
            report.errors.push(format!("ensure indexes: {}", e));
        }

        Ok(report)
    }

    async fn check_counter_bounds(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let rows = sqlx::query(
            "SELECT id, total_copies, available_copies FROM books
             WHERE available_copies < 0 OR available_copies > total_copies",
        )
        .fetch_all(&self.repository.pool)
        .await?;

        for row in rows {
            let id: i64 = row.get("id");
            let total: i32 = row.get("total_copies");
            let available: i32 = row.get("available_copies");
            if available < 0 {
                issues.push(Issue::error(
                    IssueKind::NegativeAvailableCopies,
                    format!("Book {}: available_copies is {}", id, available),
                ));
            } else {
                issues.push(Issue::error(
                    IssueKind::ExcessAvailableCopies,
                    format!(
                        "Book {}: available_copies {} exceeds total_copies {}",
                        id, available, total
                    ),
                ));
            }
        }
        Ok(())
    }

    async fn check_orphan_loans(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let rows = sqlx::query(
            r#"
            SELECT l.id,
                   NOT EXISTS (SELECT 1 FROM books b WHERE b.id = l.book_id) AS missing_book,
                   NOT EXISTS (SELECT 1 FROM users u WHERE u.id = l.user_id) AS missing_user
            FROM loans l
            WHERE l.active
              AND (NOT EXISTS (SELECT 1 FROM books b WHERE b.id = l.book_id)
                   OR NOT EXISTS (SELECT 1 FROM users u WHERE u.id = l.user_id))
            "#,
        )
        .fetch_all(&self.repository.pool)
        .await?;

        for row in rows {
            let id: i64 = row.get("id");
            let missing_book: bool = row.get("missing_book");
            let what = if missing_book { "book" } else { "user" };
            issues.push(Issue::error(
                IssueKind::OrphanLoan,
                format!("Loan {}: references a nonexistent {}", id, what),
            ));
        }
        Ok(())
    }

    async fn check_due_dates(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM loans WHERE active AND status IN (1, 2) AND due_date IS NULL",
        )
        .fetch_all(&self.repository.pool)
        .await?;

        for id in ids {
            issues.push(Issue::error(
                IssueKind::MissingDueDate,
                format!("Loan {}: active without a due date", id),
            ));
        }
        Ok(())
    }

    async fn check_status_mismatch(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let rows = sqlx::query(
            "SELECT id, status, available_copies FROM books
             WHERE (status = 0) <> (available_copies > 0)",
        )
        .fetch_all(&self.repository.pool)
        .await?;

        for row in rows {
            let id: i64 = row.get("id");
            let available: i32 = row.get("available_copies");
            issues.push(Issue::error(
                IssueKind::BookStatusMismatch,
                format!(
                    "Book {}: status disagrees with available_copies = {}",
                    id, available
                ),
            ));
        }
        Ok(())
    }

    async fn check_reservation_loan_overlaps(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let rows = sqlx::query(
            r#"
            SELECT r.id AS reservation_id, l.id AS loan_id
            FROM reservations r
            JOIN loans l ON l.book_id = r.book_id
            WHERE r.status = 0
              AND r.start_date IS NOT NULL
              AND l.active
              AND l.status IN (1, 2, 3)
              AND l.due_date IS NOT NULL
              AND l.start_date <= COALESCE(r.end_date, r.start_date)
              AND l.due_date >= r.start_date
            "#,
        )
        .fetch_all(&self.repository.pool)
        .await?;

        for row in rows {
            let rid: i64 = row.get("reservation_id");
            let lid: i64 = row.get("loan_id");
            issues.push(Issue::error(
                IssueKind::ReservationLoanOverlap,
                format!("Reservation {} overlaps loan {}", rid, lid),
            ));
        }
        Ok(())
    }

    async fn check_reservation_overlaps(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let rows = sqlx::query(
            r#"
            SELECT r.id AS later_id, r2.id AS earlier_id
            FROM reservations r
            JOIN reservations r2
              ON r2.book_id = r.book_id AND r2.id <> r.id AND r2.created_at < r.created_at
            WHERE r.status = 0 AND r2.status = 0
              AND r.start_date IS NOT NULL AND r2.start_date IS NOT NULL
              AND r2.start_date <= COALESCE(r.end_date, r.start_date)
              AND COALESCE(r2.end_date, r2.start_date) >= r.start_date
            "#,
        )
        .fetch_all(&self.repository.pool)
        .await?;

        for row in rows {
            let later: i64 = row.get("later_id");
            let earlier: i64 = row.get("earlier_id");
            issues.push(Issue::error(
                IssueKind::ReservationOverlap,
                format!("Reservation {} overlaps earlier reservation {}", later, earlier),
            ));
        }
        Ok(())
    }

    async fn check_expired_reservations(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM reservations WHERE status = 0 AND expires_at < NOW()",
        )
        .fetch_all(&self.repository.pool)
        .await?;

        for id in ids {
            issues.push(Issue::warning(
                IssueKind::ExpiredReservationActive,
                format!("Reservation {}: expired but still active", id),
            ));
        }
        Ok(())
    }

    async fn check_queue_gaps(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let rows = sqlx::query(
            r#"
            SELECT book_id
            FROM reservations
            WHERE status = 0
            GROUP BY book_id
            HAVING MIN(queue_position) <> 1
                OR MAX(queue_position) <> COUNT(*)
                OR COUNT(DISTINCT queue_position) <> COUNT(*)
            "#,
        )
        .fetch_all(&self.repository.pool)
        .await?;

        for row in rows {
            let book_id: i64 = row.get("book_id");
            issues.push(Issue::warning(
                IssueKind::QueuePositionGap,
                format!("Book {}: queue positions are not a contiguous 1..N", book_id),
            ));
        }
        Ok(())
    }

    async fn check_stale_pending(&self, issues: &mut Vec<Issue>) -> EngineResult<()> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM loans
             WHERE active AND status = 3
               AND created_at < NOW() - make_interval(days => $1::int)",
        )
        .bind(STALE_PENDING_DAYS)
        .fetch_all(&self.repository.pool)
        .await?;

        for id in ids {
            issues.push(Issue::warning(
                IssueKind::StalePendingLoan,
                format!(
                    "Loan {}: pending pickup for more than {} days",
                    id, STALE_PENDING_DAYS
                ),
            ));
        }
        Ok(())
    }
}

/// Deployment-sanity check on the configured canonical base URL.
fn check_canonical_url(url: &str) -> Option<Issue> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Some(Issue::warning(
            IssueKind::CanonicalUrlMisconfigured,
            "Canonical base URL is not configured",
        ));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Some(Issue::warning(
            IssueKind::CanonicalUrlMisconfigured,
            format!("Canonical base URL {} is not an http(s) URL", trimmed),
        ));
    }
    if trimmed.ends_with('/') {
        return Some(Issue::warning(
            IssueKind::CanonicalUrlMisconfigured,
            format!("Canonical base URL {} must not end with a slash", trimmed),
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_accepts_plain_https() {
        assert!(check_canonical_url("https://library.example.org").is_none());
        assert!(check_canonical_url("http://localhost:8080").is_none());
    }

    #[test]
    fn canonical_url_flags_bad_values() {
        assert!(check_canonical_url("").is_some());
        assert!(check_canonical_url("library.example.org").is_some());
        assert!(check_canonical_url("https://library.example.org/").is_some());
    }
}
