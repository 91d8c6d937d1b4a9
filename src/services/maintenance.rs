//! Maintenance orchestrator
//!
//! A cooldown-gated driver for the periodic upkeep tasks. Each task runs in
//! its own error boundary so one failure never blocks the others, and the
//! whole run is guarded by a Postgres advisory lock so two instances cannot
//! interleave.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use sqlx::Connection;

use crate::{
    config::MaintenanceConfig,
    error::EngineResult,
    models::{copy::CopyStatus, loan::Loan, loan::LoanState, reservation::Reservation},
    repository::Repository,
    services::{
        calendar::CalendarExport,
        conversion::ReservationConverter,
        notifications::{NotificationTemplate, Notifier},
        recalculator::Recalculator,
    },
    tx::TxScope,
};

/// Advisory lock key for single-flight maintenance across processes.
pub const MAINTENANCE_LOCK_KEY: i64 = 0x6269_626c_696f;

/// Days before the due date at which an expiry warning goes out.
const EXPIRY_WARNING_DAYS: i64 = 3;

/// Injected clock so cooldown gating is testable without waiting.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-task outcome of one maintenance run
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub activated_loans: u64,
    pub converted_reservations: u64,
    pub overdue_marked: u64,
    pub notifications_sent: u64,
    pub calendar_exported: bool,
    pub errors: Vec<String>,
}

pub struct MaintenanceOrchestrator {
    repository: Repository,
    recalculator: Recalculator,
    converter: Arc<dyn ReservationConverter>,
    calendar: Arc<dyn CalendarExport>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: MaintenanceConfig,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl MaintenanceOrchestrator {
    pub fn new(
        repository: Repository,
        recalculator: Recalculator,
        converter: Arc<dyn ReservationConverter>,
        calendar: Arc<dyn CalendarExport>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            repository,
            recalculator,
            converter,
            calendar,
            notifier,
            clock,
            config,
            last_run: Mutex::new(None),
        }
    }

    /// Run maintenance unless it ran more recently than the configured
    /// cooldown. Returns None when gated.
    pub async fn run_if_needed(&self) -> EngineResult<Option<MaintenanceReport>> {
        let now = self.clock.now();
        {
            let mut last = self.last_run.lock().expect("maintenance cooldown mutex");
            if !cooldown_elapsed(*last, now, self.config.cooldown_minutes) {
                tracing::debug!("maintenance skipped, cooldown not elapsed");
                return Ok(None);
            }
            *last = Some(now);
        }
        self.run_all().await.map(Some)
    }

    /// Execute every maintenance task, each isolated from the others'
    /// failures.
    pub async fn run_all(&self) -> EngineResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        // Advisory lock is session-scoped, so hold one connection for the
        // whole run.
        let mut lock_conn = self.repository.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(MAINTENANCE_LOCK_KEY)
            .fetch_one(&mut *lock_conn)
            .await?;
        if !acquired {
            tracing::info!("maintenance already running in another process, skipping");
            return Ok(report);
        }

        match self.activate_scheduled_loans(&mut report.errors).await {
            Ok(n) => report.activated_loans = n,
            Err(e) => report.errors.push(format!("activate scheduled loans: {}", e)),
        }

        match self.convert_due_reservations(&mut report.errors).await {
            Ok(n) => report.converted_reservations = n,
            Err(e) => report.errors.push(format!("convert reservations: {}", e)),
        }

        match self.repository.loans.mark_overdue_bulk().await {
            Ok(n) => report.overdue_marked = n,
            Err(e) => report.errors.push(format!("mark overdue: {}", e)),
        }

        match self.run_notification_sweeps().await {
            Ok(n) => report.notifications_sent = n,
            Err(e) => report.errors.push(format!("notification sweeps: {}", e)),
        }

        match self
            .calendar
            .save_to_file(Path::new(&self.config.calendar_path))
            .await
        {
            Ok(written) => report.calendar_exported = written,
            Err(e) => report.errors.push(format!("calendar export: {}", e)),
        }

        // Advisory locks survive the connection's return to the pool, so a
        // failed unlock must close the session rather than recycle it.
        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(MAINTENANCE_LOCK_KEY)
            .fetch_one(&mut *lock_conn)
            .await;
        if let Err(e) = unlocked {
            tracing::warn!(error = %e, "advisory unlock failed, closing lock connection");
            let _ = lock_conn.detach().close().await;
        }

        tracing::info!(
            activated = report.activated_loans,
            converted = report.converted_reservations,
            overdue = report.overdue_marked,
            notifications = report.notifications_sent,
            errors = report.errors.len(),
            "maintenance run finished"
        );

        Ok(report)
    }

    /// Task 1: flip scheduled loans whose start date has arrived to active,
    /// mark their copies loaned, and refresh the book counters. Per-loan
    /// failures are recorded and skipped.
    async fn activate_scheduled_loans(&self, errors: &mut Vec<String>) -> EngineResult<u64> {
        let due = self.repository.loans.due_scheduled(self.clock.now()).await?;
        let mut activated = 0_u64;

        for loan in due {
            match self.activate_one(&loan).await {
                Ok(true) => activated += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(loan_id = loan.id, error = %e, "loan activation failed");
                    errors.push(format!("activate loan {}: {}", loan.id, e));
                }
            }
        }
        Ok(activated)
    }

    async fn activate_one(&self, loan: &Loan) -> EngineResult<bool> {
        let Some(copy_id) = loan.copy_id else {
            return Ok(false);
        };

        let mut scope = TxScope::begin(&self.repository.pool).await?;

        let Some(copy) = self.repository.copies.lock(scope.conn(), copy_id).await? else {
            scope.rollback().await?;
            return Ok(false);
        };
        // The copy was reserved at bind time; anything else means another
        // writer got here first.
        if !matches!(copy.status(), CopyStatus::Reserved | CopyStatus::Available) {
            tracing::warn!(
                loan_id = loan.id,
                copy_id,
                status = copy.status,
                "copy not held for scheduled loan, skipping activation"
            );
            scope.rollback().await?;
            return Ok(false);
        }

        self.repository
            .loans
            .set_state(scope.conn(), loan.id, LoanState::Active)
            .await?;
        self.repository
            .copies
            .set_status(scope.conn(), copy_id, CopyStatus::Loaned)
            .await?;
        self.recalculator
            .recalculate_book_scoped(&mut scope, loan.book_id)
            .await?;

        scope.commit().await?;
        Ok(true)
    }

    /// Task 2: convert due reservations, at most one per book per run so a
    /// single freed copy is never over-committed.
    async fn convert_due_reservations(&self, errors: &mut Vec<String>) -> EngineResult<u64> {
        let due = self
            .repository
            .reservations
            .due_active_ordered(self.clock.now())
            .await?;
        let mut converted = 0_u64;

        for book_id in first_per_book(&due) {
            match self.converter.process_book_availability(book_id).await {
                Ok(true) => converted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(book_id, error = %e, "reservation conversion failed");
                    errors.push(format!("convert for book {}: {}", book_id, e));
                }
            }
        }
        Ok(converted)
    }

    /// Task 4: expiry warnings, overdue notices, wishlist availability.
    /// Sends are best-effort; the count is successful sends.
    async fn run_notification_sweeps(&self) -> EngineResult<u64> {
        let mut sent = 0_u64;

        for loan in self.repository.loans.due_within_days(EXPIRY_WARNING_DAYS).await? {
            if self
                .notify_for_loan(&loan, NotificationTemplate::DueSoon)
                .await
            {
                sent += 1;
            }
        }

        for loan in self.repository.loans.overdue().await? {
            if self
                .notify_for_loan(&loan, NotificationTemplate::OverdueNotice)
                .await
            {
                sent += 1;
            }
        }

        for hit in self.repository.wishlists.pending_available().await? {
            let Some(email) = hit.user_email else { continue };
            let mut vars = HashMap::new();
            vars.insert("book".to_string(), hit.book_title.clone());
            match self
                .notifier
                .send(&email, NotificationTemplate::WishlistAvailable, &vars)
                .await
            {
                Ok(()) => {
                    self.repository.wishlists.mark_notified(hit.id).await?;
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(wishlist_id = hit.id, error = %e, "wishlist notification failed");
                }
            }
        }

        Ok(sent)
    }

    async fn notify_for_loan(&self, loan: &Loan, template: NotificationTemplate) -> bool {
        let email = match self.repository.users.email_of(loan.user_id).await {
            Ok(Some(email)) => email,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(user_id = loan.user_id, error = %e, "email lookup failed");
                return false;
            }
        };

        let mut vars = HashMap::new();
        if let Ok(book) = self.repository.books.get_by_id(loan.book_id).await {
            vars.insert("book".to_string(), book.title);
        }
        if let Some(due) = loan.due_date {
            vars.insert("due_date".to_string(), due.format("%Y-%m-%d").to_string());
        }

        match self.notifier.send(&email, template, &vars).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(loan_id = loan.id, error = %e, "loan notification failed");
                false
            }
        }
    }
}

/// True when no previous run exists or the cooldown has elapsed.
fn cooldown_elapsed(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown_minutes: i64,
) -> bool {
    match last {
        None => true,
        Some(prev) => now - prev >= Duration::minutes(cooldown_minutes),
    }
}

/// Book ids of the first (lowest queue position) reservation per book. Input
/// must be ordered by (book_id, queue_position).
fn first_per_book(reservations: &[Reservation]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::new();
    for r in reservations {
        if out.last() != Some(&r.book_id) {
            out.push(r.book_id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn reservation(id: i64, book_id: i64, queue_position: i32) -> Reservation {
        Reservation {
            id,
            book_id,
            user_id: 1,
            status: 0,
            queue_position,
            start_date: None,
            end_date: None,
            expires_at: None,
            created_at: at(0),
        }
    }

    #[test]
    fn cooldown_allows_first_run() {
        assert!(cooldown_elapsed(None, at(0), 30));
    }

    #[tokio::test]
    async fn gated_run_touches_no_collaborator() {
        // Lazy pool: connecting would fail, proving the gate fires before
        // any database work.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/biblio")
            .unwrap();
        let repository = Repository::new(pool);
        let recalculator = Recalculator::new(repository.clone());

        let mut clock = MockClock::new();
        clock.expect_now().return_const(at(10));

        // No expectations set on the mocks: any call panics the test.
        let orchestrator = MaintenanceOrchestrator::new(
            repository,
            recalculator,
            Arc::new(crate::services::conversion::MockReservationConverter::new()),
            Arc::new(crate::services::calendar::MockCalendarExport::new()),
            Arc::new(crate::services::notifications::MockNotifier::new()),
            Arc::new(clock),
            MaintenanceConfig::default(),
        );
        *orchestrator.last_run.lock().unwrap() = Some(at(0));

        assert!(orchestrator.run_if_needed().await.unwrap().is_none());
    }

    #[test]
    fn cooldown_gates_recent_run() {
        assert!(!cooldown_elapsed(Some(at(0)), at(10), 30));
        assert!(cooldown_elapsed(Some(at(0)), at(30), 30));
    }

    #[test]
    fn one_conversion_per_book_per_run() {
        let rows = vec![
            reservation(1, 10, 1),
            reservation(2, 10, 2),
            reservation(3, 11, 1),
            reservation(4, 12, 1),
            reservation(5, 12, 2),
        ];
        assert_eq!(first_per_book(&rows), vec![10, 11, 12]);
    }

    #[test]
    fn empty_queue_converts_nothing() {
        assert!(first_per_book(&[]).is_empty());
    }
}
