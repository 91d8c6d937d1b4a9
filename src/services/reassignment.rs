//! Reservation reassignment engine
//!
//! Decides which queued reservation gets a copy when one becomes available,
//! and what happens when an assigned copy is lost. Every write path follows
//! the same idiom: optimistic unlocked read, `SELECT ... FOR UPDATE` on the
//! candidate copy, re-verification under the lock, then the mutation. A lost
//! race is detected at re-verification, never prevented in advance.
//!
//! All operations are idempotent no-ops when their preconditions do not hold.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    error::EngineResult,
    models::{copy::CopyStatus, loan::Loan},
    repository::Repository,
    services::notifications::{AdminNotifier, NotificationTemplate, Notifier},
    tx::TxScope,
};

/// Upper bound on candidate-binding attempts in [`ReassignmentEngine::on_copy_lost`].
pub const MAX_REBIND_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct ReassignmentEngine {
    repository: Repository,
    notifier: Arc<dyn Notifier>,
    admin_notifier: Arc<dyn AdminNotifier>,
}

impl ReassignmentEngine {
    pub fn new(
        repository: Repository,
        notifier: Arc<dyn Notifier>,
        admin_notifier: Arc<dyn AdminNotifier>,
    ) -> Self {
        Self {
            repository,
            notifier,
            admin_notifier,
        }
    }

    /// A copy of `book_id` just became available: bind it to the oldest
    /// blocked queue entry, FIFO by creation time.
    ///
    /// Single-shot: if the copy lost its availability between the optimistic
    /// read and the row lock, the transaction rolls back and the operation
    /// exits silently. The event that frees a copy re-triggers this path, so
    /// no internal retry is needed.
    ///
    /// Returns the loan id that got the copy, if any.
    pub async fn on_new_copy_available(
        &self,
        book_id: i64,
        copy_id: i64,
    ) -> EngineResult<Option<i64>> {
        let Some(loan) = self.repository.loans.oldest_blocked(book_id).await? else {
            return Ok(None);
        };

        if !self.try_bind(loan.id, copy_id).await? {
            tracing::debug!(
                book_id,
                copy_id,
                loan_id = loan.id,
                "copy claimed concurrently, leaving reservation queued"
            );
            return Ok(None);
        }

        tracing::info!(book_id, copy_id, loan_id = loan.id, "copy bound to queued reservation");

        // Dispatched after commit: the row lock must not outlive the
        // transaction into slow notification I/O.
        self.notify_user(&loan, NotificationTemplate::CopyAvailable)
            .await;

        Ok(Some(loan.id))
    }

    /// The copy bound to a queued reservation became unavailable (lost or
    /// damaged): rebind the reservation to another copy of the same book,
    /// retrying against alternative candidates on contention, bounded by
    /// [`MAX_REBIND_ATTEMPTS`].
    pub async fn on_copy_lost(&self, copy_id: i64) -> EngineResult<()> {
        let Some(loan) = self.repository.loans.queue_entry_bound_to(copy_id).await? else {
            return Ok(());
        };

        // Exclusion set accumulates every candidate that failed under lock,
        // seeded with the lost copy, so a single faulty candidate can never
        // block the queue.
        let mut excluded = vec![copy_id];

        for attempt in 1..=MAX_REBIND_ATTEMPTS {
            let candidate = match self
                .repository
                .copies
                .find_available_excluding(loan.book_id, &excluded)
                .await?
            {
                Some(copy) => copy,
                None => {
                    tracing::info!(
                        book_id = loan.book_id,
                        loan_id = loan.id,
                        "no replacement candidates left"
                    );
                    return self.handle_no_copy_available(&loan).await;
                }
            };

            match self.try_bind(loan.id, candidate.id).await {
                Ok(true) => {
                    tracing::info!(
                        book_id = loan.book_id,
                        loan_id = loan.id,
                        lost_copy_id = copy_id,
                        new_copy_id = candidate.id,
                        attempt,
                        "reservation rebound to replacement copy"
                    );
                    return Ok(());
                }
                Ok(false) => {
                    tracing::warn!(
                        book_id = loan.book_id,
                        loan_id = loan.id,
                        copy_id = candidate.id,
                        attempt,
                        "candidate copy claimed concurrently, excluding it"
                    );
                    excluded.push(candidate.id);
                }
                Err(e) => {
                    tracing::error!(
                        book_id = loan.book_id,
                        loan_id = loan.id,
                        copy_id = candidate.id,
                        attempt,
                        error = %e,
                        "rebind attempt failed, excluding candidate"
                    );
                    excluded.push(candidate.id);
                }
            }
        }

        tracing::warn!(
            book_id = loan.book_id,
            loan_id = loan.id,
            attempts = MAX_REBIND_ATTEMPTS,
            "rebind attempts exhausted"
        );
        self.handle_no_copy_available(&loan).await
    }

    /// A returned copy is, from the queue's point of view, a new copy
    /// becoming available.
    pub async fn on_return(&self, copy_id: i64) -> EngineResult<Option<i64>> {
        let Some(book_id) = self.repository.books.book_id_of_copy(copy_id).await? else {
            return Ok(None);
        };
        self.on_new_copy_available(book_id, copy_id).await
    }

    /// Lock the copy, re-verify availability, bind and reserve. Returns
    /// false when the copy was no longer available under the lock.
    async fn try_bind(&self, loan_id: i64, copy_id: i64) -> EngineResult<bool> {
        let mut scope = TxScope::begin(&self.repository.pool).await?;

        let Some(copy) = self.repository.copies.lock(scope.conn(), copy_id).await? else {
            scope.rollback().await?;
            return Ok(false);
        };
        if !copy.is_available() {
            scope.rollback().await?;
            return Ok(false);
        }
        // Same live-loan guard as the candidate search: a copy bound to a
        // future-start scheduled loan still reads available.
        if self
            .repository
            .loans
            .copy_has_live_loan(scope.conn(), copy.id)
            .await?
        {
            scope.rollback().await?;
            return Ok(false);
        }

        self.repository
            .loans
            .bind_copy(scope.conn(), loan_id, copy_id)
            .await?;
        self.repository
            .copies
            .set_status(scope.conn(), copy_id, CopyStatus::Reserved)
            .await?;

        scope.commit().await?;
        Ok(true)
    }

    /// Terminal path: no copy exists for this reservation. Unbind the copy
    /// reference inside its own transaction, then tell the user they remain
    /// queued and alert the staff.
    async fn handle_no_copy_available(&self, loan: &Loan) -> EngineResult<()> {
        let mut scope = TxScope::begin(&self.repository.pool).await?;
        self.repository
            .loans
            .release_copy(scope.conn(), loan.id)
            .await?;
        scope.commit().await?;

        tracing::info!(
            book_id = loan.book_id,
            loan_id = loan.id,
            "reservation returned to waiting state without a copy"
        );

        self.notify_user(loan, NotificationTemplate::StillQueued).await;

        if let Err(e) = self
            .admin_notifier
            .notify(
                "copy_unavailable",
                "Copy unavailable for reservation",
                &format!(
                    "Reservation loan {} for book {} has no copy left to assign",
                    loan.id, loan.book_id
                ),
                None,
                Some(loan.id),
            )
            .await
        {
            tracing::warn!(loan_id = loan.id, error = %e, "admin notification failed");
        }

        Ok(())
    }

    /// Best-effort user notification: a failed send is logged, never
    /// propagated. The committed binding is the authoritative outcome.
    async fn notify_user(&self, loan: &Loan, template: NotificationTemplate) {
        let email = match self.repository.users.email_of(loan.user_id).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                tracing::debug!(user_id = loan.user_id, "user has no email address");
                return;
            }
            Err(e) => {
                tracing::warn!(user_id = loan.user_id, error = %e, "email lookup failed");
                return;
            }
        };

        let mut vars = HashMap::new();
        if let Ok(book) = self.repository.books.get_by_id(loan.book_id).await {
            vars.insert("book".to_string(), book.title);
        }

        if let Err(e) = self.notifier.send(&email, template, &vars).await {
            tracing::warn!(
                loan_id = loan.id,
                template = template.key(),
                error = %e,
                "notification failed"
            );
        }
    }
}
