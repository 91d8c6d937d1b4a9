//! Reservation-to-loan conversion collaborator

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::{
    error::EngineResult,
    models::{copy::CopyStatus, reservation::ReservationStatus},
    repository::Repository,
    services::recalculator::Recalculator,
    tx::TxScope,
};

/// Loan duration granted to a converted reservation.
const CONVERTED_LOAN_DAYS: i64 = 21;

/// Contract consumed by the maintenance orchestrator: convert the first
/// date-eligible reservation in a book's queue if a copy is available.
/// Returns whether a conversion occurred.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReservationConverter: Send + Sync {
    async fn process_book_availability(&self, book_id: i64) -> EngineResult<bool>;
}

/// Production converter working off the reservation queue under a row lock
/// on the book.
#[derive(Clone)]
pub struct QueueReservationConverter {
    repository: Repository,
    recalculator: Recalculator,
}

impl QueueReservationConverter {
    pub fn new(repository: Repository, recalculator: Recalculator) -> Self {
        Self {
            repository,
            recalculator,
        }
    }
}

#[async_trait]
impl ReservationConverter for QueueReservationConverter {
    async fn process_book_availability(&self, book_id: i64) -> EngineResult<bool> {
        let now = Utc::now();
        let mut scope = TxScope::begin(&self.repository.pool).await?;

        // The book row lock serializes conversions for this book against
        // concurrent converter calls.
        let Some(_book) = self.repository.books.lock(scope.conn(), book_id).await? else {
            scope.rollback().await?;
            return Ok(false);
        };

        let Some(reservation) = self
            .repository
            .reservations
            .first_in_queue(scope.conn(), book_id, now)
            .await?
        else {
            scope.rollback().await?;
            return Ok(false);
        };

        let Some(copy) = self
            .repository
            .copies
            .lock_first_available(scope.conn(), book_id)
            .await?
        else {
            scope.rollback().await?;
            return Ok(false);
        };

        let start = reservation.start_date.unwrap_or(now).max(now);
        let due = start + Duration::days(CONVERTED_LOAN_DAYS);

        let loan_id = self
            .repository
            .loans
            .create_scheduled(
                scope.conn(),
                book_id,
                reservation.user_id,
                copy.id,
                start,
                due,
            )
            .await?;
        self.repository
            .copies
            .set_status(scope.conn(), copy.id, CopyStatus::Reserved)
            .await?;
        self.repository
            .reservations
            .set_status(scope.conn(), reservation.id, ReservationStatus::Fulfilled)
            .await?;
        self.repository
            .reservations
            .resequence_book(scope.conn(), book_id)
            .await?;

        self.recalculator
            .recalculate_book_scoped(&mut scope, book_id)
            .await?;

        scope.commit().await?;

        tracing::info!(
            book_id,
            reservation_id = reservation.id,
            loan_id,
            copy_id = copy.id,
            "reservation converted to scheduled loan"
        );

        Ok(true)
    }
}
