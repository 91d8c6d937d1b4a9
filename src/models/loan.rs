//! Loan model and lifecycle states
//!
//! A loan row doubles as a reservation queue entry: a `Scheduled` loan whose
//! bound copy is null, or whose bound copy is not actually held for it, is a
//! reservation still waiting for a copy. The reassignment engine is the only
//! component that binds and unbinds copies on such rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Loan lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum LoanState {
    /// Reservation converted to a loan, start date may be in the future.
    /// With no usable bound copy this is a queue entry.
    Scheduled = 0,
    /// Copy is out with the user.
    Active = 1,
    /// Active and past its due date.
    Overdue = 2,
    /// Awaiting pickup at the desk.
    Pending = 3,
    /// Closed history row.
    Returned = 4,
}

impl From<i16> for LoanState {
    fn from(v: i16) -> Self {
        match v {
            0 => LoanState::Scheduled,
            1 => LoanState::Active,
            2 => LoanState::Overdue,
            3 => LoanState::Pending,
            _ => LoanState::Returned,
        }
    }
}

/// Loan model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: i64,
    pub book_id: i64,
    pub user_id: i64,
    /// Bound copy; null while the loan is queued without one.
    pub copy_id: Option<i64>,
    pub status: i16,
    pub start_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    /// Live row; closed history rows keep `false`.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Loan {
    pub fn state(&self) -> LoanState {
        self.status.into()
    }
}
