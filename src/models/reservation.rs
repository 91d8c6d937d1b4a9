//! Reservation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Reservation status. `Fulfilled` is set by the conversion collaborator when
/// a reservation becomes a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum ReservationStatus {
    Active = 0,
    Cancelled = 1,
    Expired = 2,
    Fulfilled = 3,
}

impl From<i16> for ReservationStatus {
    fn from(v: i16) -> Self {
        match v {
            0 => ReservationStatus::Active,
            1 => ReservationStatus::Cancelled,
            2 => ReservationStatus::Expired,
            _ => ReservationStatus::Fulfilled,
        }
    }
}

/// Reservation model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub status: i16,
    /// 1-based position in the book's queue; contiguous among active rows.
    pub queue_position: i32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn status(&self) -> ReservationStatus {
        self.status.into()
    }
}
