//! Book model and derived status

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Derived book status, kept in sync with `available_copies` by the
/// recalculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum BookStatus {
    Available = 0,
    Loaned = 1,
}

impl From<i16> for BookStatus {
    fn from(v: i16) -> Self {
        match v {
            0 => BookStatus::Available,
            _ => BookStatus::Loaned,
        }
    }
}

/// Book model from database.
///
/// `available_copies` and `status` are cached, derived values; they are
/// authoritative only immediately after a recalculator run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub total_copies: i32,
    pub available_copies: i32,
    pub status: i16,
}

impl Book {
    pub fn status(&self) -> BookStatus {
        self.status.into()
    }
}
