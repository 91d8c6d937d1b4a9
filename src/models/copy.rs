//! Physical copy model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Copy status. `Reserved` means the copy is held for a bound queue-entry
/// loan that has not started yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum CopyStatus {
    Available = 0,
    Loaned = 1,
    Reserved = 2,
    Lost = 3,
}

impl From<i16> for CopyStatus {
    fn from(v: i16) -> Self {
        match v {
            0 => CopyStatus::Available,
            1 => CopyStatus::Loaned,
            2 => CopyStatus::Reserved,
            _ => CopyStatus::Lost,
        }
    }
}

/// Copy model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Copy {
    pub id: i64,
    pub book_id: i64,
    pub status: i16,
    pub created_at: DateTime<Utc>,
}

impl Copy {
    pub fn status(&self) -> CopyStatus {
        self.status.into()
    }

    pub fn is_available(&self) -> bool {
        self.status() == CopyStatus::Available
    }
}
