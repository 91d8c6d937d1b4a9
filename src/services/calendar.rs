//! Calendar export collaborator

use std::path::Path;

use async_trait::async_trait;

use crate::{
    error::{EngineError, EngineResult},
    models::loan::Loan,
    repository::Repository,
};

/// Calendar export contract consumed by the maintenance orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarExport: Send + Sync {
    /// Write the calendar file, creating parent directories as needed.
    /// Returns false when there was nothing to export.
    async fn save_to_file(&self, path: &Path) -> EngineResult<bool>;
}

/// ICS export of loan due dates
#[derive(Clone)]
pub struct LoanCalendarExport {
    repository: Repository,
}

impl LoanCalendarExport {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    fn build_ics(loans: &[Loan]) -> String {
        let mut out = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//biblio//circulation//EN\r\n");
        for loan in loans {
            let Some(due) = loan.due_date else { continue };
            out.push_str("BEGIN:VEVENT\r\n");
            out.push_str(&format!("UID:loan-{}@biblio\r\n", loan.id));
            out.push_str(&format!("DTSTART:{}\r\n", due.format("%Y%m%dT%H%M%SZ")));
            out.push_str(&format!(
                "SUMMARY:Loan {} due (book {})\r\n",
                loan.id, loan.book_id
            ));
            out.push_str("END:VEVENT\r\n");
        }
        out.push_str("END:VCALENDAR\r\n");
        out
    }
}

#[async_trait]
impl CalendarExport for LoanCalendarExport {
    async fn save_to_file(&self, path: &Path) -> EngineResult<bool> {
        let loans = self.repository.loans.with_due_dates().await?;
        if loans.is_empty() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::Internal(format!("Creating {:?}: {}", parent, e)))?;
        }
        tokio::fs::write(path, Self::build_ics(&loans))
            .await
            .map_err(|e| EngineError::Internal(format!("Writing {:?}: {}", path, e)))?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn loan(id: i64, due: Option<chrono::DateTime<Utc>>) -> Loan {
        Loan {
            id,
            book_id: 7,
            user_id: 1,
            copy_id: None,
            status: 1,
            start_date: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            due_date: due,
            active: true,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn ics_contains_one_event_per_dated_loan() {
        let due = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let loans = vec![loan(1, Some(due)), loan(2, None)];
        let ics = LoanCalendarExport::build_ics(&loans);
        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 1);
        assert!(ics.contains("UID:loan-1@biblio"));
        assert!(ics.contains("DTSTART:20260201T120000Z"));
        assert!(ics.starts_with("BEGIN:VCALENDAR"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
    }
}
