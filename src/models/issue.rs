//! Structured data-integrity issues reported by the auditor

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// The classes of integrity violation the auditor detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    NegativeAvailableCopies,
    ExcessAvailableCopies,
    OrphanLoan,
    MissingDueDate,
    BookStatusMismatch,
    ReservationLoanOverlap,
    ReservationOverlap,
    ExpiredReservationActive,
    QueuePositionGap,
    StalePendingLoan,
    CanonicalUrlMisconfigured,
}

/// One detected issue. Issues are report entries, never errors: the auditor
/// is read-only and its findings are non-fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
    pub severity: Severity,
}

impl Issue {
    pub fn error(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_serialize_for_machine_readable_reports() {
        let issue = Issue::warning(
            IssueKind::QueuePositionGap,
            "Book 7: queue positions are not a contiguous 1..N",
        );
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("\"QueuePositionGap\""));
        assert!(json.contains("\"Warning\""));
        assert!(json.contains("Book 7"));
    }
}
