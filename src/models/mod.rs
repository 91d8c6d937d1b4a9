//! Data models for the circulation engine

pub mod book;
pub mod copy;
pub mod issue;
pub mod loan;
pub mod reservation;

pub use book::{Book, BookStatus};
pub use copy::{Copy, CopyStatus};
pub use issue::{Issue, IssueKind, Severity};
pub use loan::{Loan, LoanState};
pub use reservation::{Reservation, ReservationStatus};
