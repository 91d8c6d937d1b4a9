//! Copy/loan availability recalculator
//!
//! Recomputes, from ground truth, each copy's occupancy state and each book's
//! cached `available_copies` counter and derived status. The cached values
//! drift whenever a write path fails mid-way or a collaborator mutates rows
//! outside the engine; recalculation is the repair.
//!
//! An active reservation whose requested window covers the current instant
//! consumes an availability slot before any loan row exists for it (a soft
//! hold), so the published count never promises a copy that is already
//! promised to someone else.

use chrono::Utc;

use crate::{
    error::EngineResult,
    models::book::BookStatus,
    repository::Repository,
    tx::TxScope,
};

/// Outcome of a whole-catalog recalculation
#[derive(Debug, Default)]
pub struct RecalcReport {
    pub updated: u64,
    pub errors: Vec<String>,
}

/// Outcome of a batched recalculation
#[derive(Debug, Default)]
pub struct BatchedRecalcReport {
    pub updated: u64,
    pub errors: Vec<String>,
    pub total: u64,
}

#[derive(Clone)]
pub struct Recalculator {
    repository: Repository,
}

impl Recalculator {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Recalculate one book inside its own transaction. Returns true when
    /// anything changed.
    pub async fn recalculate_book(&self, book_id: i64) -> EngineResult<bool> {
        let mut scope = TxScope::begin(&self.repository.pool).await?;
        let changed = self.recalculate_book_scoped(&mut scope, book_id).await?;
        scope.commit().await?;
        Ok(changed)
    }

    /// Recalculate one book on the caller's transaction scope. Composable:
    /// an inherited scope is never committed or rolled back here.
    pub async fn recalculate_book_scoped(
        &self,
        scope: &mut TxScope<'_>,
        book_id: i64,
    ) -> EngineResult<bool> {
        let copies_changed = self
            .repository
            .copies
            .refresh_statuses_for_book(scope.conn(), book_id)
            .await?;

        let total = self
            .repository
            .books
            .count_copies(scope.conn(), book_id)
            .await?;
        let free = self
            .repository
            .books
            .count_available_copies(scope.conn(), book_id)
            .await?;
        let holds = self
            .repository
            .reservations
            .soft_holds_at(scope.conn(), book_id, Utc::now())
            .await?;

        let available = clamped_available(free, holds);
        let status = if available > 0 {
            BookStatus::Available
        } else {
            BookStatus::Loaned
        };

        let book_changed = self
            .repository
            .books
            .update_derived(
                scope.conn(),
                book_id,
                total as i32,
                available as i32,
                status as i16,
            )
            .await?;

        Ok(copies_changed > 0 || book_changed)
    }

    /// Recalculate every book in a single pass and a single transaction.
    /// Holds locks catalog-wide; fine for small catalogs, use the batched
    /// variant otherwise.
    pub async fn recalculate_all(&self) -> EngineResult<RecalcReport> {
        let ids = self.repository.books.all_ids().await?;
        let mut report = RecalcReport::default();

        let mut scope = TxScope::begin(&self.repository.pool).await?;
        for id in ids {
            match self.recalculate_book_scoped(&mut scope, id).await {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(e) => report.errors.push(format!("book {}: {}", id, e)),
            }
        }
        if let Err(e) = scope.commit().await {
            report.errors.push(format!("commit: {}", e));
        }

        Ok(report)
    }

    /// Recalculate every book with bounded, independent transactions.
    ///
    /// Copy statuses are refreshed in one pass first, then books are walked
    /// with keyset pagination so no transaction spans more than one book.
    /// The two passes are not a point-in-time snapshot of each other; any
    /// skew self-corrects on the next run. `on_progress` is invoked after
    /// each chunk with (processed, total).
    pub async fn recalculate_all_batched(
        &self,
        chunk_size: i64,
        mut on_progress: Option<&mut (dyn FnMut(u64, u64) + Send)>,
    ) -> EngineResult<BatchedRecalcReport> {
        let mut report = BatchedRecalcReport {
            total: self.repository.books.count().await? as u64,
            ..Default::default()
        };

        self.repository.copies.refresh_statuses_all().await?;

        let mut last_id = 0_i64;
        let mut processed = 0_u64;
        loop {
            let ids = self.repository.books.ids_after(last_id, chunk_size).await?;
            let Some(&chunk_last) = ids.last() else { break };

            for id in &ids {
                match self.recalculate_book(*id).await {
                    Ok(true) => report.updated += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(book_id = id, error = %e, "batched recalculation failed for book");
                        report.errors.push(format!("book {}: {}", id, e));
                    }
                }
            }

            processed += ids.len() as u64;
            last_id = chunk_last;
            if let Some(cb) = on_progress.as_mut() {
                cb(processed, report.total);
            }
        }

        Ok(report)
    }
}

/// Available count after soft holds, floored at zero.
fn clamped_available(free: i64, holds: i64) -> i64 {
    (free - holds).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_count_never_goes_negative() {
        assert_eq!(clamped_available(3, 1), 2);
        assert_eq!(clamped_available(1, 1), 0);
        assert_eq!(clamped_available(0, 5), 0);
        assert_eq!(clamped_available(2, 7), 0);
    }
}
