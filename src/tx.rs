//! Transaction scope guard
//!
//! Every multi-statement mutation in the engine runs inside a [`TxScope`]. A
//! scope is either `Owned` (this routine opened the transaction and is the only
//! one allowed to commit or roll it back) or `Inherited` (a caller owns the
//! transaction; commit and rollback here are no-ops). This makes nested
//! composition safe: a routine invoked from inside a caller's transaction can
//! never end that transaction early.
//!
//! An `Owned` scope that is dropped without an explicit commit rolls back,
//! so no error path can leave a transaction dangling.

use sqlx::{PgConnection, PgPool, Postgres, Transaction};

/// A transaction context that is either owned by the current routine or
/// inherited from a composing caller.
pub enum TxScope<'c> {
    /// Transaction opened here; commit/rollback are real.
    Owned(Transaction<'c, Postgres>),
    /// Transaction opened by a caller; commit/rollback are no-ops.
    Inherited(&'c mut PgConnection),
}

impl<'c> TxScope<'c> {
    /// Open a new transaction owned by this scope.
    pub async fn begin(pool: &PgPool) -> sqlx::Result<TxScope<'static>> {
        Ok(TxScope::Owned(pool.begin().await?))
    }

    /// Wrap a connection belonging to a caller's transaction.
    pub fn inherit(conn: &'c mut PgConnection) -> Self {
        TxScope::Inherited(conn)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, TxScope::Owned(_))
    }

    /// The connection to run statements on.
    pub fn conn(&mut self) -> &mut PgConnection {
        match self {
            TxScope::Owned(tx) => &mut *tx,
            TxScope::Inherited(conn) => conn,
        }
    }

    /// Commit if this scope owns the transaction.
    pub async fn commit(self) -> sqlx::Result<()> {
        match self {
            TxScope::Owned(tx) => tx.commit().await,
            TxScope::Inherited(_) => Ok(()),
        }
    }

    /// Roll back if this scope owns the transaction.
    pub async fn rollback(self) -> sqlx::Result<()> {
        match self {
            TxScope::Owned(tx) => tx.rollback().await,
            TxScope::Inherited(_) => Ok(()),
        }
    }
}
