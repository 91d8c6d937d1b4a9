//! Wishlists repository, used by the maintenance notification sweep

use sqlx::{FromRow, Pool, Postgres};

use crate::error::EngineResult;

/// A wishlist entry whose book currently has copies available and whose user
/// has not been told yet.
#[derive(Debug, Clone, FromRow)]
pub struct WishlistHit {
    pub id: i64,
    pub book_id: i64,
    pub book_title: String,
    pub user_email: Option<String>,
}

#[derive(Clone)]
pub struct WishlistsRepository {
    pool: Pool<Postgres>,
}

impl WishlistsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Un-notified wishlist entries for books with available copies
    pub async fn pending_available(&self) -> EngineResult<Vec<WishlistHit>> {
        let hits = sqlx::query_as::<_, WishlistHit>(
            r#"
            SELECT w.id, w.book_id, b.title AS book_title, u.email AS user_email
            FROM wishlists w
            JOIN books b ON b.id = w.book_id
            JOIN users u ON u.id = w.user_id
            WHERE w.notified_at IS NULL AND b.available_copies > 0
            ORDER BY w.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(hits)
    }

    /// Record that the availability notification went out
    pub async fn mark_notified(&self, id: i64) -> EngineResult<()> {
        sqlx::query("UPDATE wishlists SET notified_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
