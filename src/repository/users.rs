//! Users repository, limited to what the engine needs

use sqlx::{Pool, Postgres};

use crate::error::EngineResult;

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Email address for a user, if the user exists and has one
    pub async fn email_of(&self, user_id: i64) -> EngineResult<Option<String>> {
        let email = sqlx::query_scalar::<_, Option<String>>(
            "SELECT email FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(email.flatten())
    }
}
