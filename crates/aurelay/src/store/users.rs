//! Repository for user records backing the contact list.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::User;

#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a new user.
    pub async fn create(&self, username: &str, avatar_url: Option<&str>) -> Result<User> {
        let user_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (username, avatar_url)
            VALUES (?, ?)
            RETURNING user_id
            "#,
        )
        .bind(username)
        .bind(avatar_url)
        .fetch_one(&self.pool)
        .await
        .context("inserting user")?;

        self.get(user_id)
            .await?
            .context("user vanished after insert")
    }

    /// Get a user by ID.
    pub async fn get(&self, user_id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT user_id, username, avatar_url FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching user")
    }

    /// All users except the caller, for the contact list.
    pub async fn list_contacts(&self, user_id: i64) -> Result<Vec<User>> {
        sqlx::query_as::<_, User>(
            "SELECT user_id, username, avatar_url FROM users WHERE user_id != ? ORDER BY username",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("listing contacts")
    }
}
