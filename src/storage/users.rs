use chrono::Utc;

use super::schema::Database;
use super::types::{to_unix, DatabaseError, User, UserRow};

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user. Fails with a unique violation if the name is taken.
    pub async fn create_user(&self, name: &str) -> Result<User, DatabaseError> {
        let now = to_unix(Utc::now());
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (name, created_at, updated_at)
            VALUES (?, ?, ?)
            RETURNING id, name, created_at, updated_at
        "#,
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_user())
    }

    /// Look up a user by name
    pub async fn get_user(&self, name: &str) -> Result<User, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, created_at, updated_at FROM users WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_user)
            .ok_or_else(|| DatabaseError::NotFound(format!("user '{}'", name)))
    }

    /// All users ordered by name
    pub async fn get_users(&self) -> Result<Vec<User>, DatabaseError> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, created_at, updated_at FROM users ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserRow::into_user).collect())
    }

    /// Delete every user. Their feeds and posts go with them (ON DELETE CASCADE).
    ///
    /// Returns the number of users removed.
    pub async fn delete_users(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM users")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
