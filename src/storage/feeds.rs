use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{to_unix, to_unix_millis, DatabaseError, Feed, FeedListing, FeedRow};

const FEED_COLUMNS: &str = "id, name, url, user_id, last_fetched_at, created_at, updated_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed owned by `user_id`. Feed URLs are globally unique.
    pub async fn create_feed(
        &self,
        user_id: i64,
        name: &str,
        url: &str,
    ) -> Result<Feed, DatabaseError> {
        let now = to_unix(Utc::now());
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            r#"
            INSERT INTO feeds (name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING {FEED_COLUMNS}
        "#
        ))
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_feed())
    }

    /// Find a feed by its URL
    pub async fn lookup_feed(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// The feed that has waited longest for a fetch.
    ///
    /// Never-fetched feeds (NULL) sort first; ties go to the lowest id so
    /// selection is deterministic.
    pub async fn next_feed_due(&self) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
            LIMIT 1
        "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Record a fetch attempt. Written before the fetch so a failing feed
    /// still rotates to the back of the queue.
    pub async fn mark_fetch_attempt(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result =
            sqlx::query("UPDATE feeds SET last_fetched_at = ?, updated_at = ? WHERE id = ?")
                .bind(to_unix_millis(at))
                .bind(to_unix(at))
                .bind(feed_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("feed {}", feed_id)));
        }
        Ok(())
    }

    /// All feeds with the name of the user that added them
    pub async fn get_feed_listings(&self) -> Result<Vec<FeedListing>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedListing>(
            r#"
            SELECT f.name, f.url, u.name AS user_name
            FROM feeds f
            JOIN users u ON u.id = f.user_id
            ORDER BY f.name
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
