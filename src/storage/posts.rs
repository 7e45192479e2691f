use chrono::Utc;

use super::schema::Database;
use super::types::{to_unix, DatabaseError, InsertOutcome, NewPost, Post, PostRow};

/// Maximum number of posts to return from any single query (OOM protection)
const MAX_POSTS: i64 = 2000;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert a post, absorbing `(feed_id, url)` conflicts.
    ///
    /// A conflict yields [`InsertOutcome::Duplicate`] and leaves the existing
    /// row untouched. Every other failure is returned as an error.
    pub async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, DatabaseError> {
        let now = to_unix(Utc::now());
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO posts (feed_id, title, url, description, published_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(post.published_at.map(to_unix))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(id) => Ok(InsertOutcome::Inserted(id)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tracing::trace!(
                    feed_id = post.feed_id,
                    url = ?post.url,
                    "Post already stored, skipping"
                );
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Posts of one feed in insertion order
    pub async fn get_posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>, DatabaseError> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, feed_id, title, url, description, published_at, created_at, updated_at
            FROM posts
            WHERE feed_id = ?
            ORDER BY id
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_POSTS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// Newest posts across every feed added by `user_id`.
    ///
    /// Posts without a publish date sort last.
    pub async fn get_posts_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Post>, DatabaseError> {
        let limit = limit.clamp(0, MAX_POSTS);
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT p.id, p.feed_id, p.title, p.url, p.description, p.published_at,
                   p.created_at, p.updated_at
            FROM posts p
            JOIN feeds f ON f.id = p.feed_id
            WHERE f.user_id = ?
            ORDER BY p.published_at DESC NULLS LAST, p.id DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// Number of posts stored for a feed
    pub async fn count_posts(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
