//! Store contracts consumed by the aggregator.
//!
//! The scheduler and ingestor only see these traits, so tests can swap in a
//! store that fails on demand while production uses [`Database`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, Feed, InsertOutcome, NewPost};

#[async_trait]
pub trait FeedStore: Send + Sync {
    /// The feed with the oldest fetch attempt, never-fetched feeds first.
    async fn next_feed_due(&self) -> Result<Option<Feed>, DatabaseError>;

    /// Stamp the feed with the time of a fetch attempt.
    async fn mark_fetch_attempt(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn lookup_feed(&self, url: &str) -> Result<Option<Feed>, DatabaseError>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a post. A `(feed, url)` conflict is `Ok(InsertOutcome::Duplicate)`.
    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, DatabaseError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn next_feed_due(&self) -> Result<Option<Feed>, DatabaseError> {
        Database::next_feed_due(self).await
    }

    async fn mark_fetch_attempt(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        Database::mark_fetch_attempt(self, feed_id, at).await
    }

    async fn lookup_feed(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        Database::lookup_feed(self, url).await
    }
}

#[async_trait]
impl PostStore for Database {
    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, DatabaseError> {
        Database::insert_post(self, post).await
    }
}
