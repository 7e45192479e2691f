use chrono::{DateTime, Utc};

use crate::feed::FeedItem;
use crate::storage::{DatabaseError, InsertOutcome, NewPost, PostStore};

/// Result of ingesting one feed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new post was stored with this id
    Created(i64),
    /// A post with the same URL already exists for this feed; nothing changed
    Duplicate,
}

/// Turns feed items into stored posts.
pub struct PostIngestor<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: PostStore + ?Sized> PostIngestor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Store `item` as a post of `feed_id`.
    ///
    /// A duplicate URL is `Ok(IngestOutcome::Duplicate)`. Any other store
    /// failure is returned and should end the current feed cycle.
    pub async fn ingest(
        &self,
        feed_id: i64,
        item: &FeedItem,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<IngestOutcome, DatabaseError> {
        let post = build_post(feed_id, item, published_at);
        match self.store.insert_post(&post).await? {
            InsertOutcome::Inserted(id) => Ok(IngestOutcome::Created(id)),
            InsertOutcome::Duplicate => Ok(IngestOutcome::Duplicate),
        }
    }
}

/// Map a feed item to a post row. Blank text becomes an absent field.
pub fn build_post(feed_id: i64, item: &FeedItem, published_at: Option<DateTime<Utc>>) -> NewPost {
    NewPost {
        feed_id,
        title: non_blank(&item.title),
        url: non_blank(&item.link),
        description: non_blank(&item.description),
        published_at,
    }
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
