use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::ingest::{IngestOutcome, PostIngestor};
use crate::config::ConfigError;
use crate::feed::{timestamp, FeedFetcher, FetchError};
use crate::storage::{DatabaseError, FeedStore, PostStore};

/// Summary of one completed feed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub feed_id: i64,
    pub feed_name: String,
    /// New posts stored
    pub created: usize,
    /// Items skipped because their URL was already stored
    pub duplicates: usize,
    /// Items stored without a publish date
    pub undated: usize,
}

/// Why a feed cycle ended early. None of these stop the scheduler.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Failed to select the next feed: {0}")]
    Select(#[source] DatabaseError),

    #[error("Failed to record fetch attempt for feed {feed_id}: {source}")]
    MarkAttempt {
        feed_id: i64,
        source: DatabaseError,
    },

    #[error("Fetching feed {feed_id} failed: {source}")]
    Fetch { feed_id: i64, source: FetchError },

    #[error("Storing posts for feed {feed_id} failed after {created} new posts: {source}")]
    Persistence {
        feed_id: i64,
        created: usize,
        source: DatabaseError,
    },
}

/// Fetches one feed per tick, least recently attempted first.
///
/// The loop alternates between waiting for the next tick and running a
/// single feed cycle. A slow cycle delays the next tick instead of queueing
/// extra ones.
pub struct FetchScheduler<S> {
    store: S,
    fetcher: FeedFetcher,
    interval: Duration,
}

impl<S: FeedStore + PostStore> FetchScheduler<S> {
    pub fn new(store: S, fetcher: FeedFetcher, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval {
                input: format!("{:?}", interval),
                reason: "interval must be positive".to_string(),
            });
        }
        Ok(Self {
            store,
            fetcher,
            interval,
        })
    }

    /// Run until `cancel` fires. The first cycle starts immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Collecting feeds");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle(&cancel).await {
                Ok(Some(report)) => {
                    tracing::info!(
                        feed_id = report.feed_id,
                        feed = %report.feed_name,
                        created = report.created,
                        duplicates = report.duplicates,
                        undated = report.undated,
                        "Feed cycle complete"
                    );
                }
                Ok(None) => tracing::debug!("No feeds to fetch"),
                Err(CycleError::Fetch {
                    source: FetchError::Cancelled,
                    ..
                }) => tracing::debug!("Feed cycle interrupted by shutdown"),
                Err(e) => tracing::warn!(error = %e, "Feed cycle failed"),
            }
        }

        tracing::info!("Feed aggregation stopped");
    }

    /// Fetch and ingest the feed that is most overdue.
    ///
    /// The fetch attempt is recorded before the request goes out, so a feed
    /// that keeps failing still moves to the back of the queue. Returns
    /// `Ok(None)` when there are no feeds.
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<CycleReport>, CycleError> {
        let Some(feed) = self
            .store
            .next_feed_due()
            .await
            .map_err(CycleError::Select)?
        else {
            return Ok(None);
        };

        self.store
            .mark_fetch_attempt(feed.id, Utc::now())
            .await
            .map_err(|source| CycleError::MarkAttempt {
                feed_id: feed.id,
                source,
            })?;

        tracing::debug!(feed_id = feed.id, url = %feed.url, "Fetching feed");
        let document = self
            .fetcher
            .fetch(&feed.url, cancel)
            .await
            .map_err(|source| CycleError::Fetch {
                feed_id: feed.id,
                source,
            })?;

        let ingestor = PostIngestor::new(&self.store);
        let mut report = CycleReport {
            feed_id: feed.id,
            feed_name: feed.name.clone(),
            ..Default::default()
        };

        for item in &document.items {
            let published_at = match timestamp::resolve_with_layout(&item.pub_date) {
                Some((instant, layout)) => {
                    tracing::trace!(raw = %item.pub_date, layout = layout.name(), "Resolved publish date");
                    Some(instant.with_timezone(&Utc))
                }
                None => {
                    if !item.pub_date.trim().is_empty() {
                        tracing::debug!(
                            feed_id = feed.id,
                            raw = %item.pub_date,
                            "Unrecognized publish date, storing post without one"
                        );
                    }
                    report.undated += 1;
                    None
                }
            };

            match ingestor.ingest(feed.id, item, published_at).await {
                Ok(IngestOutcome::Created(_)) => report.created += 1,
                Ok(IngestOutcome::Duplicate) => report.duplicates += 1,
                Err(source) => {
                    return Err(CycleError::Persistence {
                        feed_id: feed.id,
                        created: report.created,
                        source,
                    })
                }
            }
        }

        Ok(Some(report))
    }
}
