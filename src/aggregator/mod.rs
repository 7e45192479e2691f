//! The feed ingestion engine.
//!
//! [`FetchScheduler`] drives one feed cycle per tick: pick the most overdue
//! feed, record the attempt, fetch it, resolve each item's publish date and
//! hand the item to [`PostIngestor`]. Errors inside a cycle are logged and
//! the loop moves on; only an invalid interval stops it from starting.

mod ingest;
mod scheduler;

pub use ingest::{build_post, IngestOutcome, PostIngestor};
pub use scheduler::{CycleError, CycleReport, FetchScheduler};

use tokio_util::sync::CancellationToken;

use crate::config::{parse_interval, ConfigError};
use crate::feed::FeedFetcher;
use crate::storage::{FeedStore, PostStore};

/// Run aggregation every `interval` (e.g. `"30s"`, `"1m"`, `"1h30m"`) until
/// `cancel` fires.
///
/// # Errors
///
/// [`ConfigError::InvalidInterval`] if `interval` is not a positive duration.
/// Nothing else is returned: per-cycle failures are logged.
pub async fn run_aggregation<S: FeedStore + PostStore>(
    store: S,
    fetcher: FeedFetcher,
    interval: &str,
    cancel: CancellationToken,
) -> Result<(), ConfigError> {
    let interval = parse_interval(interval)?;
    FetchScheduler::new(store, fetcher, interval)?
        .run(cancel)
        .await;
    Ok(())
}
