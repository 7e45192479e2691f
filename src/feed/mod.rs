//! Feed retrieval and decoding.
//!
//! - [`fetcher`] - one HTTP GET per feed, bounded by a timeout and a cancellation token
//! - [`parser`] - RSS 2.0 decoding into a [`FeedDocument`]
//! - [`timestamp`] - publish-date resolution across the common RSS date layouts
//!
//! # Example
//!
//! ```ignore
//! use gator::feed::{timestamp, FeedFetcher};
//!
//! let doc = FeedFetcher::default().fetch(url, &cancel).await?;
//! for item in &doc.items {
//!     let published = timestamp::resolve(&item.pub_date);
//! }
//! ```

mod fetcher;
mod parser;
pub mod timestamp;

pub use fetcher::{FeedFetcher, FetchError, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
pub use parser::{parse_rss, FeedDocument, FeedItem};
