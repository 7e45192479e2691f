//! gator: a command-line RSS aggregator.
//!
//! The interesting part is [`aggregator`], which periodically fetches the
//! most overdue feed, decodes it with [`feed`] and stores new posts through
//! the [`storage`] traits.

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod storage;
