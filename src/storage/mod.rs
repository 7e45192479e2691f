mod feeds;
mod posts;
mod schema;
mod store;
mod types;
mod users;

pub use schema::Database;
pub use store::{FeedStore, PostStore};
pub use types::{DatabaseError, Feed, FeedListing, InsertOutcome, NewPost, Post, User};
