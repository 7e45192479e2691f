//! Integration tests for the aggregation loop: select, mark, fetch, ingest.
//!
//! Each test gets its own in-memory SQLite database and wiremock server.
//! Feeds are served over real HTTP so the fetcher, parser, timestamp
//! resolver and store all take part.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gator::aggregator::{run_aggregation, CycleError, FetchScheduler};
use gator::config::ConfigError;
use gator::feed::{FeedFetcher, FetchError};
use gator::storage::{
    Database, DatabaseError, Feed, FeedStore, InsertOutcome, NewPost, PostStore,
};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn fetcher() -> FeedFetcher {
    FeedFetcher::new(reqwest::Client::new(), "gator-test", Duration::from_secs(5))
}

/// Render an RSS document from `(title, link, pubDate)` triples.
fn rss(items: &[(&str, &str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link, pub_date)| {
            format!(
                "<item><title>{}</title><link>{}</link><description>about {}</description><pubDate>{}</pubDate></item>",
                title, link, title, pub_date
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Test</title><link>https://example.com</link><description>Test feed</description>{}</channel></rss>"#,
        items
    )
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn add_feed(db: &Database, name: &str, url: &str) -> i64 {
    let user = match db.get_user("alice").await {
        Ok(user) => user,
        Err(_) => db.create_user("alice").await.unwrap(),
    };
    db.create_feed(user.id, name, url).await.unwrap().id
}

async fn feed_by_url(db: &Database, url: &str) -> Feed {
    db.lookup_feed(url).await.unwrap().unwrap()
}

// ============================================================================
// Single cycle
// ============================================================================

#[tokio::test]
async fn test_cycle_stores_dated_and_undated_items() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed.xml",
        rss(&[
            ("First", "https://example.com/a", "Mon, 02 Jan 2006 15:04:05 -0700"),
            ("Second", "https://example.com/b", ""),
        ]),
    )
    .await;

    let db = test_db().await;
    let url = format!("{}/feed.xml", server.uri());
    let feed_id = add_feed(&db, "Test", &url).await;

    let scheduler = FetchScheduler::new(db.clone(), fetcher(), Duration::from_secs(60)).unwrap();
    let report = scheduler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.feed_id, feed_id);
    assert_eq!(report.created, 2);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.undated, 1);

    let posts = db.get_posts_for_feed(feed_id).await.unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].title.as_deref(), Some("First"));
    assert_eq!(posts[0].url.as_deref(), Some("https://example.com/a"));
    assert_eq!(posts[0].description.as_deref(), Some("about First"));
    assert_eq!(
        posts[0].published_at,
        Some(Utc.with_ymd_and_hms(2006, 1, 2, 22, 4, 5).unwrap())
    );
    assert_eq!(posts[1].title.as_deref(), Some("Second"));
    assert_eq!(posts[1].published_at, None);

    let feed = feed_by_url(&db, &url).await;
    assert!(feed.last_fetched_at.is_some());
}

#[tokio::test]
async fn test_cycle_with_no_feeds_is_a_no_op() {
    let db = test_db().await;
    let scheduler = FetchScheduler::new(db, fetcher(), Duration::from_secs(60)).unwrap();

    let report = scheduler.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report, None);
}

#[tokio::test]
async fn test_refetch_only_adds_new_items() {
    let server = MockServer::start().await;
    let db = test_db().await;
    let url = format!("{}/feed.xml", server.uri());
    let feed_id = add_feed(&db, "Test", &url).await;
    let scheduler = FetchScheduler::new(db.clone(), fetcher(), Duration::from_secs(60)).unwrap();
    let cancel = CancellationToken::new();

    // First fetch: one item
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[(
            "Old",
            "https://example.com/old",
            "Mon, 02 Jan 2006 15:04:05 MST",
        )])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let first = scheduler.run_cycle(&cancel).await.unwrap().unwrap();
    assert_eq!(first.created, 1);

    // Second fetch: the old item again plus a new one
    serve(
        &server,
        "/feed.xml",
        rss(&[
            ("New", "https://example.com/new", "Tue, 03 Jan 2006 10:00:00 +0000"),
            ("Old", "https://example.com/old", "Mon, 02 Jan 2006 15:04:05 MST"),
        ]),
    )
    .await;
    let second = scheduler.run_cycle(&cancel).await.unwrap().unwrap();
    assert_eq!(second.created, 1);
    assert_eq!(second.duplicates, 1);

    assert_eq!(db.count_posts(feed_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_repeated_cycles_are_idempotent() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed.xml",
        rss(&[
            ("A", "https://example.com/a", "2024-03-01T12:00:00Z"),
            ("B", "https://example.com/b", "01 Mar 24 12:00 +0100"),
            ("C", "https://example.com/c", "not a date"),
        ]),
    )
    .await;

    let db = test_db().await;
    let feed_id = add_feed(&db, "Test", &format!("{}/feed.xml", server.uri())).await;
    let scheduler = FetchScheduler::new(db.clone(), fetcher(), Duration::from_secs(60)).unwrap();
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        scheduler.run_cycle(&cancel).await.unwrap();
    }

    assert_eq!(db.count_posts(feed_id).await.unwrap(), 3);
    let posts = db.get_posts_for_feed(feed_id).await.unwrap();
    assert_eq!(
        posts[1].published_at,
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap())
    );
    assert_eq!(posts[2].published_at, None);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_fetch_failure_still_marks_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    serve(
        &server,
        "/ok.xml",
        rss(&[("Post", "https://example.com/p", "")]),
    )
    .await;

    let db = test_db().await;
    let broken_url = format!("{}/broken.xml", server.uri());
    let ok_url = format!("{}/ok.xml", server.uri());
    let broken_id = add_feed(&db, "Broken", &broken_url).await;
    let ok_id = add_feed(&db, "Ok", &ok_url).await;

    let scheduler = FetchScheduler::new(db.clone(), fetcher(), Duration::from_secs(60)).unwrap();
    let cancel = CancellationToken::new();

    let err = scheduler.run_cycle(&cancel).await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Fetch {
            feed_id,
            source: FetchError::HttpStatus(500),
        } if feed_id == broken_id
    ));
    assert!(feed_by_url(&db, &broken_url).await.last_fetched_at.is_some());
    assert_eq!(db.count_posts(broken_id).await.unwrap(), 0);

    // The failing feed moved to the back of the queue
    let report = scheduler.run_cycle(&cancel).await.unwrap().unwrap();
    assert_eq!(report.feed_id, ok_id);
    assert_eq!(db.count_posts(ok_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_cycle_cancelled_mid_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss(&[]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let db = test_db().await;
    let url = format!("{}/slow.xml", server.uri());
    add_feed(&db, "Slow", &url).await;
    let scheduler = FetchScheduler::new(db.clone(), fetcher(), Duration::from_secs(60)).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), scheduler.run_cycle(&cancel))
        .await
        .expect("cancellation should end the cycle promptly");
    assert!(matches!(
        result,
        Err(CycleError::Fetch {
            source: FetchError::Cancelled,
            ..
        })
    ));
    assert!(feed_by_url(&db, &url).await.last_fetched_at.is_some());
}

/// Delegates to a real database but fails the Nth post insert.
struct FlakyStore {
    inner: Database,
    fail_on: usize,
    inserts: AtomicUsize,
}

#[async_trait]
impl FeedStore for FlakyStore {
    async fn next_feed_due(&self) -> Result<Option<Feed>, DatabaseError> {
        self.inner.next_feed_due().await
    }

    async fn mark_fetch_attempt(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.inner.mark_fetch_attempt(feed_id, at).await
    }

    async fn lookup_feed(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        self.inner.lookup_feed(url).await
    }
}

#[async_trait]
impl PostStore for FlakyStore {
    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, DatabaseError> {
        let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(DatabaseError::Other(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert_post(post).await
    }
}

#[tokio::test]
async fn test_persistence_failure_abandons_rest_of_feed() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/one.xml",
        rss(&[
            ("A", "https://example.com/a", ""),
            ("B", "https://example.com/b", ""),
            ("C", "https://example.com/c", ""),
        ]),
    )
    .await;
    serve(
        &server,
        "/two.xml",
        rss(&[("D", "https://example.com/d", "")]),
    )
    .await;

    let db = test_db().await;
    let one = add_feed(&db, "One", &format!("{}/one.xml", server.uri())).await;
    let two = add_feed(&db, "Two", &format!("{}/two.xml", server.uri())).await;

    let store = FlakyStore {
        inner: db.clone(),
        fail_on: 2,
        inserts: AtomicUsize::new(0),
    };
    let scheduler = FetchScheduler::new(store, fetcher(), Duration::from_secs(60)).unwrap();
    let cancel = CancellationToken::new();

    let err = scheduler.run_cycle(&cancel).await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Persistence { feed_id, created: 1, .. } if feed_id == one
    ));
    // A was stored, B failed, C was never attempted
    let titles: Vec<_> = db
        .get_posts_for_feed(one)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|p| p.title)
        .collect();
    assert_eq!(titles, vec!["A".to_string()]);

    // The next cycle carries on with the other feed
    let report = scheduler.run_cycle(&cancel).await.unwrap().unwrap();
    assert_eq!(report.feed_id, two);
    assert_eq!(report.created, 1);
}

// ============================================================================
// Run loop
// ============================================================================

#[tokio::test]
async fn test_run_visits_every_feed_and_stops_on_cancel() {
    let server = MockServer::start().await;
    for (route, link) in [
        ("/a.xml", "https://example.com/a"),
        ("/b.xml", "https://example.com/b"),
        ("/c.xml", "https://example.com/c"),
    ] {
        serve(&server, route, rss(&[("Post", link, "")])).await;
    }

    let db = test_db().await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        ids.push(add_feed(&db, name, &format!("{}/{}.xml", server.uri(), name)).await);
    }

    let scheduler =
        Arc::new(FetchScheduler::new(db.clone(), fetcher(), Duration::from_millis(20)).unwrap());
    let cancel = CancellationToken::new();
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    let all_fetched = async {
        loop {
            let mut done = true;
            for id in &ids {
                if db.count_posts(*id).await.unwrap() == 0 {
                    done = false;
                }
            }
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), all_fetched)
        .await
        .expect("every feed should be fetched");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run should return after cancel")
        .unwrap();
}

/// Records when each cycle starts; the first cycle takes `first_cycle`.
struct SlowFirstCycleStore {
    origin: tokio::time::Instant,
    first_cycle: Duration,
    starts: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl FeedStore for SlowFirstCycleStore {
    async fn next_feed_due(&self) -> Result<Option<Feed>, DatabaseError> {
        let first = {
            let mut starts = self.starts.lock().unwrap();
            starts.push(self.origin.elapsed());
            starts.len() == 1
        };
        if first {
            tokio::time::sleep(self.first_cycle).await;
        }
        Ok(None)
    }

    async fn mark_fetch_attempt(
        &self,
        _feed_id: i64,
        _at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn lookup_feed(&self, _url: &str) -> Result<Option<Feed>, DatabaseError> {
        Ok(None)
    }
}

#[async_trait]
impl PostStore for SlowFirstCycleStore {
    async fn insert_post(&self, _post: &NewPost) -> Result<InsertOutcome, DatabaseError> {
        Ok(InsertOutcome::Duplicate)
    }
}

#[tokio::test(start_paused = true)]
async fn test_overrun_cycle_gets_one_catch_up_tick() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let store = SlowFirstCycleStore {
        origin: tokio::time::Instant::now(),
        first_cycle: Duration::from_millis(350),
        starts: Arc::clone(&starts),
    };
    let scheduler =
        FetchScheduler::new(store, FeedFetcher::default(), Duration::from_millis(100)).unwrap();

    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(950)).await;
    cancel.cancel();
    handle.await.unwrap();

    // The ticks missed at 100, 200 and 300ms collapse into one immediate
    // tick at 350ms, then the schedule resumes on the 100ms grid.
    let starts: Vec<u128> = starts.lock().unwrap().iter().map(|d| d.as_millis()).collect();
    assert_eq!(starts, vec![0, 350, 400, 500, 600, 700, 800, 900]);
}

#[tokio::test]
async fn test_run_aggregation_rejects_bad_interval() {
    for interval in ["", "soon", "0s", "-5m", "10"] {
        let db = test_db().await;
        let result = run_aggregation(db, fetcher(), interval, CancellationToken::new()).await;
        assert!(
            matches!(result, Err(ConfigError::InvalidInterval { .. })),
            "expected {:?} to be rejected",
            interval
        );
    }
}

#[tokio::test]
async fn test_run_aggregation_returns_when_already_cancelled() {
    let db = test_db().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        run_aggregation(db, fetcher(), "1h", cancel),
    )
    .await
    .expect("cancelled aggregation should return");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let result = FetchScheduler::new(test_db().await, fetcher(), Duration::ZERO);
    assert!(matches!(result, Err(ConfigError::InvalidInterval { .. })));
}
