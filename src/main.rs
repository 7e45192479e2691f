use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use gator::aggregator::run_aggregation;
use gator::config::Config;
use gator::feed::FeedFetcher;
use gator::storage::{Database, User};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Get the config directory path (~/.config/gator/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("gator"))
}

#[derive(Parser, Debug)]
#[command(name = "gator", about = "Command-line RSS aggregator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and make it the current user
    Register { name: String },
    /// Switch to an existing user
    Login { name: String },
    /// Delete all users, along with their feeds and posts
    Reset,
    /// List users
    Users,
    /// Add a feed owned by the current user
    Addfeed { name: String, url: String },
    /// List all feeds
    Feeds,
    /// Fetch feeds forever, one per interval (e.g. 30s, 1m, 1h)
    Agg { interval: String },
    /// Show the newest posts from your feeds
    Browse {
        #[arg(default_value_t = 2)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gator=info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }
    let config_path = config_dir.join("config.toml");
    let mut config = Config::load(&config_path).context("Failed to load config")?;

    let db_path = config.database_path(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = Database::open(db_path_str)
        .await
        .context("Failed to open database")?;

    match args.command {
        Command::Register { name } => {
            let user = db
                .create_user(&name)
                .await
                .with_context(|| format!("Failed to register '{}'", name))?;
            config.set_current_user(&config_path, &user.name)?;
            println!("User created: {}", user.name);
        }
        Command::Login { name } => {
            let user = db
                .get_user(&name)
                .await
                .with_context(|| format!("Couldn't find user '{}'", name))?;
            config.set_current_user(&config_path, &user.name)?;
            println!("Logged in as {}", user.name);
        }
        Command::Reset => {
            let removed = db.delete_users().await.context("Failed to reset users")?;
            if config.current_user_name.is_some() {
                config.clear_current_user(&config_path)?;
            }
            println!("Removed {} users", removed);
        }
        Command::Users => {
            for user in db.get_users().await? {
                if config.current_user_name.as_deref() == Some(user.name.as_str()) {
                    println!("* {} (current)", user.name);
                } else {
                    println!("* {}", user.name);
                }
            }
        }
        Command::Addfeed { name, url } => {
            let user = current_user(&db, &config).await?;
            add_feed(&db, &user, &name, &url).await?;
        }
        Command::Feeds => {
            for feed in db.get_feed_listings().await? {
                println!("{}\n  {}\n  added by {}", feed.name, feed.url, feed.user_name);
            }
        }
        Command::Agg { interval } => {
            let fetcher = FeedFetcher::new(
                reqwest::Client::new(),
                &config.user_agent,
                config.fetch_timeout(),
            );
            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone())?;

            println!("Collecting feeds every {}", interval);
            run_aggregation(db, fetcher, &interval, cancel).await?;
        }
        Command::Browse { limit } => {
            let user = current_user(&db, &config).await?;
            browse(&db, &user, limit).await?;
        }
    }

    Ok(())
}

async fn current_user(db: &Database, config: &Config) -> Result<User> {
    let name = config
        .current_user_name
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("No current user. Run `gator register <name>` first"))?;
    db.get_user(name)
        .await
        .with_context(|| format!("Current user '{}' no longer exists", name))
}

async fn add_feed(db: &Database, user: &User, name: &str, url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("Invalid feed URL: {}", url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("Unsupported scheme: {} (only http/https allowed)", parsed.scheme());
    }

    if let Some(existing) = db.lookup_feed(url).await? {
        anyhow::bail!("Feed already added as '{}'", existing.name);
    }

    let feed = db.create_feed(user.id, name, url).await?;
    println!("Feed added: {} ({})", feed.name, feed.url);
    Ok(())
}

async fn browse(db: &Database, user: &User, limit: i64) -> Result<()> {
    let posts = db.get_posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        println!("No posts yet. Run `gator agg 1m` to collect some.");
        return Ok(());
    }

    for post in posts {
        match post.published_at {
            Some(published) => println!("{}", published.to_rfc2822()),
            None => println!("(no publish date)"),
        }
        println!("{}", post.title.as_deref().unwrap_or("Untitled"));
        if let Some(url) = &post.url {
            println!("{}", url);
        }
        if let Some(description) = &post.description {
            println!("{}", description);
        }
        println!();
    }
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM so the scheduler can stop between ticks.
fn spawn_shutdown_listener(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm_fut => {}
        }
        tracing::info!("Shutdown requested");
        token.cancel();
    });
    Ok(())
}
