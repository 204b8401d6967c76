use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing::error;

use crate::aggregator::{parse_duration, Aggregator, OverlapPolicy};
use crate::config::Session;
use crate::db::{Database, PostView, User, DEFAULT_BROWSE_LIMIT};
use crate::error::{Error, Result};
use crate::fetcher::FeedFetcher;

/// A command-line RSS feed aggregator
#[derive(Debug, Parser)]
#[command(name = "gator", version)]
pub struct Cli {
    /// Config file to use instead of ~/.gatorconfig.json
    #[arg(long, global = true, env = "GATOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// Delete all users, feeds, follows and posts
    Reset,
    /// List registered users
    Users,
    /// Fetch feeds continuously, one feed per interval (e.g. 30s, 5m, 1h)
    Agg { interval: String },
    /// List all feeds
    Feeds,
    #[command(flatten)]
    User(UserCommand),
}

/// Commands that act on behalf of the logged-in user.
#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Add a feed and follow it
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },
    /// Follow an existing feed by URL
    Follow { url: String },
    /// Stop following a feed by URL
    Unfollow { url: String },
    /// List followed feeds
    Following,
    /// Show the latest posts from followed feeds
    Browse { limit: Option<u32> },
}

pub async fn execute<W: Write>(
    command: Command,
    session: &mut Session,
    db: Arc<Database>,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Register { name } => register(&name, session, &db, out).await,
        Command::Login { name } => login(&name, session, &db, out).await,
        Command::Reset => reset(&db, out).await,
        Command::Users => users(session, &db, out).await,
        Command::Agg { interval } => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for interrupt signal: {}", e);
                }
            };
            aggregate(&interval, db, out, shutdown).await
        }
        Command::Feeds => feeds(&db, out).await,
        Command::User(command) => {
            let user = session.current_user(&db).await?;
            execute_for_user(command, &user, &db, out).await
        }
    }
}

pub async fn execute_for_user<W: Write>(
    command: UserCommand,
    user: &User,
    db: &Database,
    out: &mut W,
) -> Result<()> {
    match command {
        UserCommand::AddFeed { name, url } => add_feed(&name, &url, user, db, out).await,
        UserCommand::Follow { url } => follow(&url, user, db, out).await,
        UserCommand::Unfollow { url } => unfollow(&url, user, db, out).await,
        UserCommand::Following => following(user, db, out).await,
        UserCommand::Browse { limit } => {
            let limit = limit.map(i64::from).unwrap_or(DEFAULT_BROWSE_LIMIT);
            browse(limit, user, db, out).await
        }
    }
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", what)));
    }
    Ok(())
}

async fn register<W: Write>(
    name: &str,
    session: &mut Session,
    db: &Database,
    out: &mut W,
) -> Result<()> {
    require(name, "a username")?;
    let user = db.create_user(name).await?;
    session.set_user(&user.name)?;
    writeln!(out, "User {} was created and logged in", user.name)?;
    Ok(())
}

async fn login<W: Write>(
    name: &str,
    session: &mut Session,
    db: &Database,
    out: &mut W,
) -> Result<()> {
    require(name, "a username")?;
    let user = db
        .get_user_by_name(name)
        .await?
        .ok_or_else(|| Error::UserNotFound(name.to_string()))?;
    session.set_user(&user.name)?;
    writeln!(out, "User has been set to: {}", user.name)?;
    Ok(())
}

async fn reset<W: Write>(db: &Database, out: &mut W) -> Result<()> {
    db.reset().await?;
    writeln!(out, "Database reset successfully!")?;
    Ok(())
}

async fn users<W: Write>(session: &Session, db: &Database, out: &mut W) -> Result<()> {
    let current = session.current_user_name();
    for user in db.list_users().await? {
        if Some(user.name.as_str()) == current {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

async fn aggregate<W, F>(interval: &str, db: Arc<Database>, out: &mut W, shutdown: F) -> Result<()>
where
    W: Write,
    F: std::future::Future<Output = ()>,
{
    let period = parse_duration(interval)?;
    writeln!(out, "Collecting feeds every {}...", interval)?;
    out.flush()?;

    let aggregator = Arc::new(Aggregator::new(db, FeedFetcher::new()?, OverlapPolicy::Skip));
    aggregator.run(period, shutdown).await?;

    writeln!(out, "Feed aggregator stopped")?;
    Ok(())
}

async fn feeds<W: Write>(db: &Database, out: &mut W) -> Result<()> {
    let feeds = db.list_feeds().await?;
    if feeds.is_empty() {
        writeln!(out, "No feeds found.")?;
    }
    for feed in feeds {
        writeln!(
            out,
            "* {} ({}) - By: {}",
            feed.feed_name, feed.feed_url, feed.user_name
        )?;
    }
    Ok(())
}

async fn add_feed<W: Write>(
    name: &str,
    url: &str,
    user: &User,
    db: &Database,
    out: &mut W,
) -> Result<()> {
    require(name, "a feed name")?;
    require(url, "a feed URL")?;

    let feed = db.create_feed(name, url, user.id).await?;
    writeln!(out, "Feed created successfully:")?;
    writeln!(out, "* Name: {} | URL: {}", feed.name, feed.url)?;

    let follow = db.create_feed_follow(user.id, feed.id).await?;
    writeln!(out, "Feed followed: {} by {}", follow.feed_name, follow.user_name)?;
    Ok(())
}

async fn follow<W: Write>(url: &str, user: &User, db: &Database, out: &mut W) -> Result<()> {
    let feed = db
        .get_feed_by_url(url)
        .await?
        .ok_or_else(|| Error::FeedNotFound(url.to_string()))?;
    let follow = db.create_feed_follow(user.id, feed.id).await?;
    writeln!(
        out,
        "User {} is now following {}",
        follow.user_name, follow.feed_name
    )?;
    Ok(())
}

async fn unfollow<W: Write>(url: &str, user: &User, db: &Database, out: &mut W) -> Result<()> {
    if db.delete_feed_follow(user.id, url).await? {
        writeln!(out, "Successfully unfollowed: {}", url)?;
    } else {
        writeln!(out, "You were not following: {}", url)?;
    }
    Ok(())
}

async fn following<W: Write>(user: &User, db: &Database, out: &mut W) -> Result<()> {
    let follows = db.feed_follows_for_user(user.id).await?;
    writeln!(out, "User {} follows:", user.name)?;
    for follow in follows {
        writeln!(out, "* {}", follow.feed_name)?;
    }
    Ok(())
}

async fn browse<W: Write>(limit: i64, user: &User, db: &Database, out: &mut W) -> Result<()> {
    let posts = db.posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        writeln!(
            out,
            "No posts found. Try adding/following more feeds and running 'agg'."
        )?;
        return Ok(());
    }

    writeln!(out, "--- Showing latest {} posts ---", posts.len())?;
    for post in &posts {
        write_post(post, out)?;
    }
    Ok(())
}

fn write_post<W: Write>(post: &PostView, out: &mut W) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "[{}] {}", post.feed_name, post.title)?;
    writeln!(out, "Link: {}", post.url)?;
    writeln!(out, "Published: {}", format_published(post.published_at.as_deref()))?;
    if let Some(description) = &post.description {
        writeln!(out, "{}", description)?;
    }
    writeln!(out, "{}", "-".repeat(20))
}

fn format_published(raw: Option<&str>) -> String {
    match raw {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|_| raw.to_string()),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_db;
    use tempfile::NamedTempFile;

    struct Harness {
        session: Session,
        db: Arc<Database>,
        _config: NamedTempFile,
    }

    impl Harness {
        async fn new() -> Self {
            let config = NamedTempFile::new().unwrap();
            std::fs::write(config.path(), r#"{"db_url": "sqlite::memory:"}"#).unwrap();
            Self {
                session: Session::open(config.path()).unwrap(),
                db: Arc::new(create_test_db().await),
                _config: config,
            }
        }

        async fn run(&mut self, command: Command) -> Result<String> {
            let mut out = Vec::new();
            execute(command, &mut self.session, self.db.clone(), &mut out).await?;
            Ok(String::from_utf8(out).unwrap())
        }

        async fn run_as_user(&mut self, command: UserCommand) -> Result<String> {
            self.run(Command::User(command)).await
        }
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_parse_user_command() {
            let cli = Cli::try_parse_from(["gator", "addfeed", "Blog", "https://example.com/rss"])
                .unwrap();
            match cli.command {
                Command::User(UserCommand::AddFeed { name, url }) => {
                    assert_eq!(name, "Blog");
                    assert_eq!(url, "https://example.com/rss");
                }
                other => panic!("unexpected command {:?}", other),
            }
        }

        #[test]
        fn test_parse_browse_limit() {
            let cli = Cli::try_parse_from(["gator", "browse", "5"]).unwrap();
            assert!(matches!(
                cli.command,
                Command::User(UserCommand::Browse { limit: Some(5) })
            ));

            let cli = Cli::try_parse_from(["gator", "browse"]).unwrap();
            assert!(matches!(
                cli.command,
                Command::User(UserCommand::Browse { limit: None })
            ));
        }

        #[test]
        fn test_parse_global_config_flag() {
            let cli =
                Cli::try_parse_from(["gator", "users", "--config", "/tmp/gator.json"]).unwrap();
            assert_eq!(cli.config, Some(PathBuf::from("/tmp/gator.json")));
        }

        #[test]
        fn test_unknown_command_and_missing_args_fail() {
            assert!(Cli::try_parse_from(["gator", "frobnicate"]).is_err());
            assert!(Cli::try_parse_from(["gator", "register"]).is_err());
            assert!(Cli::try_parse_from(["gator", "browse", "many"]).is_err());
            assert!(Cli::try_parse_from(["gator"]).is_err());
        }
    }

    mod session_tests {
        use super::*;

        #[tokio::test]
        async fn test_register_logs_in() {
            let mut h = Harness::new().await;
            let output = h
                .run(Command::Register {
                    name: "alice".to_string(),
                })
                .await
                .unwrap();
            assert!(output.contains("alice"));
            assert_eq!(h.session.current_user_name(), Some("alice"));
        }

        #[tokio::test]
        async fn test_register_twice_fails() {
            let mut h = Harness::new().await;
            let register = || Command::Register {
                name: "alice".to_string(),
            };
            h.run(register()).await.unwrap();
            assert!(matches!(h.run(register()).await, Err(Error::Validation(_))));
        }

        #[tokio::test]
        async fn test_login_unknown_user_fails() {
            let mut h = Harness::new().await;
            let result = h
                .run(Command::Login {
                    name: "ghost".to_string(),
                })
                .await;
            assert!(matches!(result, Err(Error::UserNotFound(_))));
            assert_eq!(h.session.current_user_name(), None);
        }

        #[tokio::test]
        async fn test_users_marks_current() {
            let mut h = Harness::new().await;
            h.db.create_user("bob").await.unwrap();
            h.run(Command::Register {
                name: "alice".to_string(),
            })
            .await
            .unwrap();

            let output = h.run(Command::Users).await.unwrap();
            assert_eq!(output, "* alice (current)\n* bob\n");
        }

        #[tokio::test]
        async fn test_user_commands_require_login() {
            let mut h = Harness::new().await;
            let result = h.run_as_user(UserCommand::Following).await;
            assert!(matches!(result, Err(Error::Auth(_))));
        }

        #[tokio::test]
        async fn test_user_commands_fail_after_reset() {
            let mut h = Harness::new().await;
            h.run(Command::Register {
                name: "alice".to_string(),
            })
            .await
            .unwrap();
            h.run(Command::Reset).await.unwrap();

            let result = h.run_as_user(UserCommand::Following).await;
            assert!(matches!(result, Err(Error::Auth(_))));
        }
    }

    mod feed_command_tests {
        use super::*;

        async fn logged_in() -> Harness {
            let mut h = Harness::new().await;
            h.run(Command::Register {
                name: "alice".to_string(),
            })
            .await
            .unwrap();
            h
        }

        fn add_blog() -> UserCommand {
            UserCommand::AddFeed {
                name: "Blog".to_string(),
                url: "https://example.com/rss".to_string(),
            }
        }

        #[tokio::test]
        async fn test_addfeed_follows_automatically() {
            let mut h = logged_in().await;
            let output = h.run_as_user(add_blog()).await.unwrap();
            assert!(output.contains("* Name: Blog | URL: https://example.com/rss"));
            assert!(output.contains("Feed followed: Blog by alice"));

            let output = h.run_as_user(UserCommand::Following).await.unwrap();
            assert_eq!(output, "User alice follows:\n* Blog\n");
        }

        #[tokio::test]
        async fn test_feeds_lists_owner() {
            let mut h = logged_in().await;
            h.run_as_user(add_blog()).await.unwrap();

            let output = h.run(Command::Feeds).await.unwrap();
            assert_eq!(output, "* Blog (https://example.com/rss) - By: alice\n");
        }

        #[tokio::test]
        async fn test_follow_twice_fails() {
            let mut h = logged_in().await;
            h.run_as_user(add_blog()).await.unwrap();

            let result = h
                .run_as_user(UserCommand::Follow {
                    url: "https://example.com/rss".to_string(),
                })
                .await;
            assert!(matches!(result, Err(Error::DuplicateFollow { .. })));
        }

        #[tokio::test]
        async fn test_follow_unknown_feed_fails() {
            let mut h = logged_in().await;
            let result = h
                .run_as_user(UserCommand::Follow {
                    url: "https://missing.example.com/rss".to_string(),
                })
                .await;
            assert!(matches!(result, Err(Error::FeedNotFound(_))));
        }

        #[tokio::test]
        async fn test_unfollow_then_follow_again() {
            let mut h = logged_in().await;
            h.run_as_user(add_blog()).await.unwrap();

            let output = h
                .run_as_user(UserCommand::Unfollow {
                    url: "https://example.com/rss".to_string(),
                })
                .await
                .unwrap();
            assert_eq!(output, "Successfully unfollowed: https://example.com/rss\n");

            let output = h
                .run_as_user(UserCommand::Follow {
                    url: "https://example.com/rss".to_string(),
                })
                .await
                .unwrap();
            assert_eq!(output, "User alice is now following Blog\n");
        }

        #[tokio::test]
        async fn test_browse_empty_shows_hint() {
            let mut h = logged_in().await;
            let output = h
                .run_as_user(UserCommand::Browse { limit: None })
                .await
                .unwrap();
            assert!(output.starts_with("No posts found."));
        }

        #[tokio::test]
        async fn test_agg_rejects_bad_interval() {
            let mut h = logged_in().await;
            let result = h
                .run(Command::Agg {
                    interval: "5x".to_string(),
                })
                .await;
            assert!(matches!(result, Err(Error::InvalidDuration(_))));
        }
    }

    #[test]
    fn test_format_published() {
        assert_eq!(
            format_published(Some("2024-12-09T12:00:00.000000Z")),
            "2024-12-09 12:00 UTC"
        );
        assert_eq!(format_published(None), "unknown");
        assert_eq!(format_published(Some("yesterday")), "yesterday");
    }
}
