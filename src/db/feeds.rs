use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{timestamp, Database};
use crate::error::{is_unique_violation, Error, Result};

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    /// Scheduling cursor. `None` means never fetched.
    pub last_fetched_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedListing {
    pub feed_name: String,
    pub feed_url: String,
    pub user_name: String,
}

impl Database {
    pub async fn create_feed(&self, name: &str, url: &str, user_id: i64) -> Result<Feed> {
        let now = timestamp(Utc::now());
        sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Constraint(format!("a feed with URL '{}' already exists", url))
            } else {
                e.into()
            }
        })
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedListing>> {
        let feeds = sqlx::query_as::<_, FeedListing>(
            r#"
            SELECT f.name AS feed_name, f.url AS feed_url, u.name AS user_name
            FROM feeds f
            INNER JOIN users u ON u.id = f.user_id
            ORDER BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Pick the least recently fetched feed and stamp it in one statement, so
    /// two concurrent claims never hand out the same never-fetched feed.
    pub async fn claim_next_feed(&self, at: DateTime<Utc>) -> Result<Option<Feed>> {
        let at = timestamp(at);
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            UPDATE feeds
            SET last_fetched_at = CASE
                    WHEN last_fetched_at IS NULL OR last_fetched_at < ? THEN ?
                    ELSE last_fetched_at
                END,
                updated_at = ?
            WHERE id = (
                SELECT id FROM feeds
                ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(&at)
        .bind(&at)
        .bind(&at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }
}
