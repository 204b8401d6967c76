use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{timestamp, Database};
use crate::error::Result;

pub const DEFAULT_BROWSE_LIMIT: i64 = 2;

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_id: i64,
}

/// A stored post joined with the name of the feed it came from.
#[derive(Debug, Clone, FromRow)]
pub struct PostView {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<String>,
    pub feed_name: String,
}

impl Database {
    /// Store a post unless one with the same URL already exists, from any feed.
    ///
    /// Dedup relies on the UNIQUE constraint on `posts.url` with
    /// `ON CONFLICT DO NOTHING`, so concurrent cycles cannot race each other.
    /// Returns whether a row was written.
    pub async fn create_post(&self, post: &NewPost) -> Result<bool> {
        let now = timestamp(Utc::now());
        let published_at = post.published_at.map(timestamp);

        let result = sqlx::query(
            r#"
            INSERT INTO posts
                (title, url, description, published_at, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&post.title)
        .bind(&post.url)
        .bind(post.description.as_deref())
        .bind(published_at)
        .bind(post.feed_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Posts from feeds the user follows, newest first. Posts without a
    /// published date sort after dated ones.
    pub async fn posts_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<PostView>> {
        let posts = sqlx::query_as::<_, PostView>(
            r#"
            SELECT p.id, p.title, p.url, p.description, p.published_at, f.name AS feed_name
            FROM posts p
            INNER JOIN feeds f ON f.id = p.feed_id
            INNER JOIN feed_follows ff ON ff.feed_id = f.id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC NULLS LAST, p.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    #[cfg(test)]
    pub(crate) async fn count_posts(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
