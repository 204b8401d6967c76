use chrono::Utc;
use sqlx::FromRow;

use super::{timestamp, Database};
use crate::error::{is_foreign_key_violation, is_unique_violation, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FollowRecord {
    pub feed_name: String,
    pub user_name: String,
}

impl Database {
    /// Follow a feed. Following the same feed twice is a user mistake and is
    /// reported as [`Error::DuplicateFollow`].
    pub async fn create_feed_follow(&self, user_id: i64, feed_id: i64) -> Result<FollowRecord> {
        let now = timestamp(Utc::now());
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await;

        let follow_id = match inserted {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => {
                let names = self.follow_names(user_id, feed_id).await?;
                return Err(Error::DuplicateFollow {
                    user: names.user_name,
                    feed: names.feed_name,
                });
            }
            Err(e) if is_foreign_key_violation(&e) => {
                return Err(Error::Constraint(format!(
                    "user {} or feed {} does not exist",
                    user_id, feed_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let record = sqlx::query_as::<_, FollowRecord>(
            r#"
            SELECT f.name AS feed_name, u.name AS user_name
            FROM feed_follows ff
            INNER JOIN feeds f ON f.id = ff.feed_id
            INNER JOIN users u ON u.id = ff.user_id
            WHERE ff.id = ?
            "#,
        )
        .bind(follow_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn follow_names(&self, user_id: i64, feed_id: i64) -> Result<FollowRecord> {
        let record = sqlx::query_as::<_, FollowRecord>(
            r#"
            SELECT f.name AS feed_name, u.name AS user_name
            FROM users u, feeds f
            WHERE u.id = ? AND f.id = ?
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    /// Unfollow by feed URL. Fails with [`Error::FeedNotFound`] when no feed has
    /// that URL; returns whether a follow row was actually removed.
    pub async fn delete_feed_follow(&self, user_id: i64, feed_url: &str) -> Result<bool> {
        let feed = self
            .get_feed_by_url(feed_url)
            .await?
            .ok_or_else(|| Error::FeedNotFound(feed_url.to_string()))?;

        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn feed_follows_for_user(&self, user_id: i64) -> Result<Vec<FollowRecord>> {
        let follows = sqlx::query_as::<_, FollowRecord>(
            r#"
            SELECT f.name AS feed_name, u.name AS user_name
            FROM feed_follows ff
            INNER JOIN feeds f ON f.id = ff.feed_id
            INNER JOIN users u ON u.id = ff.user_id
            WHERE ff.user_id = ?
            ORDER BY ff.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }
}
