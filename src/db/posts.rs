//! Post rows: the single arbiter of the poll/trigger race.

use anyhow::Result;
use uuid::Uuid;

use super::Database;
use crate::models::{NewPost, Post};

const POST_COLUMNS: &str =
    "id, tracked_page_id, platform, external_post_id, url, content_text, discovered_via, first_seen_at";

impl Database {
    /// `INSERT ... ON CONFLICT DO NOTHING RETURNING`: only the first writer
    /// for `(tracked_page_id, external_post_id)` gets a row back.
    pub async fn insert_post_if_absent(&self, post: &NewPost) -> Result<Option<Post>> {
        let row = sqlx::query_as::<_, Post>(&format!(
            "INSERT INTO posts (tracked_page_id, platform, external_post_id, url, content_text, discovered_via, first_seen_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tracked_page_id, external_post_id) DO NOTHING
             RETURNING {POST_COLUMNS}"
        ))
        .bind(post.tracked_page_id)
        .bind(post.platform.as_str())
        .bind(&post.external_post_id)
        .bind(&post.url)
        .bind(&post.content_text)
        .bind(post.discovered_via.as_str())
        .bind(post.first_seen_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        let row = sqlx::query_as::<_, Post>(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}
