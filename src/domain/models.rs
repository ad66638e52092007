use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;

/// A tracked author on the network whose posts feed the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Source {
    pub id: String,
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub follower_count: i64,
    pub is_verified: bool,
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A subscriber whose follows define a personalised view of the feed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub follows_last_refreshed: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Follow edge from a subscriber to a tracked source.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSource {
    pub id: String,
    pub user_id: String,
    pub source_id: String,
    pub created_at: DateTime<Utc>,
}

/// An article, identified by its canonical URL.
///
/// Content fields hold empty strings until a successful extraction; the
/// reachability fields track the fetch lifecycle (`is_reachable=false`
/// always comes with a `fetch_error` and `last_fetch_error_at`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Article {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub author: String,
    pub site_name: String,
    pub image_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub language: String,
    pub word_count: i64,
    pub reading_time_minutes: i64,
    pub jsonld_data: String,
    pub og_data: String,
    pub raw_html: String,
    pub text_content: String,
    pub quality_score: f64,
    pub trending_score: f64,
    pub is_cached: bool,
    pub cached_at: Option<DateTime<Utc>>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub is_reachable: bool,
    pub fetch_error: Option<String>,
    pub fetch_retries: i64,
    pub last_fetch_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Share edge: one post by one source mentioning one article.
///
/// Uniqueness is the composite (post_uri, article_id) — a post linking two
/// articles yields two shares, and an article shared by two posts keeps both.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SourceArticle {
    pub id: String,
    pub source_id: String,
    pub article_id: String,
    pub post_uri: String,
    pub post_cid: String,
    pub post_text: String,
    pub is_repost: bool,
    pub posted_at: Option<DateTime<Utc>>,
    pub likes_count: i64,
    pub reposts_count: i64,
    pub replies_count: i64,
    pub score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feed {
    pub id: String,
    pub name: String,
    pub feed_type: String,
    pub description: String,
    pub max_items: i64,
    pub refresh_rate_seconds: i64,
    pub quality_threshold: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedItem {
    pub id: String,
    pub feed_id: String,
    pub article_id: String,
    pub user_id: Option<String>,
    pub position: i64,
    pub score: f64,
    pub relevance_score: f64,
    pub added_at: DateTime<Utc>,
}

/// Insert payload for an article row.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub description: String,
    pub author: String,
    pub site_name: String,
    pub image_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub language: String,
    pub word_count: i64,
    pub reading_time_minutes: i64,
    pub jsonld_data: String,
    pub og_data: String,
    pub raw_html: String,
    pub text_content: String,
    pub is_cached: bool,
    pub cached_at: Option<DateTime<Utc>>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub is_reachable: bool,
    pub fetch_error: Option<String>,
    pub fetch_retries: i64,
    pub last_fetch_error_at: Option<DateTime<Utc>>,
}

/// Insert payload for a share edge.
#[derive(Debug, Clone)]
pub struct NewShare {
    pub source_id: String,
    pub article_id: String,
    pub post_uri: String,
    pub post_cid: String,
    pub post_text: String,
    pub is_repost: bool,
    pub posted_at: Option<DateTime<Utc>>,
}

/// Insert payload for one materialised feed entry.
#[derive(Debug, Clone)]
pub struct NewFeedItem {
    pub article_id: String,
    pub position: i64,
    pub score: f64,
    pub relevance_score: f64,
}

/// Free-form extracted claim. Reserved for a future extraction stage; the
/// pipeline only guarantees the table cascades with its article.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[allow(dead_code)]
pub struct ArticleFact {
    pub id: String,
    pub article_id: String,
    pub fact_text: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Tuning knobs for the follows importer.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// A subscriber's follows are re-imported once this much time has
    /// passed since the last full traversal.
    pub refresh_interval: Duration,
    /// Max subscribers handled per batch run.
    pub batch_size: i64,
    /// Pause between upstream page fetches and between subscribers.
    pub rate_limit_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(24 * 60 * 60),
            batch_size: 10,
            rate_limit_delay: Duration::from_millis(100),
        }
    }
}

/// A follow as returned by the upstream graph endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowRecord {
    pub did: String,
    pub handle: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_config_defaults() {
        let config = RefreshConfig::default();

        assert_eq!(config.refresh_interval, Duration::from_secs(86400));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.rate_limit_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_follow_record_deserialization() {
        let json = r#"{
            "did": "did:plc:abc123",
            "handle": "writer.example",
            "displayName": "A Writer",
            "avatar": "https://cdn.example/avatar.jpg"
        }"#;

        let follow: FollowRecord = serde_json::from_str(json).unwrap();

        assert_eq!(follow.did, "did:plc:abc123");
        assert_eq!(follow.handle, "writer.example");
        assert_eq!(follow.display_name, Some("A Writer".to_string()));
    }

    #[test]
    fn test_follow_record_minimal() {
        let json = r#"{"did": "did:plc:xyz", "handle": "minimal.example"}"#;

        let follow: FollowRecord = serde_json::from_str(json).unwrap();

        assert!(follow.display_name.is_none());
        assert!(follow.avatar.is_none());
    }
}
