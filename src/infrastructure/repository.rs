use crate::domain::models::{
    Article, Feed, FeedItem, NewArticle, NewFeedItem, NewShare, Source, SourceArticle, User,
};
use chrono::{DateTime, Utc};
use sqlx::{Error as SqlxError, FromRow, SqlitePool};
use uuid::Uuid;

// Source repository methods

/// Insert a source, or refresh its profile fields if the DID already exists
/// and the upstream profile changed. Quality score is never touched here.
pub async fn upsert_source(
    pool: &SqlitePool,
    did: &str,
    handle: &str,
    display_name: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<Source, SqlxError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO sources (id, did, handle, display_name, avatar_url, quality_score, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0.5, ?, ?)
        ON CONFLICT(did) DO UPDATE SET
            handle = excluded.handle,
            display_name = excluded.display_name,
            avatar_url = excluded.avatar_url,
            updated_at = excluded.updated_at
        WHERE sources.handle IS NOT excluded.handle
           OR sources.display_name IS NOT excluded.display_name
           OR sources.avatar_url IS NOT excluded.avatar_url
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(did)
    .bind(handle)
    .bind(display_name)
    .bind(avatar_url)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_source_by_did(pool, did)
        .await?
        .ok_or(SqlxError::RowNotFound)
}

pub async fn get_source_by_did(pool: &SqlitePool, did: &str) -> Result<Option<Source>, SqlxError> {
    let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE did = ?")
        .bind(did)
        .fetch_optional(pool)
        .await?;

    Ok(source)
}

/// All tracked DIDs, for the firehose filter index.
pub async fn list_tracked_dids(pool: &SqlitePool) -> Result<Vec<String>, SqlxError> {
    let dids: Vec<String> = sqlx::query_scalar("SELECT did FROM sources")
        .fetch_all(pool)
        .await?;

    Ok(dids)
}

pub async fn list_source_ids(pool: &SqlitePool) -> Result<Vec<String>, SqlxError> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM sources")
        .fetch_all(pool)
        .await?;

    Ok(ids)
}

#[derive(Debug, Clone, FromRow)]
pub struct SourceShareStats {
    pub share_count: i64,
    pub engagement: i64,
    pub recent_count: i64,
}

/// Aggregate share stats for one source; `recent_cutoff` bounds the
/// recent-activity window.
pub async fn source_share_stats(
    pool: &SqlitePool,
    source_id: &str,
    recent_cutoff: DateTime<Utc>,
) -> Result<SourceShareStats, SqlxError> {
    let stats = sqlx::query_as::<_, SourceShareStats>(
        r#"
        SELECT
            COUNT(*) AS share_count,
            COALESCE(SUM(likes_count + reposts_count + replies_count), 0) AS engagement,
            COALESCE(SUM(CASE WHEN COALESCE(posted_at, created_at) > ? THEN 1 ELSE 0 END), 0) AS recent_count
        FROM source_articles
        WHERE source_id = ?
        "#,
    )
    .bind(recent_cutoff)
    .bind(source_id)
    .fetch_one(pool)
    .await?;

    Ok(stats)
}

pub async fn update_source_quality(
    pool: &SqlitePool,
    source_id: &str,
    quality_score: f64,
) -> Result<(), SqlxError> {
    let now = Utc::now();

    sqlx::query("UPDATE sources SET quality_score = ?, updated_at = ? WHERE id = ?")
        .bind(quality_score)
        .bind(now)
        .bind(source_id)
        .execute(pool)
        .await?;

    Ok(())
}

// User repository methods

pub async fn upsert_user(pool: &SqlitePool, did: &str, handle: &str) -> Result<User, SqlxError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO users (id, did, handle, is_active, created_at, updated_at)
        VALUES (?, ?, ?, 1, ?, ?)
        ON CONFLICT(did) DO UPDATE SET
            handle = excluded.handle,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(did)
    .bind(handle)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_user_by_did(pool, did)
        .await?
        .ok_or(SqlxError::RowNotFound)
}

pub async fn get_user_by_did(pool: &SqlitePool, did: &str) -> Result<Option<User>, SqlxError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE did = ?")
        .bind(did)
        .fetch_optional(pool)
        .await?;

    Ok(user)
}

pub async fn get_user_by_id(pool: &SqlitePool, user_id: &str) -> Result<Option<User>, SqlxError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(user)
}

/// Active subscribers whose follows are stale (never imported, or imported
/// before `cutoff`), oldest first.
pub async fn list_refresh_due_users(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<User>, SqlxError> {
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE is_active = 1
          AND (follows_last_refreshed IS NULL OR follows_last_refreshed < ?)
        ORDER BY follows_last_refreshed ASC NULLS FIRST
        LIMIT ?
        "#,
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(users)
}

pub async fn set_follows_refreshed(
    pool: &SqlitePool,
    user_id: &str,
    refreshed_at: DateTime<Utc>,
) -> Result<(), SqlxError> {
    sqlx::query("UPDATE users SET follows_last_refreshed = ?, updated_at = ? WHERE id = ?")
        .bind(refreshed_at)
        .bind(refreshed_at)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

// Subscription (user_sources) repository methods

pub async fn upsert_user_source(
    pool: &SqlitePool,
    user_id: &str,
    source_id: &str,
) -> Result<(), SqlxError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO user_sources (id, user_id, source_id, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id, source_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(source_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn count_user_sources(pool: &SqlitePool, user_id: &str) -> Result<i64, SqlxError> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_sources WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

// Article repository methods

pub async fn get_article_by_url(
    pool: &SqlitePool,
    url: &str,
) -> Result<Option<Article>, SqlxError> {
    let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE url = ?")
        .bind(url)
        .fetch_optional(pool)
        .await?;

    Ok(article)
}

pub async fn get_article_by_id(
    pool: &SqlitePool,
    article_id: &str,
) -> Result<Option<Article>, SqlxError> {
    let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
        .bind(article_id)
        .fetch_optional(pool)
        .await?;

    Ok(article)
}

/// Insert an article keyed on its canonical URL. Returns None when a
/// concurrent writer won the URL; callers re-read the winning row.
pub async fn insert_article(
    pool: &SqlitePool,
    article: &NewArticle,
) -> Result<Option<Article>, SqlxError> {
    let now = Utc::now();

    let inserted = sqlx::query_as::<_, Article>(
        r#"
        INSERT INTO articles (
            id, url, title, description, author, site_name, image_url,
            published_at, language, word_count, reading_time_minutes,
            jsonld_data, og_data, raw_html, text_content,
            is_cached, cached_at, last_fetch_at,
            is_reachable, fetch_error, fetch_retries, last_fetch_error_at,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(url) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&article.url)
    .bind(&article.title)
    .bind(&article.description)
    .bind(&article.author)
    .bind(&article.site_name)
    .bind(&article.image_url)
    .bind(article.published_at)
    .bind(&article.language)
    .bind(article.word_count)
    .bind(article.reading_time_minutes)
    .bind(&article.jsonld_data)
    .bind(&article.og_data)
    .bind(&article.raw_html)
    .bind(&article.text_content)
    .bind(article.is_cached)
    .bind(article.cached_at)
    .bind(article.last_fetch_at)
    .bind(article.is_reachable)
    .bind(&article.fetch_error)
    .bind(article.fetch_retries)
    .bind(article.last_fetch_error_at)
    .bind(now)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(inserted)
}

/// Overwrite an article's extracted content after a successful refresh and
/// clear its error state. The retry counter is deliberately left alone.
pub async fn update_article_content(
    pool: &SqlitePool,
    article_id: &str,
    article: &NewArticle,
) -> Result<(), SqlxError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE articles SET
            title = ?, description = ?, author = ?, site_name = ?, image_url = ?,
            published_at = ?, language = ?, word_count = ?, reading_time_minutes = ?,
            jsonld_data = ?, og_data = ?, raw_html = ?, text_content = ?,
            is_cached = 1, cached_at = ?, last_fetch_at = ?,
            is_reachable = 1, fetch_error = NULL,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&article.title)
    .bind(&article.description)
    .bind(&article.author)
    .bind(&article.site_name)
    .bind(&article.image_url)
    .bind(article.published_at)
    .bind(&article.language)
    .bind(article.word_count)
    .bind(article.reading_time_minutes)
    .bind(&article.jsonld_data)
    .bind(&article.og_data)
    .bind(&article.raw_html)
    .bind(&article.text_content)
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(article_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a failed refresh: bump the retry counter and stamp the error.
pub async fn mark_article_unreachable(
    pool: &SqlitePool,
    article_id: &str,
    error: &str,
) -> Result<(), SqlxError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE articles SET
            is_reachable = 0,
            fetch_error = ?,
            fetch_retries = fetch_retries + 1,
            last_fetch_at = ?,
            last_fetch_error_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(article_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update_article_quality(
    pool: &SqlitePool,
    article_id: &str,
    quality_score: f64,
) -> Result<(), SqlxError> {
    let now = Utc::now();

    sqlx::query("UPDATE articles SET quality_score = ?, updated_at = ? WHERE id = ?")
        .bind(quality_score)
        .bind(now)
        .bind(article_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn update_article_trending(
    pool: &SqlitePool,
    article_id: &str,
    trending_score: f64,
) -> Result<(), SqlxError> {
    let now = Utc::now();

    sqlx::query("UPDATE articles SET trending_score = ?, updated_at = ? WHERE id = ?")
        .bind(trending_score)
        .bind(now)
        .bind(article_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// The slice of article fields the quality pass needs.
#[derive(Debug, Clone, FromRow)]
pub struct ArticleScoringRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub site_name: String,
    pub word_count: i64,
}

pub async fn list_article_scoring_rows(
    pool: &SqlitePool,
) -> Result<Vec<ArticleScoringRow>, SqlxError> {
    let rows = sqlx::query_as::<_, ArticleScoringRow>(
        "SELECT id, title, description, image_url, site_name, word_count FROM articles",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[derive(Debug, Clone, FromRow)]
pub struct ArticleShareStats {
    pub share_count: i64,
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    pub avg_source_quality: f64,
}

pub async fn article_share_stats(
    pool: &SqlitePool,
    article_id: &str,
) -> Result<ArticleShareStats, SqlxError> {
    let stats = sqlx::query_as::<_, ArticleShareStats>(
        r#"
        SELECT
            COUNT(*) AS share_count,
            COALESCE(SUM(sa.likes_count), 0) AS likes,
            COALESCE(SUM(sa.reposts_count), 0) AS reposts,
            COALESCE(SUM(sa.replies_count), 0) AS replies,
            COALESCE(AVG(s.quality_score), 0.0) AS avg_source_quality
        FROM source_articles sa
        INNER JOIN sources s ON s.id = sa.source_id
        WHERE sa.article_id = ?
        "#,
    )
    .bind(article_id)
    .fetch_one(pool)
    .await?;

    Ok(stats)
}

#[derive(Debug, Clone, FromRow)]
pub struct TrendingCandidate {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Articles young enough for the trending pass.
pub async fn list_trending_candidates(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<TrendingCandidate>, SqlxError> {
    let rows = sqlx::query_as::<_, TrendingCandidate>(
        "SELECT id, created_at FROM articles WHERE created_at > ?",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Ranked candidates for the global feed rebuild.
pub async fn list_feed_candidates(
    pool: &SqlitePool,
    created_after: DateTime<Utc>,
    quality_threshold: f64,
    limit: i64,
) -> Result<Vec<Article>, SqlxError> {
    let articles = sqlx::query_as::<_, Article>(
        r#"
        SELECT * FROM articles
        WHERE created_at > ? AND quality_score > ?
        ORDER BY quality_score DESC, trending_score DESC, created_at DESC
        LIMIT ?
        "#,
    )
    .bind(created_after)
    .bind(quality_threshold)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(articles)
}

pub async fn count_articles(pool: &SqlitePool) -> Result<i64, SqlxError> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

// Share (source_articles) repository methods

/// Insert a share edge; the composite (post_uri, article_id) constraint
/// absorbs replays. Returns whether a new row was written.
pub async fn insert_share(pool: &SqlitePool, share: &NewShare) -> Result<bool, SqlxError> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO source_articles (
            id, source_id, article_id, post_uri, post_cid, post_text,
            is_repost, posted_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(post_uri, article_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&share.source_id)
    .bind(&share.article_id)
    .bind(&share.post_uri)
    .bind(&share.post_cid)
    .bind(&share.post_text)
    .bind(share.is_repost)
    .bind(share.posted_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_shares(pool: &SqlitePool) -> Result<i64, SqlxError> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM source_articles")
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

pub async fn list_shares_for_article(
    pool: &SqlitePool,
    article_id: &str,
) -> Result<Vec<SourceArticle>, SqlxError> {
    let shares = sqlx::query_as::<_, SourceArticle>(
        "SELECT * FROM source_articles WHERE article_id = ? ORDER BY created_at ASC",
    )
    .bind(article_id)
    .fetch_all(pool)
    .await?;

    Ok(shares)
}

/// An article's earliest share edge; the feed-skeleton adapter resolves
/// feed entries to the post that first surfaced the article.
pub async fn first_share_for_article(
    pool: &SqlitePool,
    article_id: &str,
) -> Result<Option<SourceArticle>, SqlxError> {
    let share = sqlx::query_as::<_, SourceArticle>(
        r#"
        SELECT * FROM source_articles
        WHERE article_id = ?
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(article_id)
    .fetch_optional(pool)
    .await?;

    Ok(share)
}

/// The source behind an article's earliest share, used as the article's
/// byline in feed responses.
pub async fn first_share_source(
    pool: &SqlitePool,
    article_id: &str,
) -> Result<Option<Source>, SqlxError> {
    let source = sqlx::query_as::<_, Source>(
        r#"
        SELECT s.* FROM sources s
        INNER JOIN source_articles sa ON sa.source_id = s.id
        WHERE sa.article_id = ?
        ORDER BY sa.created_at ASC
        LIMIT 1
        "#,
    )
    .bind(article_id)
    .fetch_optional(pool)
    .await?;

    Ok(source)
}

// Feed repository methods

/// Fetch the named feed, creating it with the given parameters when absent.
pub async fn ensure_feed(
    pool: &SqlitePool,
    name: &str,
    feed_type: &str,
    max_items: i64,
    refresh_rate_seconds: i64,
    quality_threshold: f64,
) -> Result<Feed, SqlxError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO feeds (id, name, feed_type, max_items, refresh_rate_seconds, quality_threshold, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(feed_type)
    .bind(max_items)
    .bind(refresh_rate_seconds)
    .bind(quality_threshold)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;

    Ok(feed)
}

// FeedItem repository methods

/// Atomically replace the global slice of a feed with a fresh ranking.
/// Readers observe the old set or the new set, never an empty one.
pub async fn replace_global_feed_items(
    pool: &SqlitePool,
    feed_id: &str,
    items: &[NewFeedItem],
) -> Result<(), SqlxError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM feed_items WHERE feed_id = ? AND user_id IS NULL")
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

    for item in items {
        sqlx::query(
            r#"
            INSERT INTO feed_items (id, feed_id, article_id, user_id, position, score, relevance_score, added_at)
            VALUES (?, ?, ?, NULL, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(feed_id)
        .bind(&item.article_id)
        .bind(item.position)
        .bind(item.score)
        .bind(item.relevance_score)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(())
}

pub async fn list_feed_items(pool: &SqlitePool, feed_id: &str) -> Result<Vec<FeedItem>, SqlxError> {
    let items = sqlx::query_as::<_, FeedItem>(
        r#"
        SELECT * FROM feed_items
        WHERE feed_id = ? AND user_id IS NULL
        ORDER BY position ASC
        "#,
    )
    .bind(feed_id)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

pub async fn global_feed_page(
    pool: &SqlitePool,
    feed_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<FeedItem>, SqlxError> {
    let items = sqlx::query_as::<_, FeedItem>(
        r#"
        SELECT * FROM feed_items
        WHERE feed_id = ? AND user_id IS NULL
        ORDER BY position ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(feed_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

/// The subscriber's slice of the global feed: global entries restricted to
/// articles shared by a source the subscriber follows, position order kept.
pub async fn personalised_feed_page(
    pool: &SqlitePool,
    feed_id: &str,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<FeedItem>, SqlxError> {
    let items = sqlx::query_as::<_, FeedItem>(
        r#"
        SELECT fi.* FROM feed_items fi
        WHERE fi.feed_id = ? AND fi.user_id IS NULL
          AND EXISTS (
              SELECT 1 FROM source_articles sa
              INNER JOIN user_sources us ON us.source_id = sa.source_id
              WHERE sa.article_id = fi.article_id AND us.user_id = ?
          )
        ORDER BY fi.position ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(feed_id)
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

pub async fn count_global_feed_items(pool: &SqlitePool, feed_id: &str) -> Result<i64, SqlxError> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM feed_items WHERE feed_id = ? AND user_id IS NULL")
            .bind(feed_id)
            .fetch_one(pool)
            .await?;

    Ok(count.0)
}
