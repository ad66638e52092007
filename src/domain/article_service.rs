use crate::domain::models::{Article, NewArticle, NewShare, Source};
use crate::infrastructure::article_fetcher::{
    is_reachability_error, ArticleFetcher, FetchError, Metadata,
};
use crate::infrastructure::repository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cached articles older than this many hours are re-extracted on the next
/// share.
const REFRESH_AFTER_HOURS: i64 = 24;

/// How long a refresh of one canonical URL suppresses further refreshes.
const REFRESH_GUARD_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum ArticleServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// The post behind a share edge, as seen on the firehose.
#[derive(Debug, Clone)]
pub struct SharePost {
    pub post_uri: String,
    pub post_cid: String,
    pub text: String,
    pub is_repost: bool,
    pub posted_at: Option<DateTime<Utc>>,
}

/// What `record_share` did, for counters and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Recorded {
        article_created: bool,
        share_inserted: bool,
    },
    /// The URL answered but is not a news article; nothing was stored.
    NotNews,
    /// The URL answered with unusable content (non-HTML, unexpected 4xx);
    /// nothing was stored and nothing will be retried.
    ContentError,
}

/// Process-local stampede guard: a popular URL shared by many posts within
/// the window is refreshed once, not once per share.
pub struct RefreshGuard {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl RefreshGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when the caller should refresh `url`, and records the
    /// attempt. Stale entries are pruned once the map grows.
    pub fn try_acquire(&self, url: &str) -> bool {
        let mut entries = self.entries.lock().expect("refresh guard lock poisoned");
        let now = Instant::now();

        if entries.len() > 1024 {
            let ttl = self.ttl;
            entries.retain(|_, acquired| now.duration_since(*acquired) < ttl);
        }

        match entries.get(url) {
            Some(acquired) if now.duration_since(*acquired) < self.ttl => false,
            _ => {
                entries.insert(url.to_string(), now);
                true
            }
        }
    }
}

impl Default for RefreshGuard {
    fn default() -> Self {
        Self::new(REFRESH_GUARD_TTL)
    }
}

/// Record that `source` shared the article at `canonical_url` in `post`.
///
/// Idempotent under replays and concurrent calls: the article is keyed on
/// its canonical URL and the share edge on (post_uri, article); unique
/// constraints in storage arbitrate races, and losers re-read the winner.
pub async fn record_share(
    pool: &SqlitePool,
    fetcher: &ArticleFetcher,
    guard: &RefreshGuard,
    canonical_url: &str,
    source: &Source,
    post: &SharePost,
) -> Result<ShareOutcome, ArticleServiceError> {
    let (article, article_created) = match repository::get_article_by_url(pool, canonical_url)
        .await?
    {
        Some(article) => {
            refresh_if_stale(pool, fetcher, guard, &article).await?;
            (article, false)
        }
        None => match create_article(pool, fetcher, canonical_url).await? {
            CreateOutcome::Created(article) => (article, true),
            CreateOutcome::NotNews => return Ok(ShareOutcome::NotNews),
            CreateOutcome::ContentError => return Ok(ShareOutcome::ContentError),
        },
    };

    let share = NewShare {
        source_id: source.id.clone(),
        article_id: article.id.clone(),
        post_uri: post.post_uri.clone(),
        post_cid: post.post_cid.clone(),
        post_text: post.text.clone(),
        is_repost: post.is_repost,
        posted_at: post.posted_at,
    };

    let share_inserted = repository::insert_share(pool, &share).await?;

    Ok(ShareOutcome::Recorded {
        article_created,
        share_inserted,
    })
}

enum CreateOutcome {
    Created(Article),
    NotNews,
    ContentError,
}

/// Validate the URL with the short deadline, then populate the article with
/// a full extraction. Unreachable hosts still get a row (so the share edge
/// has an anchor and the refresh path can retry later); content failures
/// get nothing.
async fn create_article(
    pool: &SqlitePool,
    fetcher: &ArticleFetcher,
    canonical_url: &str,
) -> Result<CreateOutcome, sqlx::Error> {
    let new_article = match fetcher.validate(canonical_url).await {
        Ok(_) => match fetcher.extract(canonical_url).await {
            Ok(metadata) => article_from_metadata(canonical_url, &metadata),
            Err(error) if is_reachability_error(&error) => {
                tracing::debug!(
                    "Article became unreachable between validate and extract: {}: {}",
                    canonical_url,
                    error
                );
                unreachable_article(canonical_url, &error)
            }
            Err(error) => {
                tracing::debug!("Extraction failed for {}: {}", canonical_url, error);
                return Ok(CreateOutcome::ContentError);
            }
        },
        Err(FetchError::NotNews) => {
            tracing::debug!("Not a news article, skipping: {}", canonical_url);
            return Ok(CreateOutcome::NotNews);
        }
        Err(error) if is_reachability_error(&error) => {
            tracing::debug!("Unreachable article {}: {}", canonical_url, error);
            unreachable_article(canonical_url, &error)
        }
        Err(error) => {
            tracing::debug!("Unusable article content at {}: {}", canonical_url, error);
            return Ok(CreateOutcome::ContentError);
        }
    };

    match repository::insert_article(pool, &new_article).await? {
        Some(article) => Ok(CreateOutcome::Created(article)),
        // A concurrent share won the URL; adopt its row.
        None => {
            let winner = repository::get_article_by_url(pool, canonical_url)
                .await?
                .ok_or(sqlx::Error::RowNotFound)?;
            Ok(CreateOutcome::Created(winner))
        }
    }
}

/// Whether a stored article is due for re-extraction.
pub fn refresh_due(article: &Article, now: DateTime<Utc>) -> bool {
    if !article.is_reachable {
        return true;
    }
    match article.last_fetch_at {
        None => true,
        Some(last_fetch_at) => now - last_fetch_at > ChronoDuration::hours(REFRESH_AFTER_HOURS),
    }
}

async fn refresh_if_stale(
    pool: &SqlitePool,
    fetcher: &ArticleFetcher,
    guard: &RefreshGuard,
    article: &Article,
) -> Result<(), sqlx::Error> {
    if !refresh_due(article, Utc::now()) {
        return Ok(());
    }

    if !guard.try_acquire(&article.url) {
        tracing::trace!("Refresh of {} suppressed by guard", article.url);
        return Ok(());
    }

    match fetcher.extract(&article.url).await {
        Ok(metadata) => {
            let refreshed = article_from_metadata(&article.url, &metadata);
            repository::update_article_content(pool, &article.id, &refreshed).await?;
            tracing::debug!("Refreshed article {}", article.url);
        }
        Err(error) if is_reachability_error(&error) => {
            repository::mark_article_unreachable(pool, &article.id, &error.to_string()).await?;
            tracing::debug!("Article still unreachable {}: {}", article.url, error);
        }
        Err(error) => {
            // Content went bad on a refresh; keep the cached copy.
            tracing::debug!("Refresh returned unusable content {}: {}", article.url, error);
        }
    }

    Ok(())
}

fn article_from_metadata(canonical_url: &str, metadata: &Metadata) -> NewArticle {
    let now = Utc::now();

    NewArticle {
        url: canonical_url.to_string(),
        title: metadata.title.clone(),
        description: metadata.description.clone(),
        author: metadata.author.clone(),
        site_name: metadata.site_name.clone(),
        image_url: metadata.image_url.clone(),
        published_at: metadata.published_at,
        language: metadata.language.clone(),
        word_count: metadata.word_count,
        reading_time_minutes: metadata.reading_time_minutes,
        jsonld_data: metadata.jsonld_data.clone(),
        og_data: metadata.og_data.clone(),
        raw_html: metadata.raw_html.clone(),
        text_content: metadata.text_content.clone(),
        is_cached: true,
        cached_at: Some(now),
        last_fetch_at: Some(now),
        is_reachable: true,
        fetch_error: None,
        fetch_retries: 0,
        last_fetch_error_at: None,
    }
}

fn unreachable_article(canonical_url: &str, error: &FetchError) -> NewArticle {
    let now = Utc::now();

    NewArticle {
        url: canonical_url.to_string(),
        title: String::new(),
        description: String::new(),
        author: String::new(),
        site_name: String::new(),
        image_url: String::new(),
        published_at: None,
        language: String::new(),
        word_count: 0,
        reading_time_minutes: 0,
        jsonld_data: String::new(),
        og_data: String::new(),
        raw_html: String::new(),
        text_content: String::new(),
        is_cached: false,
        cached_at: None,
        last_fetch_at: Some(now),
        is_reachable: false,
        fetch_error: Some(error.to_string()),
        fetch_retries: 1,
        last_fetch_error_at: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_with(
        is_reachable: bool,
        last_fetch_at: Option<DateTime<Utc>>,
    ) -> Article {
        let now = Utc::now();
        Article {
            id: "a1".to_string(),
            url: "https://news.example/story".to_string(),
            title: String::new(),
            description: String::new(),
            author: String::new(),
            site_name: String::new(),
            image_url: String::new(),
            published_at: None,
            language: String::new(),
            word_count: 0,
            reading_time_minutes: 0,
            jsonld_data: String::new(),
            og_data: String::new(),
            raw_html: String::new(),
            text_content: String::new(),
            quality_score: 0.0,
            trending_score: 0.0,
            is_cached: true,
            cached_at: Some(now),
            last_fetch_at,
            is_reachable,
            fetch_error: None,
            fetch_retries: 0,
            last_fetch_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_refresh_due_when_unreachable() {
        let article = article_with(false, Some(Utc::now()));
        assert!(refresh_due(&article, Utc::now()));
    }

    #[test]
    fn test_refresh_due_when_never_fetched() {
        let article = article_with(true, None);
        assert!(refresh_due(&article, Utc::now()));
    }

    #[test]
    fn test_refresh_due_after_24_hours() {
        let now = Utc::now();
        let stale = article_with(true, Some(now - ChronoDuration::hours(25)));
        let fresh = article_with(true, Some(now - ChronoDuration::hours(23)));

        assert!(refresh_due(&stale, now));
        assert!(!refresh_due(&fresh, now));
    }

    #[test]
    fn test_refresh_guard_suppresses_within_ttl() {
        let guard = RefreshGuard::new(Duration::from_secs(60));

        assert!(guard.try_acquire("https://news.example/a"));
        assert!(!guard.try_acquire("https://news.example/a"));
        assert!(guard.try_acquire("https://news.example/b"));
    }

    #[test]
    fn test_refresh_guard_expires() {
        let guard = RefreshGuard::new(Duration::from_millis(0));

        assert!(guard.try_acquire("https://news.example/a"));
        assert!(guard.try_acquire("https://news.example/a"));
    }

    #[test]
    fn test_unreachable_article_shape() {
        let error = FetchError::NotHtml("never mind".to_string());
        let article = unreachable_article("https://news.example/down", &error);

        assert!(!article.is_reachable);
        assert!(!article.is_cached);
        assert_eq!(article.fetch_retries, 1);
        assert!(article.fetch_error.is_some());
        assert!(article.last_fetch_error_at.is_some());
        assert!(article.title.is_empty());
    }
}
