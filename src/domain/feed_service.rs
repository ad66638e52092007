use crate::domain::models::{Article, Feed, NewFeedItem, Source};
use crate::infrastructure::repository;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

pub const GLOBAL_FEED_NAME: &str = "Top Stories";
const GLOBAL_FEED_TYPE: &str = "global";
const GLOBAL_FEED_MAX_ITEMS: i64 = 100;
const GLOBAL_FEED_REFRESH_SECONDS: i64 = 300;
const GLOBAL_FEED_QUALITY_THRESHOLD: f64 = 0.0;

/// Only articles first seen inside this window are feed candidates.
const FEED_WINDOW_DAYS: i64 = 7;

const DEFAULT_PAGE_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Error, Debug)]
pub enum FeedServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("User not found")]
    UserNotFound,
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub feed: Feed,
    pub items: Vec<FeedEntry>,
    pub meta: FeedMeta,
}

/// One ranked feed entry: the article plus the source behind its first
/// share, which the read surface presents as the byline.
#[derive(Debug, Serialize)]
pub struct FeedEntry {
    pub position: i64,
    pub score: f64,
    pub article: Article,
    pub source: Option<Source>,
}

#[derive(Debug, Serialize)]
pub struct FeedMeta {
    pub limit: i64,
    pub offset: i64,
    pub count: i64,
    pub total: i64,
}

/// Rebuild the global ranked feed.
///
/// Candidates are recent articles with any quality signal, ordered by
/// (quality DESC, trending DESC, created DESC); entries get dense 1-based
/// positions and a score of quality + 0.3*trending + a small position
/// bonus. The swap is one delete-then-insert transaction, so readers never
/// observe a half-built feed. Ties in the sort key may swap order between
/// rebuilds; the position bonus is float arithmetic and makes no promise
/// there.
pub async fn rebuild_global_feed(pool: &SqlitePool) -> Result<usize, FeedServiceError> {
    let feed = ensure_global_feed(pool).await?;

    let created_after = Utc::now() - ChronoDuration::days(FEED_WINDOW_DAYS);
    let candidates = repository::list_feed_candidates(
        pool,
        created_after,
        feed.quality_threshold,
        feed.max_items,
    )
    .await?;

    let total = candidates.len();
    let items: Vec<NewFeedItem> = candidates
        .iter()
        .enumerate()
        .map(|(index, article)| {
            let position = index as i64 + 1;
            NewFeedItem {
                article_id: article.id.clone(),
                position,
                score: entry_score(article, position, total),
                relevance_score: 0.0,
            }
        })
        .collect();

    repository::replace_global_feed_items(pool, &feed.id, &items).await?;

    tracing::info!("Global feed rebuilt with {} entries", total);
    Ok(total)
}

fn entry_score(article: &Article, position: i64, total: usize) -> f64 {
    let position_bonus = if total == 0 {
        0.0
    } else {
        ((total as f64 - position as f64) / total as f64) * 0.1
    };

    article.quality_score + 0.3 * article.trending_score + position_bonus
}

async fn ensure_global_feed(pool: &SqlitePool) -> Result<Feed, FeedServiceError> {
    let feed = repository::ensure_feed(
        pool,
        GLOBAL_FEED_NAME,
        GLOBAL_FEED_TYPE,
        GLOBAL_FEED_MAX_ITEMS,
        GLOBAL_FEED_REFRESH_SECONDS,
        GLOBAL_FEED_QUALITY_THRESHOLD,
    )
    .await?;

    Ok(feed)
}

fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// Paginated read over the materialised global feed.
pub async fn get_global_feed(
    pool: &SqlitePool,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<FeedResponse, FeedServiceError> {
    let (limit, offset) = clamp_page(limit, offset);
    let feed = ensure_global_feed(pool).await?;

    let rows = repository::global_feed_page(pool, &feed.id, limit, offset).await?;
    let total = repository::count_global_feed_items(pool, &feed.id).await?;
    let items = assemble_entries(pool, rows).await?;

    let meta = FeedMeta {
        limit,
        offset,
        count: items.len() as i64,
        total,
    };

    Ok(FeedResponse { feed, items, meta })
}

/// The subscriber's filtered view of the global feed: global entries whose
/// article was shared by a source the subscriber follows, in global
/// position order. Query-time only; an empty result is a valid answer, not
/// an error.
pub async fn get_personalised_feed(
    pool: &SqlitePool,
    user_id: &str,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<FeedResponse, FeedServiceError> {
    let (limit, offset) = clamp_page(limit, offset);

    let user = repository::get_user_by_id(pool, user_id)
        .await?
        .ok_or(FeedServiceError::UserNotFound)?;

    let feed = ensure_global_feed(pool).await?;
    let rows = repository::personalised_feed_page(pool, &feed.id, &user.id, limit, offset).await?;
    let count = rows.len() as i64;
    let items = assemble_entries(pool, rows).await?;

    let meta = FeedMeta {
        limit,
        offset,
        count: items.len() as i64,
        // Filtered totals would need a second pass over the whole feed;
        // page-local count is what the read surface paginates on.
        total: offset + count,
    };

    Ok(FeedResponse { feed, items, meta })
}

async fn assemble_entries(
    pool: &SqlitePool,
    rows: Vec<crate::domain::models::FeedItem>,
) -> Result<Vec<FeedEntry>, FeedServiceError> {
    let mut items = Vec::with_capacity(rows.len());

    for row in rows {
        // A cascade delete can race the page query; drop the orphan entry.
        let Some(article) = repository::get_article_by_id(pool, &row.article_id).await? else {
            continue;
        };
        let source = repository::first_share_source(pool, &row.article_id).await?;

        items.push(FeedEntry {
            position: row.position,
            score: row.score,
            article,
            source,
        });
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn article_scored(quality: f64, trending: f64) -> Article {
        let now: DateTime<Utc> = Utc::now();
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
            quality_score: quality,
            trending_score: trending,
            is_cached: true,
            cached_at: Some(now),
            last_fetch_at: Some(now),
            is_reachable: true,
            fetch_error: None,
            fetch_retries: 0,
            last_fetch_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_entry_score_combines_quality_trending_and_position() {
        let article = article_scored(0.8, 0.5);

        // 0.8 + 0.3*0.5 + ((100-1)/100)*0.1
        let expected = 0.8 + 0.15 + 0.099;
        assert!((entry_score(&article, 1, 100) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_entry_score_last_position_has_no_bonus() {
        let article = article_scored(0.8, 0.0);
        assert!((entry_score(&article, 100, 100) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_page_bounds() {
        assert_eq!(clamp_page(None, None), (50, 0));
        assert_eq!(clamp_page(Some(1000), Some(-5)), (100, 0));
        assert_eq!(clamp_page(Some(0), Some(10)), (1, 10));
    }
}
