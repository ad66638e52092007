use crate::infrastructure::repository::{self, ArticleScoringRow, ArticleShareStats};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;

/// Window for the source recent-activity bonus.
const RECENT_ACTIVITY_DAYS: i64 = 7;

/// Articles older than this are out of the trending pass.
const TRENDING_WINDOW_HOURS: i64 = 48;

/// Reputation tiers keyed on extracted site name, case-insensitive.
const HIGH_REPUTATION_SITES: [&str; 10] = [
    "reuters",
    "associated press",
    "bbc news",
    "the new york times",
    "the washington post",
    "the guardian",
    "bloomberg",
    "financial times",
    "the wall street journal",
    "npr",
];

const MEDIUM_REPUTATION_SITES: [&str; 10] = [
    "cnn",
    "axios",
    "politico",
    "the verge",
    "ars technica",
    "wired",
    "techcrunch",
    "the atlantic",
    "time",
    "cnbc",
];

const HIGH_REPUTATION_SCORE: f64 = 0.9;
const MEDIUM_REPUTATION_SCORE: f64 = 0.7;
const DEFAULT_REPUTATION_SCORE: f64 = 0.5;

/// Source quality in [0,1]: engagement-per-share base plus consistency and
/// recent-activity bonuses. Sources with no shares sit at the 0.5 prior.
pub fn source_quality(share_count: i64, engagement: i64, recent_count: i64) -> f64 {
    if share_count == 0 {
        return 0.5;
    }

    let engagement_per_share = engagement as f64 / share_count as f64;
    let base = (0.5 + engagement_per_share / 1000.0).min(1.0);
    let consistency_bonus = (share_count as f64 / 100.0).min(0.2);
    let recent_bonus = (recent_count as f64 / 50.0).min(0.1);

    (base + consistency_bonus + recent_bonus).min(1.0)
}

/// Intrinsic content quality in [0,1]: substance, title and description
/// shape, and the presence of an image.
pub fn content_score(row: &ArticleScoringRow) -> f64 {
    let mut score: f64 = 0.5;

    if (300..=3000).contains(&row.word_count) {
        score += 0.2;
    } else if row.word_count >= 150 {
        score += 0.1;
    }

    let title_len = row.title.chars().count();
    if title_len > 10 && title_len < 200 {
        score += 0.1;
    }

    if row.description.chars().count() > 50 {
        score += 0.1;
    }

    if !row.image_url.is_empty() {
        score += 0.1;
    }

    score.min(1.0)
}

pub fn domain_score(site_name: &str) -> f64 {
    let normalised = site_name.trim().to_lowercase();

    if HIGH_REPUTATION_SITES.contains(&normalised.as_str()) {
        HIGH_REPUTATION_SCORE
    } else if MEDIUM_REPUTATION_SITES.contains(&normalised.as_str()) {
        MEDIUM_REPUTATION_SCORE
    } else {
        DEFAULT_REPUTATION_SCORE
    }
}

/// Article quality in [0,1]: 0.5 base, plus weighted source quality,
/// engagement (likes + reposts + local share count), content shape, and
/// site reputation.
pub fn article_quality(row: &ArticleScoringRow, stats: &ArticleShareStats) -> f64 {
    let mut score: f64 = 0.5;

    score += stats.avg_source_quality * 0.4;

    let engagement = stats.likes + stats.reposts + stats.share_count;
    score += (engagement as f64 / 500.0).min(0.3);

    score += content_score(row) * 0.2;
    score += domain_score(&row.site_name) * 0.1;

    score.min(1.0)
}

/// Trending score in [0,1]: engagement velocity with a 24h-half-life-style
/// exponential decay, for articles inside the 48h window.
pub fn trending_score(total_engagement: i64, age_hours: f64) -> f64 {
    let hours = age_hours.max(1.0);
    let velocity = total_engagement as f64 / hours;
    let decay = (-hours / 24.0).exp();

    (velocity * decay / 10.0).min(1.0)
}

/// Run all three scoring passes. Each row is computed and written on its
/// own; a failing row is logged and the pass moves on. Updates are
/// last-writer-wins by design — precision loss against concurrent ingestion
/// is acceptable for scores.
pub async fn run_scoring(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    score_sources(pool).await?;
    score_articles(pool).await?;
    score_trending(pool).await?;

    Ok(())
}

async fn score_sources(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let source_ids = repository::list_source_ids(pool).await?;
    let recent_cutoff = Utc::now() - ChronoDuration::days(RECENT_ACTIVITY_DAYS);
    let mut scored = 0usize;

    for source_id in &source_ids {
        let result = async {
            let stats = repository::source_share_stats(pool, source_id, recent_cutoff).await?;
            let quality = source_quality(stats.share_count, stats.engagement, stats.recent_count);
            repository::update_source_quality(pool, source_id, quality).await
        }
        .await;

        match result {
            Ok(()) => scored += 1,
            Err(error) => {
                tracing::warn!("Source scoring failed for {}: {}", source_id, error);
            }
        }
    }

    tracing::info!("Source scoring pass complete: {} sources", scored);
    Ok(())
}

async fn score_articles(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let rows = repository::list_article_scoring_rows(pool).await?;
    let mut scored = 0usize;

    for row in &rows {
        let result = async {
            let stats = repository::article_share_stats(pool, &row.id).await?;
            let quality = article_quality(row, &stats);
            repository::update_article_quality(pool, &row.id, quality).await
        }
        .await;

        match result {
            Ok(()) => scored += 1,
            Err(error) => {
                tracing::warn!("Article scoring failed for {}: {}", row.id, error);
            }
        }
    }

    tracing::info!("Article scoring pass complete: {} articles", scored);
    Ok(())
}

async fn score_trending(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    let cutoff = now - ChronoDuration::hours(TRENDING_WINDOW_HOURS);
    let candidates = repository::list_trending_candidates(pool, cutoff).await?;
    let mut scored = 0usize;

    for candidate in &candidates {
        let result = async {
            let stats = repository::article_share_stats(pool, &candidate.id).await?;
            let engagement = stats.likes + stats.reposts + stats.replies;
            let age_hours = age_in_hours(candidate.created_at, now);
            let trending = trending_score(engagement, age_hours);
            repository::update_article_trending(pool, &candidate.id, trending).await
        }
        .await;

        match result {
            Ok(()) => scored += 1,
            Err(error) => {
                tracing::warn!("Trending scoring failed for {}: {}", candidate.id, error);
            }
        }
    }

    tracing::info!("Trending scoring pass complete: {} articles", scored);
    Ok(())
}

fn age_in_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - created_at).num_seconds() as f64 / 3600.0
}
