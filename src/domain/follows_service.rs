use crate::domain::models::{RefreshConfig, User};
use crate::infrastructure::atproto::{AtprotoClient, AtprotoError};
use crate::infrastructure::repository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Upstream page size for follows traversal.
const PAGE_LIMIT: i64 = 100;

#[derive(Error, Debug)]
pub enum FollowsError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Upstream error: {0}")]
    UpstreamError(#[from] AtprotoError),
}

/// Whether a subscriber's follow set is due for re-import.
pub fn should_refresh(user: &User, config: &RefreshConfig, now: DateTime<Utc>) -> bool {
    match user.follows_last_refreshed {
        None => true,
        Some(refreshed_at) => now - refreshed_at > chrono_interval(config),
    }
}

fn chrono_interval(config: &RefreshConfig) -> ChronoDuration {
    ChronoDuration::from_std(config.refresh_interval)
        .unwrap_or_else(|_| ChronoDuration::hours(24))
}

/// Import every account `user` follows into the tracked-source set and the
/// subscription table.
///
/// Pages through the upstream endpoint until the cursor runs out or a page
/// comes back short. `follows_last_refreshed` is only advanced after the
/// whole traversal succeeds; a failed page leaves the old timestamp so the
/// next batch retries this subscriber.
pub async fn import_follows(
    pool: &SqlitePool,
    client: &AtprotoClient,
    user: &User,
    config: &RefreshConfig,
) -> Result<usize, FollowsError> {
    tracing::info!("Importing follows for {} ({})", user.handle, user.did);

    let mut cursor: Option<String> = None;
    let mut imported = 0usize;

    loop {
        let page = client
            .get_follows(&user.did, PAGE_LIMIT, cursor.as_deref())
            .await?;
        let page_len = page.follows.len();

        for follow in page.follows {
            let source = repository::upsert_source(
                pool,
                &follow.did,
                &follow.handle,
                follow.display_name.as_deref(),
                follow.avatar.as_deref(),
            )
            .await?;
            repository::upsert_user_source(pool, &user.id, &source.id).await?;
            imported += 1;
        }

        cursor = page.cursor.filter(|c| !c.is_empty());
        if cursor.is_none() || (page_len as i64) < PAGE_LIMIT {
            break;
        }

        tokio::time::sleep(config.rate_limit_delay).await;
    }

    repository::set_follows_refreshed(pool, &user.id, Utc::now()).await?;
    tracing::info!("Imported {} follows for {}", imported, user.handle);

    Ok(imported)
}

/// Refresh the follow sets of up to `batch_size` due subscribers,
/// sequentially. One subscriber failing never stops the rest of the batch.
/// Returns how many subscribers completed a full traversal.
pub async fn refresh_batch(
    pool: &SqlitePool,
    client: &AtprotoClient,
    config: &RefreshConfig,
    token: &CancellationToken,
) -> Result<usize, FollowsError> {
    let cutoff = Utc::now() - chrono_interval(config);
    let users = repository::list_refresh_due_users(pool, cutoff, config.batch_size).await?;

    if users.is_empty() {
        tracing::debug!("No subscribers due for follows refresh");
        return Ok(0);
    }

    tracing::info!("Refreshing follows for {} subscribers", users.len());

    let mut refreshed = 0usize;
    for user in users {
        if token.is_cancelled() {
            break;
        }

        match import_follows(pool, client, &user, config).await {
            Ok(_) => refreshed += 1,
            Err(error) => {
                tracing::warn!("Follows refresh failed for {}: {}", user.handle, error);
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(config.rate_limit_delay) => {}
        }
    }

    Ok(refreshed)
}
