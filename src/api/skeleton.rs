use crate::api::feeds::AppState;
use crate::domain::feed_service;
use crate::infrastructure::repository;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

/// Service DID announced by the feed generator descriptor.
const FEED_GENERATOR_DID: &str = "did:web:newsflux.example";

const DEFAULT_SKELETON_LIMIT: i64 = 50;
const MAX_SKELETON_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct SkeletonParams {
    #[allow(dead_code)]
    pub feed: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SkeletonResponse {
    pub feed: Vec<SkeletonItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SkeletonItem {
    pub post: String,
}

/// GET /xrpc/app.bsky.feed.getFeedSkeleton
///
/// Second wire format over the same materialised feed: entries are reduced
/// to the at:// URI of the post that first shared each article. The cursor
/// is a plain numeric offset.
pub async fn get_feed_skeleton(
    State(state): State<AppState>,
    Query(params): Query<SkeletonParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SKELETON_LIMIT)
        .clamp(1, MAX_SKELETON_LIMIT);
    let offset = params
        .cursor
        .as_deref()
        .and_then(|cursor| cursor.parse::<i64>().ok())
        .unwrap_or(0)
        .max(0);

    let page =
        match feed_service::get_global_feed(&state.db_pool, Some(limit), Some(offset)).await {
            Ok(page) => page,
            Err(error) => {
                tracing::error!("Feed skeleton read failed: {}", error);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    let mut feed = Vec::with_capacity(page.items.len());
    for entry in &page.items {
        match repository::first_share_for_article(&state.db_pool, &entry.article.id).await {
            Ok(Some(share)) => feed.push(SkeletonItem {
                post: share.post_uri,
            }),
            // An article with no surviving share has no post to point at.
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    "Share lookup failed for article {}: {}",
                    entry.article.id,
                    error
                );
            }
        }
    }

    let cursor = if page.meta.count == limit {
        Some((offset + limit).to_string())
    } else {
        None
    };

    Json(SkeletonResponse { feed, cursor }).into_response()
}

#[derive(Debug, Serialize)]
pub struct FeedGeneratorDescriptor {
    pub did: String,
    pub feeds: Vec<FeedDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct FeedDescriptor {
    pub uri: String,
}

/// GET /xrpc/app.bsky.feed.describeFeedGenerator
pub async fn describe_feed_generator() -> Json<FeedGeneratorDescriptor> {
    Json(FeedGeneratorDescriptor {
        did: FEED_GENERATOR_DID.to_string(),
        feeds: vec![FeedDescriptor {
            uri: format!(
                "at://{}/app.bsky.feed.generator/top-stories",
                FEED_GENERATOR_DID
            ),
        }],
    })
}
