use crate::domain::feed_service::{self, FeedServiceError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /feeds/global — the materialised global feed, paginated.
pub async fn global_feed(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Response {
    match feed_service::get_global_feed(&state.db_pool, params.limit, params.offset).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => {
            tracing::error!("Global feed read failed: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /users/{user_id}/feed — the subscriber's filtered view of the
/// global feed. A subscriber with no matching entries gets an empty item
/// list, not an error.
pub async fn personalised_feed(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Response {
    match feed_service::get_personalised_feed(
        &state.db_pool,
        &user_id,
        params.limit,
        params.offset,
    )
    .await
    {
        Ok(response) => Json(response).into_response(),
        Err(FeedServiceError::UserNotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(error) => {
            tracing::error!("Personalised feed read failed for {}: {}", user_id, error);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
