use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use kindred_shared::errors::AppResult;
use kindred_shared::types::auth::AuthUser;
use kindred_shared::types::{ApiResponse, Listing};

use crate::services::lifecycle::MatchSummary;
use crate::services::TransitionReceipt;
use crate::AppState;

// --- GET /matches ---

pub async fn list_matches(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Listing<MatchSummary>>>> {
    let matches = state.lifecycle.list_matches(user.id).await?;
    Ok(Json(ApiResponse::ok(Listing::new(matches))))
}

// --- POST /matches/:other_id/unmatch ---

pub async fn unmatch(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(other_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<TransitionReceipt>>> {
    let receipt = state.lifecycle.unmatch(user.id, other_id).await?;
    Ok(Json(ApiResponse::ok(receipt)))
}
