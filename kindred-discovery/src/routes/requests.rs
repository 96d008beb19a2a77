use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use kindred_shared::errors::AppResult;
use kindred_shared::types::auth::AuthUser;
use kindred_shared::types::{ApiResponse, Listing};

use crate::models::{Context, RelationshipEdge};
use crate::services::TransitionReceipt;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendRequestBody {
    pub receiver_id: Uuid,
    pub context: Context,
}

// --- POST /requests ---

pub async fn send_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequestBody>,
) -> AppResult<Json<ApiResponse<TransitionReceipt>>> {
    let receipt = state
        .lifecycle
        .send_request(user.id, req.receiver_id, req.context)
        .await?;

    Ok(Json(ApiResponse::ok(receipt)))
}

// --- GET /requests ---

pub async fn list_incoming(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Listing<RelationshipEdge>>>> {
    let incoming = state.lifecycle.list_incoming_requests(user.id).await?;
    Ok(Json(ApiResponse::ok(Listing::new(incoming))))
}

// --- PUT /requests/:id/accept ---

pub async fn accept_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<TransitionReceipt>>> {
    let receipt = state.lifecycle.accept_request(user.id, request_id).await?;
    Ok(Json(ApiResponse::ok(receipt)))
}

// --- PUT /requests/:id/deny ---

pub async fn deny_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<TransitionReceipt>>> {
    let receipt = state.lifecycle.deny_request(user.id, request_id).await?;
    Ok(Json(ApiResponse::ok(receipt)))
}
