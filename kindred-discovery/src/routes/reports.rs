use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use kindred_shared::errors::AppResult;
use kindred_shared::types::auth::AuthUser;
use kindred_shared::types::ApiResponse;

use crate::services::lifecycle::ReportReceipt;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReportBody {
    pub reported_id: Uuid,
}

// --- POST /reports ---

pub async fn report_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReportBody>,
) -> AppResult<Json<ApiResponse<ReportReceipt>>> {
    let receipt = state.lifecycle.report(user.id, req.reported_id).await?;
    Ok(Json(ApiResponse::ok(receipt)))
}
