use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

use kindred_shared::errors::{AppError, AppResult};
use kindred_shared::types::auth::AuthUser;
use kindred_shared::types::{ApiResponse, Listing};

use crate::models::{Context, ProfileView};
use crate::AppState;

// --- GET /candidates/:context ---

pub async fn find_candidates(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(context): Path<String>,
) -> AppResult<Json<ApiResponse<Listing<ProfileView>>>> {
    let context: Context = context.parse().map_err(AppError::bad_request)?;

    let candidates = state.discovery.find_candidates(user.id, context).await?;

    Ok(Json(ApiResponse::ok(Listing::new(candidates))))
}
