use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use kindred_shared::errors::AppResult;
use kindred_shared::types::auth::AuthUser;
use kindred_shared::types::ApiResponse;

use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LocationBody {
    #[validate(range(min = -90.0, max = 90.0, message = "latitude must be within [-90, 90]"))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "longitude must be within [-180, 180]"))]
    pub longitude: f64,
}

#[derive(Debug, Serialize)]
pub struct LocationUpdated {
    pub profiles_updated: usize,
}

// --- PUT /location ---

pub async fn update_location(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<LocationBody>,
) -> AppResult<Json<ApiResponse<LocationUpdated>>> {
    req.validate()?;

    let profiles_updated = state
        .lifecycle
        .update_location(user.id, req.latitude, req.longitude)
        .await?;

    Ok(Json(ApiResponse::ok(LocationUpdated { profiles_updated })))
}
