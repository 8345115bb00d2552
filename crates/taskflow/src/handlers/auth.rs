use axum::Json;

use crate::auth::require_user;
use crate::error::ApiError;
use taskflow_models::*;

pub async fn me(identity: Identity) -> Result<Json<ApiResponse<SessionUser>>, ApiError> {
    let user = require_user(&identity)?;
    Ok(Json(ApiResponse::ok("User retrieved", user.clone())))
}
