use axum::{extract::State, http::StatusCode, Json};

use crate::app::AppState;
use crate::auth::require_user;
use crate::error::ApiError;
use taskflow_models::*;

/// A missing subscription is a successful lookup, not a 404.
pub async fn get_subscription(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ApiResponse<Subscription>>, ApiError> {
    let user = require_user(&identity)?;
    let none = || ApiResponse {
        message: "No subscription found".to_string(),
        success: true,
        data: None,
    };

    let Some(ref customer_id) = user.stripe_customer_id else {
        return Ok(Json(none()));
    };
    let subscription = state
        .storage
        .subscription_for_customer(customer_id)
        .map_err(|e| ApiError::from_storage(e, StatusCode::BAD_REQUEST, "Error retrieving subscription"))?;

    Ok(Json(match subscription {
        Some(sub) => ApiResponse::ok("Subscription retrieved", sub),
        None => none(),
    }))
}
