use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::error::ApiError;
use crate::member::MemberError;
use crate::member::model::{ForgotPasswordRequest, ResetPasswordRequest};
use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/password/forgot", post(forgot))
        .route("/api/password/reset/{token}", post(reset))
}

/// Always 202 for a well-formed request, so callers cannot probe which
/// addresses are registered. The token reaches the member via the notifier.
/// A member not yet past registration is answered like an unknown address.
async fn forgot(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match state.engine.create_forgot_password(body).await {
        Ok(_) => {}
        Err(MemberError::InvalidStateTransition { member_id, found, .. }) => {
            tracing::info!(member_id, %found, "password reset refused for member status");
        }
        Err(e) => return Err(e.into()),
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    ))
}

async fn reset(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.complete_forgot_password(&token, body).await?;
    Ok(StatusCode::NO_CONTENT)
}
