use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::ActingMember;
use crate::error::ApiError;
use crate::member::Status;
use crate::member::model::{
    AcceptDetailsRequest, ChangePasswordRequest, MemberId, RegisterRequest, RejectDetailsRequest,
    SetupDetailsRequest, SetupLoginRequest,
};
use crate::store::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/members", get(list_members))
        .route("/api/members/register", post(register))
        .route("/api/members/{id}", get(get_member))
        .route("/api/members/{id}/history", get(history))
        .route("/api/members/{id}/login", post(setup_login))
        .route("/api/members/{id}/details", post(setup_details))
        .route("/api/members/{id}/reject", post(reject_details))
        .route("/api/members/{id}/accept", post(accept_details))
        .route("/api/members/{id}/approve", post(approve))
        .route("/api/members/{id}/password", post(change_password))
        .route("/api/accounts", get(list_accounts))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let registration = state.engine.register_member(body).await?;
    let status = if registration.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(registration)))
}

async fn setup_login(
    State(state): State<AppState>,
    Path(id): Path<MemberId>,
    Json(body): Json<SetupLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.setup_login(id, body).await?;
    Ok(Json(state.query.summary_for_member(id).await?))
}

async fn setup_details(
    State(state): State<AppState>,
    Path(id): Path<MemberId>,
    Json(body): Json<SetupDetailsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.setup_details(id, body).await?;
    Ok(Json(state.query.summary_for_member(id).await?))
}

async fn reject_details(
    State(state): State<AppState>,
    ActingMember(actor): ActingMember,
    Path(id): Path<MemberId>,
    Json(body): Json<RejectDetailsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.reject_details(id, actor, body).await?;
    Ok(Json(state.query.summary_for_member(id).await?))
}

async fn accept_details(
    State(state): State<AppState>,
    ActingMember(actor): ActingMember,
    Path(id): Path<MemberId>,
    Json(body): Json<AcceptDetailsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.accept_details(id, actor, body).await?))
}

async fn approve(
    State(state): State<AppState>,
    ActingMember(actor): ActingMember,
    Path(id): Path<MemberId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.approve_member(id, actor).await?))
}

async fn change_password(
    State(state): State<AppState>,
    ActingMember(actor): ActingMember,
    Path(id): Path<MemberId>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.change_password(id, actor, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

async fn list_members(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let members = match params.status.as_deref() {
        Some(raw) => {
            let status: Status = raw
                .parse()
                .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?;
            state.query.summary_for_status(status).await?
        }
        None => state.query.summary_all().await?,
    };
    Ok(Json(members))
}

async fn get_member(
    State(state): State<AppState>,
    Path(id): Path<MemberId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.query.summary_for_member(id).await?))
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<MemberId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.query.history(id).await?))
}

async fn list_accounts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.query.account_list().await?))
}
