use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::auth::CredentialError;
use crate::member::MemberError;
use crate::store::StoreError;
use crate::validation::FieldError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("missing required fields")]
    Incomplete(Vec<&'static str>),

    #[error("validation error")]
    Validation(Vec<FieldError>),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "unauthorized" }),
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, serde_json::json!({ "error": msg })),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg })),
            Self::Conflict(msg) => (StatusCode::CONFLICT, serde_json::json!({ "error": msg })),
            Self::Incomplete(missing) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": "missing required fields", "missing": missing }),
            ),
            Self::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": "validation error", "fields": errors }),
            ),
            Self::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": msg }),
            ),
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "internal server error" }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(constraint) => {
                Self::Conflict(format!("already exists ({constraint})"))
            }
            other => {
                tracing::error!(error = %other, "store error");
                Self::Internal(other.into())
            }
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        tracing::error!(error = %err, "credential store error");
        Self::ServiceUnavailable("credential store unavailable".into())
    }
}

impl From<MemberError> for ApiError {
    fn from(err: MemberError) -> Self {
        match err {
            MemberError::NotFound(id) => Self::NotFound(format!("member {id}")),
            err @ MemberError::InvalidStateTransition { .. } => Self::Conflict(err.to_string()),
            MemberError::NotAuthorized(msg) => Self::Forbidden(msg),
            MemberError::ActorRequired => Self::Unauthorized,
            MemberError::Incomplete(missing) => Self::Incomplete(missing),
            MemberError::Validation(errors) => Self::Validation(errors),
            MemberError::InvalidToken => Self::BadRequest("invalid or expired token".into()),
            err @ MemberError::Conflict(_) => Self::Conflict(err.to_string()),
            MemberError::Credential(e) => e.into(),
            MemberError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;
    use rstest::rstest;

    use super::*;
    use crate::member::Status;
    use crate::member::error::ExpectedStatus;

    #[rstest]
    #[case(MemberError::NotFound(3), StatusCode::NOT_FOUND)]
    #[case(
        MemberError::InvalidStateTransition {
            member_id: 3,
            expected: ExpectedStatus::Is(Status::PreMember2),
            found: Status::Current,
        },
        StatusCode::CONFLICT
    )]
    #[case(MemberError::NotAuthorized("no".into()), StatusCode::FORBIDDEN)]
    #[case(MemberError::ActorRequired, StatusCode::UNAUTHORIZED)]
    #[case(MemberError::Incomplete(vec!["email"]), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(MemberError::Validation(vec![]), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(MemberError::InvalidToken, StatusCode::BAD_REQUEST)]
    #[case(MemberError::Conflict(3), StatusCode::CONFLICT)]
    #[case(MemberError::Credential(CredentialError::Unavailable), StatusCode::SERVICE_UNAVAILABLE)]
    #[case(
        MemberError::Store(StoreError::Injected("commit")),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    fn member_errors_map_to_status(#[case] err: MemberError, #[case] expected: StatusCode) {
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), expected);
    }
}
