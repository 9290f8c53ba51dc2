use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::audit::Actor;
use crate::error::ApiError;
use crate::member::model::MemberId;
use crate::store::AppState;

/// Header carrying the authenticated member id, set by the fronting proxy.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Who is making the request. Requests without a trusted actor header are
/// self-service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingMember(pub Actor);

impl FromRequestParts<AppState> for ActingMember {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let actor = extract_actor(parts, state.config.trust_proxy_headers)?;
        Ok(Self(actor.map_or(Actor::SelfService, Actor::from_id)))
    }
}

/// Read the actor header. It is ignored unless the deployment sits behind a
/// proxy that strips it from client requests.
fn extract_actor(parts: &Parts, trust_proxy: bool) -> Result<Option<MemberId>, ApiError> {
    if !trust_proxy {
        return Ok(None);
    }
    let Some(value) = parts.headers.get(ACTOR_HEADER) else {
        return Ok(None);
    };
    let id = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<MemberId>().ok())
        .filter(|id| *id >= 0)
        .ok_or_else(|| ApiError::BadRequest(format!("malformed {ACTOR_HEADER} header")))?;
    Ok(Some(id))
}
