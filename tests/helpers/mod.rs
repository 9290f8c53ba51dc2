#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use membership::audit::Actor;
use membership::auth::LocalCredentialStore;
use membership::config::Config;
use membership::member::model::{
    AcceptDetailsRequest, MemberId, RegisterRequest, SetupDetailsRequest, SetupLoginRequest,
};
use membership::member::{EngineSettings, LifecycleEngine, MemberQuery, Status};
use membership::notify::{Notice, NoticeKind, Notifier, NotifyError};
use membership::store::bootstrap::{self, AdminSeed};
use membership::store::memory::MemoryStore;
use membership::store::{AppState, MemberStore};

pub const ADMIN_EMAIL: &str = "admin@example.org";
pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "adminpass1";
pub const PASSWORD: &str = "hackspace1";

/// Keeps every notice it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: NoticeKind) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notice: Notice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

/// An engine over the in-memory stores, with handles on each store so
/// tests can inspect them or inject failures.
pub struct Harness {
    pub engine: Arc<LifecycleEngine>,
    pub query: MemberQuery,
    pub store: MemoryStore,
    pub credentials: Arc<LocalCredentialStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin_id: MemberId,
}

impl Harness {
    pub fn admin(&self) -> Actor {
        Actor::Member(self.admin_id)
    }
}

/// Build a harness with a bootstrapped admin (groups FullAccess,
/// CurrentMembers and MemberAdmin; password [`ADMIN_PASSWORD`]).
pub async fn harness() -> Harness {
    let store = MemoryStore::new();
    let credentials = Arc::new(LocalCredentialStore::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let seed = AdminSeed {
        name: "Admin".into(),
        email: ADMIN_EMAIL.into(),
        username: ADMIN_USERNAME.into(),
        password: ADMIN_PASSWORD.into(),
    };
    bootstrap::run(&store, credentials.as_ref(), Some(&seed))
        .await
        .expect("bootstrap failed");
    let admin_id = store
        .find_member_by_email(ADMIN_EMAIL)
        .await
        .unwrap()
        .expect("admin not created")
        .id;

    let members: Arc<dyn MemberStore> = Arc::new(store.clone());
    let engine = LifecycleEngine::new(
        Arc::clone(&members),
        credentials.clone(),
        notifier.clone(),
        EngineSettings::default(),
    );

    Harness {
        engine: Arc::new(engine),
        query: MemberQuery::new(members),
        store,
        credentials,
        notifier,
        admin_id,
    }
}

pub fn email_for(name: &str) -> String {
    format!("{name}@example.org")
}

pub fn login_request(name: &str) -> SetupLoginRequest {
    SetupLoginRequest {
        name: format!("{name} Member"),
        username: name.into(),
        email: email_for(name),
        password: PASSWORD.into(),
        password_confirm: PASSWORD.into(),
    }
}

pub fn details_request() -> SetupDetailsRequest {
    SetupDetailsRequest {
        address_1: "1 Hack Street".into(),
        address_2: None,
        address_city: "Nottingham".into(),
        address_postcode: "NG1 1AA".into(),
        contact_number: "0115 496 0000".into(),
    }
}

/// Register `name` (which doubles as username) and drive it forward until
/// it reaches `target`. `ExMember` is not reachable through the pipeline.
pub async fn member_at(h: &Harness, name: &str, target: Status) -> MemberId {
    let id = h
        .engine
        .register_member(RegisterRequest {
            email: email_for(name),
        })
        .await
        .expect("register failed")
        .member_id;
    if target >= Status::PreMember1 {
        h.engine
            .setup_login(id, login_request(name))
            .await
            .expect("setup_login failed");
    }
    if target >= Status::PreMember2 {
        h.engine
            .setup_details(id, details_request())
            .await
            .expect("setup_details failed");
    }
    if target >= Status::PreMember3 {
        h.engine
            .accept_details(id, h.admin(), AcceptDetailsRequest::default())
            .await
            .expect("accept_details failed");
    }
    if target >= Status::Current {
        h.engine
            .approve_member(id, h.admin())
            .await
            .expect("approve_member failed");
    }
    id
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

pub fn test_config() -> Config {
    Config {
        listen: "127.0.0.1:0".into(),
        database_url: "postgres://localhost/membership_test".into(),
        credential_database_url: "postgres://localhost/membership_test".into(),
        default_credit_limit: 5000,
        reset_token_ttl_minutes: 120,
        admin_name: "Admin".into(),
        admin_email: None,
        admin_username: None,
        admin_password: None,
        trust_proxy_headers: true,
    }
}

pub fn test_router(h: &Harness) -> Router {
    let state = AppState {
        engine: Arc::clone(&h.engine),
        query: h.query.clone(),
        config: Arc::new(test_config()),
    };
    membership::api::app(state)
}

/// Send a GET request, optionally as `actor`.
pub async fn get_json(app: &Router, actor: Option<MemberId>, path: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(id) = actor {
        builder = builder.header("x-actor-id", id.to_string());
    }
    let req = builder.body(Body::empty()).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a POST request with a JSON body, optionally as `actor`.
pub async fn post_json(
    app: &Router,
    actor: Option<MemberId>,
    path: &str,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json");
    if let Some(id) = actor {
        builder = builder.header("x-actor-id", id.to_string());
    }
    let req = builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Extract JSON body from a response.
async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
