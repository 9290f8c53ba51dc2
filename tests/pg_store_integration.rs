//! Postgres-backed runs of the lifecycle. Need `DATABASE_URL`; run with
//! `cargo test -- --ignored`.

use std::sync::Arc;

use sqlx::PgPool;

use membership::audit::Actor;
use membership::auth::{CredentialStore, PgCredentialStore};
use membership::member::model::{
    AcceptDetailsRequest, AccountLink, MemberPatch, RegisterRequest, SetupDetailsRequest,
    SetupLoginRequest,
};
use membership::member::{EngineSettings, LifecycleEngine, MemberError, MemberQuery, Status};
use membership::notify::LogNotifier;
use membership::store::bootstrap::{self, AdminSeed};
use membership::store::postgres::PgMemberStore;
use membership::store::{MemberStore, StoreError, StoreTx, constraint};

const PASSWORD: &str = "hackspace1";

struct Pg {
    engine: LifecycleEngine,
    query: MemberQuery,
    store: Arc<dyn MemberStore>,
    credentials: Arc<PgCredentialStore>,
    admin: Actor,
}

async fn setup(pool: PgPool) -> Pg {
    bootstrap::seed_reference_data(&pool).await.unwrap();
    let store: Arc<dyn MemberStore> = Arc::new(PgMemberStore::new(pool.clone()));
    let credentials = Arc::new(PgCredentialStore::new(pool));

    let seed = AdminSeed {
        name: "Admin".into(),
        email: "admin@example.org".into(),
        username: "admin".into(),
        password: "adminpass1".into(),
    };
    bootstrap::run(store.as_ref(), credentials.as_ref(), Some(&seed))
        .await
        .unwrap();
    let admin_id = store
        .find_member_by_email("admin@example.org")
        .await
        .unwrap()
        .unwrap()
        .id;

    let engine = LifecycleEngine::new(
        Arc::clone(&store),
        credentials.clone(),
        Arc::new(LogNotifier),
        EngineSettings::default(),
    );
    Pg {
        engine,
        query: MemberQuery::new(Arc::clone(&store)),
        store,
        credentials,
        admin: Actor::Member(admin_id),
    }
}

fn login(name: &str, username: &str) -> SetupLoginRequest {
    SetupLoginRequest {
        name: name.into(),
        username: username.into(),
        email: format!("{}@example.org", name.to_lowercase()),
        password: PASSWORD.into(),
        password_confirm: PASSWORD.into(),
    }
}

async fn register(pg: &Pg, name: &str) -> i64 {
    pg.engine
        .register_member(RegisterRequest {
            email: format!("{}@example.org", name.to_lowercase()),
        })
        .await
        .unwrap()
        .member_id
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn pipeline_on_postgres(pool: PgPool) {
    let pg = setup(pool).await;
    let id = register(&pg, "Ada").await;

    pg.engine.setup_login(id, login("Ada", "ada")).await.unwrap();
    pg.engine
        .setup_details(
            id,
            SetupDetailsRequest {
                address_1: "1 Hack Street".into(),
                address_2: Some("Unit 4".into()),
                address_city: "Nottingham".into(),
                address_postcode: "NG1 1AA".into(),
                contact_number: "0115 496 0000".into(),
            },
        )
        .await
        .unwrap();
    let so = pg
        .engine
        .accept_details(
            id,
            pg.admin,
            AcceptDetailsRequest {
                account: Some(AccountLink::CreateNew),
            },
        )
        .await
        .unwrap();
    assert!(so.payment_ref.is_some());
    let approved = pg.engine.approve_member(id, pg.admin).await.unwrap();
    assert_eq!(approved.pin.len(), 8);

    let member = pg.store.find_member(id).await.unwrap().unwrap();
    assert_eq!(member.status, Status::Current);
    assert_eq!(member.address_2.as_deref(), Some("Unit 4"));
    assert!(member.join_date.is_some());
    assert_eq!(pg.query.history(id).await.unwrap().len(), 5);
    assert!(pg.credentials.check_password("ada", PASSWORD).await.unwrap());

    let summary = pg.query.summary_for_member(id).await.unwrap();
    assert_eq!(summary.groups.len(), 1);
    assert_eq!(summary.groups[0].description, "Current Members");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn username_index_ignores_case(pool: PgPool) {
    let pg = setup(pool).await;
    let first = register(&pg, "Alice").await;
    let second = register(&pg, "Alicia").await;
    pg.engine
        .setup_login(first, login("Alice", "alice"))
        .await
        .unwrap();

    let err = pg
        .engine
        .setup_login(second, login("Alicia", "ALICE"))
        .await
        .unwrap_err();
    assert!(matches!(err, MemberError::Validation(ref e) if e[0].field == "username"));
    assert_eq!(
        pg.store.find_member(second).await.unwrap().unwrap().status,
        Status::Prospective
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn email_index_rejects_duplicate_insert(pool: PgPool) {
    let pg = setup(pool).await;
    register(&pg, "Bob").await;

    let mut tx = pg.store.begin().await.unwrap();
    let err = tx
        .insert_member("BOB@example.org", Status::Prospective)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation(ref c) if c == constraint::MEMBER_EMAIL));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn audit_rows_cannot_be_rewritten(pool: PgPool) {
    let pg = setup(pool.clone()).await;
    register(&pg, "Cy").await;

    let result = sqlx::query("UPDATE status_updates SET to_status = 5")
        .execute(&pool)
        .await;
    assert!(result.is_err());
    let result = sqlx::query("DELETE FROM status_updates").execute(&pool).await;
    assert!(result.is_err());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn dropped_transaction_leaves_nothing(pool: PgPool) {
    let pg = setup(pool).await;
    {
        let mut tx = pg.store.begin().await.unwrap();
        tx.insert_member("ghost@example.org", Status::Prospective)
            .await
            .unwrap();
    }
    assert!(
        pg.store
            .find_member_by_email("ghost@example.org")
            .await
            .unwrap()
            .is_none()
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires postgres"]
async fn address_2_is_kept_or_cleared_explicitly(pool: PgPool) {
    let pg = setup(pool).await;
    let id = register(&pg, "Dee").await;

    let mut tx = pg.store.begin().await.unwrap();
    let patch = MemberPatch {
        address_2: Some(Some("Flat 3".into())),
        ..MemberPatch::default()
    };
    assert!(tx.update_member(id, Status::Prospective, &patch).await.unwrap());
    let untouched = MemberPatch {
        name: Some("Dee".into()),
        ..MemberPatch::default()
    };
    assert!(tx.update_member(id, Status::Prospective, &untouched).await.unwrap());
    tx.commit().await.unwrap();
    let member = pg.store.find_member(id).await.unwrap().unwrap();
    assert_eq!(member.address_2.as_deref(), Some("Flat 3"));

    let mut tx = pg.store.begin().await.unwrap();
    let cleared = MemberPatch {
        address_2: Some(None),
        ..MemberPatch::default()
    };
    assert!(tx.update_member(id, Status::Prospective, &cleared).await.unwrap());
    tx.commit().await.unwrap();
    assert_eq!(pg.store.find_member(id).await.unwrap().unwrap().address_2, None);
}
