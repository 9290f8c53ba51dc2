mod helpers;

use axum::http::StatusCode;
use serde_json::json;

use helpers::{PASSWORD, email_for, get_json, harness, member_at, post_json, test_router};
use membership::member::Status;

fn login_body(name: &str) -> serde_json::Value {
    json!({
        "name": format!("{name} Member"),
        "username": name,
        "email": email_for(name),
        "password": PASSWORD,
        "password_confirm": PASSWORD,
    })
}

#[tokio::test]
async fn healthz_ok() {
    let h = harness().await;
    let app = test_router(&h);
    let (status, _) = get_json(&app, None, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn register_returns_created_then_ok() {
    let h = harness().await;
    let app = test_router(&h);

    let (status, body) = post_json(
        &app,
        None,
        "/api/members/register",
        json!({ "email": "ada@example.org" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "prospective");
    let id = body["member_id"].as_i64().unwrap();

    let (status, body) = post_json(
        &app,
        None,
        "/api/members/register",
        json!({ "email": "ADA@example.org" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["member_id"].as_i64().unwrap(), id);
}

#[tokio::test]
async fn missing_fields_are_unprocessable() {
    let h = harness().await;
    let app = test_router(&h);
    let id = member_at(&h, "bea", Status::Prospective).await;

    let (status, body) = post_json(
        &app,
        None,
        &format!("/api/members/{id}/login"),
        json!({ "name": "Bea" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["missing"],
        json!(["username", "email", "password", "password_confirm"])
    );
}

#[tokio::test]
async fn pipeline_over_http() {
    let h = harness().await;
    let app = test_router(&h);
    let admin = Some(h.admin_id);
    let id = member_at(&h, "cal", Status::Prospective).await;

    let (status, body) =
        post_json(&app, None, &format!("/api/members/{id}/login"), login_body("cal")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"]["id"], 2);

    let (status, body) = post_json(
        &app,
        None,
        &format!("/api/members/{id}/details"),
        json!({
            "address_1": "1 Hack Street",
            "address_city": "Nottingham",
            "address_postcode": "NG1 1AA",
            "contact_number": "0115 496 0000",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = post_json(
        &app,
        admin,
        &format!("/api/members/{id}/accept"),
        json!({ "account": "create_new" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["payment_ref"].as_str().unwrap().starts_with("HMS"));

    let (status, body) = post_json(&app, admin, &format!("/api/members/{id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["pin"].as_str().unwrap().len(), 8);

    let (status, body) = get_json(&app, None, &format!("/api/members/{id}/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 5);
    assert_eq!(body[4]["to_status"], "current");

    let (status, body) = get_json(&app, None, "/api/members?status=current").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = get_json(&app, None, "/api/accounts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["members"], "cal Member");
}

#[tokio::test]
async fn admin_actions_need_actor_header() {
    let h = harness().await;
    let app = test_router(&h);
    let id = member_at(&h, "dan", Status::PreMember3).await;
    let outsider = member_at(&h, "eva", Status::Current).await;

    let (status, _) = post_json(&app, None, &format!("/api/members/{id}/approve"), json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_json(
        &app,
        Some(outsider),
        &format!("/api/members/{id}/approve"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn wrong_status_is_conflict() {
    let h = harness().await;
    let app = test_router(&h);
    let id = member_at(&h, "fox", Status::Current).await;

    let (status, body) = post_json(
        &app,
        Some(h.admin_id),
        &format!("/api/members/{id}/approve"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("current"));
}

#[tokio::test]
async fn unknown_member_and_bad_filter() {
    let h = harness().await;
    let app = test_router(&h);

    let (status, _) = get_json(&app, None, "/api/members/424242").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, None, "/api/members?status=lapsed").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn forgot_password_does_not_reveal_membership() {
    let h = harness().await;
    let app = test_router(&h);
    member_at(&h, "gia", Status::PreMember1).await;
    member_at(&h, "gus", Status::Prospective).await;

    let (known, _) = post_json(
        &app,
        None,
        "/api/password/forgot",
        json!({ "email": email_for("gia") }),
    )
    .await;
    let (unknown, _) = post_json(
        &app,
        None,
        "/api/password/forgot",
        json!({ "email": "nobody@example.org" }),
    )
    .await;
    let (prospective, body) = post_json(
        &app,
        None,
        "/api/password/forgot",
        json!({ "email": email_for("gus") }),
    )
    .await;
    assert_eq!(known, StatusCode::ACCEPTED);
    assert_eq!(unknown, StatusCode::ACCEPTED);
    assert_eq!(prospective, StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "status": "accepted" }));

    let (status, _) = post_json(
        &app,
        None,
        "/api/password/reset/mbr_reset_nothex",
        json!({
            "email": email_for("gia"),
            "new_password": "fresh-pass",
            "new_password_confirm": "fresh-pass",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn change_password_over_http() {
    let h = harness().await;
    let app = test_router(&h);
    let id = member_at(&h, "hal", Status::PreMember1).await;

    let (status, _) = post_json(
        &app,
        Some(id),
        &format!("/api/members/{id}/password"),
        json!({
            "current_password": PASSWORD,
            "new_password": "fresh-pass",
            "new_password_confirm": "fresh-pass",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn malformed_actor_header_is_bad_request() {
    let h = harness().await;
    let app = test_router(&h);
    let id = member_at(&h, "ian", Status::PreMember3).await;

    let req = axum::http::Request::builder()
        .method("POST")
        .uri(format!("/api/members/{id}/approve"))
        .header("x-actor-id", "admin")
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = tower::ServiceExt::oneshot(app, req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
