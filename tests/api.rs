//! End-to-end REST flows against the in-memory backend.

#![allow(clippy::panic)]

mod common;

use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use common::TestApp;
use tipmarket_gateway::domain::Role;

async fn body(resp: reqwest::Response) -> Value {
    let Ok(value) = resp.json::<Value>().await else {
        panic!("response is not json");
    };
    value
}

fn decimal(value: &Value) -> Decimal {
    let Ok(d) = serde_json::from_value::<Decimal>(value.clone()) else {
        panic!("not a decimal: {value}");
    };
    d
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::spawn().await;
    let Ok(resp) = app.client.get(app.url("/health")).send().await else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body(resp).await["status"], "healthy");
}

#[tokio::test]
async fn wallet_requires_bearer() {
    let app = TestApp::spawn().await;
    let Ok(resp) = app.client.get(app.url("/api/v1/wallet")).send().await else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body(resp).await["error"]["code"], 4001);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = TestApp::spawn().await;
    app.backend.seed_user("ann@example.com", "secret-1", Role::Buyer);
    let Ok(resp) = app
        .client
        .post(app.url("/api/v1/auth/login"))
        .json(&json!({ "email": "ann@example.com", "password": "nope" }))
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_reports_current_user() {
    let app = TestApp::spawn().await;
    let id = app.backend.seed_user("sam@example.com", "secret-1", Role::Seller);
    let token = app.login("sam@example.com", "secret-1").await;

    let Ok(resp) = app
        .client
        .get(app.url("/api/v1/auth/session"))
        .bearer_auth(&token)
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::OK);
    let session = body(resp).await;
    assert_eq!(session["user"]["id"], json!(id));
    assert_eq!(session["user"]["role"], "seller");
}

#[tokio::test]
async fn wallet_purchase_unlocks_code_once() {
    let app = TestApp::spawn().await;
    let seller = app.backend.seed_user("sel@example.com", "secret-1", Role::Seller);
    let buyer = app.backend.seed_user("buy@example.com", "secret-1", Role::Buyer);
    app.set_balance(buyer, "100");
    let ticket = app.seed_ticket(seller, "25", "BW-777");
    let token = app.login("buy@example.com", "secret-1").await;

    let Ok(resp) = app.client.get(app.url("/api/v1/tickets")).send().await else {
        panic!("request failed");
    };
    let listing = body(resp).await;
    let Some(listed) = listing.as_array().and_then(|a| a.first()) else {
        panic!("ticket not listed: {listing}");
    };
    assert_eq!(listed["ticket_code"], Value::Null);

    let purchase_url = app.url(&format!("/api/v1/tickets/{ticket}/purchase"));
    let Ok(resp) = app.client.post(&purchase_url).bearer_auth(&token).send().await else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome = body(resp).await;
    assert_eq!(outcome["credit_used"], true);
    assert_eq!(outcome["payment_complete"], true);

    let Ok(resp) = app
        .client
        .get(app.url("/api/v1/wallet/balance"))
        .bearer_auth(&token)
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(decimal(&body(resp).await["credit_balance"]), Decimal::from(75));

    let Ok(resp) = app
        .client
        .get(app.url(&format!("/api/v1/tickets/{ticket}")))
        .bearer_auth(&token)
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(body(resp).await["ticket_code"], "BW-777");

    let Ok(resp) = app.client.post(&purchase_url).bearer_auth(&token).send().await else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn seller_cannot_buy_own_ticket() {
    let app = TestApp::spawn().await;
    let seller = app.backend.seed_user("own@example.com", "secret-1", Role::Seller);
    let ticket = app.seed_ticket(seller, "10", "OWN-1");
    let token = app.login("own@example.com", "secret-1").await;

    let Ok(resp) = app
        .client
        .post(app.url(&format!("/api/v1/tickets/{ticket}/purchase")))
        .bearer_auth(&token)
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn admin_routes_reject_buyers() {
    let app = TestApp::spawn().await;
    app.backend.seed_user("plain@example.com", "secret-1", Role::Buyer);
    let token = app.login("plain@example.com", "secret-1").await;

    let Ok(resp) = app
        .client
        .get(app.url("/api/v1/admin/users"))
        .bearer_auth(&token)
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_exports_users_as_csv() {
    let app = TestApp::spawn().await;
    app.backend.seed_user("root@example.com", "secret-1", Role::Admin);
    app.backend.seed_user("someone@example.com", "secret-1", Role::Buyer);
    let token = app.login("root@example.com", "secret-1").await;

    let Ok(resp) = app
        .client
        .get(app.url("/api/v1/admin/users/export"))
        .bearer_auth(&token)
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    assert_eq!(content_type.as_deref(), Some("text/csv; charset=utf-8"));
    let Ok(text) = resp.text().await else {
        panic!("csv body unreadable");
    };
    assert!(text.contains("someone@example.com"));
}

#[tokio::test]
async fn suspension_revokes_live_sessions() {
    let app = TestApp::spawn().await;
    app.backend.seed_user("boss@example.com", "secret-1", Role::Admin);
    let target = app.backend.seed_user("bad@example.com", "secret-1", Role::Buyer);
    let admin = app.login("boss@example.com", "secret-1").await;
    let user = app.login("bad@example.com", "secret-1").await;

    let Ok(resp) = app
        .client
        .put(app.url(&format!("/api/v1/admin/users/{target}/suspension")))
        .bearer_auth(&admin)
        .json(&json!({ "suspended": true }))
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::OK);

    let Ok(resp) = app
        .client
        .get(app.url("/api/v1/wallet"))
        .bearer_auth(&user)
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert!(matches!(
        resp.status(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    ));
}

#[tokio::test]
async fn payment_success_requires_gateway_id() {
    let app = TestApp::spawn().await;
    app.backend.seed_user("pay@example.com", "secret-1", Role::Buyer);
    let token = app.login("pay@example.com", "secret-1").await;
    let reference = uuid::Uuid::new_v4();

    let Ok(resp) = app
        .client
        .get(app.url(&format!("/payment/success?kind=wallet&reference={reference}")))
        .bearer_auth(&token)
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
