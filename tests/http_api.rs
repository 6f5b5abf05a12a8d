mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use seller_portal_api::auth::SELLER_HEADER;
use seller_portal_api::build_router;
use seller_portal_api::db::DbPool;
use seller_portal_api::models::{NewReturnRequest, OrderStatus, ReturnType};

async fn send(app: &Router, method: Method, uri: &str, seller: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(seller) = seller {
        builder = builder.header(SELLER_HEADER, seller);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

async fn app(db: &DbPool) -> Router {
    let (state, _rx) = app_state(db, &MockShipping::new(), &MockPayments::new());
    build_router(state)
}

#[tokio::test]
async fn health_reports_database() {
    let (_dir, db) = test_db().await;
    let app = app(&db).await;

    let (status, body) = send(&app, Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn seller_header_is_required() {
    let (_dir, db) = test_db().await;
    let app = app(&db).await;
    let o = seed_order(&db, "MP-5001", OrderSeed::default()).await;

    let uri = format!("/api/orders/{}", o.order_id);
    let (status, body) = send(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn orders_are_scoped_to_their_seller() {
    let (_dir, db) = test_db().await;
    let app = app(&db).await;
    let o = seed_order(&db, "MP-5002", OrderSeed::default()).await;
    let uri = format!("/api/orders/{}", o.order_id);

    let (status, body) = send(&app, Method::GET, &uri, Some(SELLER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["orderNumber"], "MP-5002");
    assert_eq!(body["order"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["order"]["statusHistory"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, Method::GET, &uri, Some(OTHER_SELLER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn invalid_transition_is_rejected() {
    let (_dir, db) = test_db().await;
    let app = app(&db).await;
    let o = seed_order(&db, "MP-5003", OrderSeed::default()).await;
    let uri = format!("/api/orders/{}/status", o.order_id);

    let (status, body) = send(&app, Method::PUT, &uri, Some(SELLER), Some(json!({ "status": "delivered" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_TRANSITION");

    let (status, body) = send(
        &app,
        Method::PUT,
        &uri,
        Some(SELLER),
        Some(json!({ "status": "processing", "note": "Packing" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "processing");
    let history = body["order"]["statusHistory"].as_array().unwrap();
    assert_eq!(history.last().unwrap()["note"], "Packing");
}

#[tokio::test]
async fn duplicate_shipment_returns_the_existing_one() {
    let (_dir, db) = test_db().await;
    register_pickup(&db).await;
    let app = app(&db).await;
    let o = seed_order(&db, "MP-5004", OrderSeed::default()).await;
    let uri = format!("/api/shipping/{}/create", o.order_id);

    let (status, created) = send(&app, Method::POST, &uri, Some(SELLER), Some(json!({ "weight": 800 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["shipment"]["status"], "created");
    assert_eq!(created["shipment"]["weight"], 800);

    // ボディ無しの再送
    let (status, body) = send(&app, Method::POST, &uri, Some(SELLER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ALREADY_SHIPPED");
    assert_eq!(body["shipment"]["shipmentId"], created["shipment"]["shipmentId"]);
}

#[tokio::test]
async fn return_rejection_without_reason_is_a_validation_error() {
    let (_dir, db) = test_db().await;
    let (state, _rx) = app_state(&db, &MockShipping::new(), &MockPayments::new());
    let app = build_router(state.clone());
    let o = seed_order(
        &db,
        "MP-5005",
        OrderSeed { status: OrderStatus::Delivered, ..Default::default() },
    )
    .await;
    let opened = state
        .returns
        .open(&NewReturnRequest {
            order_id: o.order_id.clone(),
            customer_id: CUSTOMER.to_string(),
            return_type: ReturnType::Return,
            reason: None,
            refund_amount: 120.0,
        })
        .await
        .unwrap();
    let uri = format!("/api/returns/{}/reject", opened.return_id);

    let (status, body) = send(&app, Method::PUT, &uri, Some(SELLER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(&app, Method::PUT, &uri, Some(SELLER), Some(json!({ "reason": "Outside return window" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["returnRequest"]["status"], "rejected");
    assert_eq!(body["returnRequest"]["type"], "return");
}
