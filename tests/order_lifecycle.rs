mod common;

use common::*;
use seller_portal_api::error::AppError;
use seller_portal_api::events::{DomainEvent, RefundOutcome};
use seller_portal_api::models::{
    Actor, CreateShipmentRequest, OrderStatus, PaymentStatus, ShipOrderRequest, ShipmentStatus,
};
use seller_portal_api::store::{self, HistoryTable};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn confirmed_cannot_jump_to_delivered() {
    let (_dir, db) = test_db().await;
    let (state, _rx) = app_state(&db, &MockShipping::new(), &MockPayments::new());
    let o2 = seed_order(&db, "MP-2002", OrderSeed::default()).await;

    let err = state
        .orders
        .transition(SELLER, &o2.order_id, OrderStatus::Delivered, &Actor::seller(SELLER), None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidTransition { .. }));
    let msg = err.to_string();
    assert!(msg.contains("confirmed") && msg.contains("delivered"));

    let after = order(&db, &o2.order_id).await;
    assert_eq!(after.status, OrderStatus::Confirmed);
    assert_eq!(history(&db, HistoryTable::Order, &o2.order_id).await.len(), 1);
}

#[tokio::test]
async fn every_transition_appends_one_history_entry() {
    let (_dir, db) = test_db().await;
    let (state, _rx) = app_state(&db, &MockShipping::new(), &MockPayments::new());
    let o = seed_order(&db, "MP-1000", OrderSeed { status: OrderStatus::Pending, ..Default::default() }).await;
    let actor = Actor::seller(SELLER);

    for target in [OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
        let updated = state
            .orders
            .transition(SELLER, &o.order_id, target, &actor, Some("step"))
            .await
            .unwrap();
        assert_eq!(updated.status, target);

        let entries = history(&db, HistoryTable::Order, &o.order_id).await;
        assert_eq!(entries.last().unwrap().status, target.as_str());
    }

    let entries = history(&db, HistoryTable::Order, &o.order_id).await;
    // 初期状態 + 4 回の遷移
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[1].changed_by, SELLER);

    let delivered = order(&db, &o.order_id).await;
    assert!(delivered.delivered_at.is_some());
    assert!(delivered.shipped_at.is_some());
}

#[tokio::test]
async fn other_sellers_orders_are_not_found() {
    let (_dir, db) = test_db().await;
    let (state, _rx) = app_state(&db, &MockShipping::new(), &MockPayments::new());
    let o = seed_order(&db, "MP-1001", OrderSeed::default()).await;

    let err = state
        .orders
        .transition(OTHER_SELLER, &o.order_id, OrderStatus::Cancelled, &Actor::seller(OTHER_SELLER), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound("Order")));
    assert_eq!(order(&db, &o.order_id).await.status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn cancel_is_blocked_once_the_courier_has_the_package() {
    let (_dir, db) = test_db().await;
    seed_products(&db).await;
    register_pickup(&db).await;
    let shipping = MockShipping::new();
    let (state, _rx) = app_state(&db, &shipping, &MockPayments::new());
    let o = seed_order(&db, "MP-1002", OrderSeed::default()).await;

    state
        .shipments
        .create_shipment(SELLER, &o.order_id, &CreateShipmentRequest::default(), &Actor::seller(SELLER))
        .await
        .unwrap();

    for status in [ShipmentStatus::PickedUp, ShipmentStatus::InTransit, ShipmentStatus::OutForDelivery] {
        force_shipment_status(&db, &o.order_id, status).await;
        let err = state
            .orders
            .transition(SELLER, &o.order_id, OrderStatus::Cancelled, &Actor::seller(SELLER), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CancellationBlocked(s) if s == status));
        assert_eq!(order(&db, &o.order_id).await.status, OrderStatus::Processing);
    }

    assert_eq!(product(&db, "P1").await.stock, 5);
    assert_eq!(MockShipping::count(&shipping.cancel_calls), 0);
}

#[tokio::test]
async fn cancel_restores_stock_once_and_refunds() {
    let (_dir, db) = test_db().await;
    seed_products(&db).await;
    let payments = MockPayments::new();
    *payments.order_amount.lock().unwrap() = Some(400.0);
    let (state, mut rx) = app_state(&db, &MockShipping::new(), &payments);
    let o = seed_order(&db, "MP-1003", OrderSeed::default()).await;

    let cancelled = state
        .orders
        .transition(SELLER, &o.order_id, OrderStatus::Cancelled, &Actor::seller(SELLER), Some("Customer request"))
        .await
        .unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    let refund_id = cancelled.refund_id.clone().unwrap();
    assert!(refund_id.starts_with("RF_"));

    // ゲートウェイの金額を上限に返金
    let attempts = payments.refund_attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].amount, 400.0);
    assert_eq!(attempts[0].gateway_order_id, "cf_order_1");

    let p1 = product(&db, "P1").await;
    let p2 = product(&db, "P2").await;
    assert_eq!((p1.stock, p1.order_count), (7, 1));
    assert_eq!((p2.stock, p2.order_count), (2, 0));

    // 2 回目は遷移できず、在庫も変わらない
    let err = state
        .orders
        .transition(SELLER, &o.order_id, OrderStatus::Cancelled, &Actor::seller(SELLER), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
    assert_eq!(product(&db, "P1").await.stock, 7);
    assert_eq!(payments.refund_attempts().len(), 1);

    let events = drain_events(&db, &mut rx).await;
    assert!(events.iter().any(|e| matches!(
        e,
        DomainEvent::OrderCancelled { refund: RefundOutcome::Refunded { amount, .. }, .. } if *amount == 400.0
    )));
    let notified: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND kind = 'order_cancelled'")
        .bind(CUSTOMER)
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(notified, 1);
}

#[tokio::test]
async fn refund_failure_keeps_the_cancellation_and_marks_refund_pending() {
    let (_dir, db) = test_db().await;
    seed_products(&db).await;
    let payments = MockPayments::failing();
    let (state, mut rx) = app_state(&db, &MockShipping::new(), &payments);
    let o = seed_order(&db, "MP-1004", OrderSeed::default()).await;

    let cancelled = state
        .orders
        .transition(SELLER, &o.order_id, OrderStatus::Cancelled, &Actor::seller(SELLER), None)
        .await
        .unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::RefundPending);
    assert!(cancelled.refund_id.is_none());

    let events = drain_events(&db, &mut rx).await;
    assert!(events.iter().any(|e| matches!(e, DomainEvent::RefundFailed { .. })));
    let seller_alerts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND kind = 'refund_failed'")
        .bind(SELLER)
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(seller_alerts, 1);
}

#[tokio::test]
async fn gateway_lookup_failure_refunds_the_order_total() {
    let (_dir, db) = test_db().await;
    seed_products(&db).await;
    let payments = MockPayments::new();
    *payments.order_amount.lock().unwrap() = None;
    let (state, _rx) = app_state(&db, &MockShipping::new(), &payments);
    let o = seed_order(&db, "MP-1005", OrderSeed::default()).await;

    state
        .orders
        .transition(SELLER, &o.order_id, OrderStatus::Cancelled, &Actor::seller(SELLER), None)
        .await
        .unwrap();

    assert_eq!(payments.refund_attempts()[0].amount, 500.0);
}

#[tokio::test]
async fn unpaid_cancellation_skips_refund_and_keeps_order_count() {
    let (_dir, db) = test_db().await;
    seed_products(&db).await;
    let payments = MockPayments::new();
    let (state, _rx) = app_state(&db, &MockShipping::new(), &payments);
    let o = seed_order(
        &db,
        "MP-1006",
        OrderSeed { status: OrderStatus::Pending, payment_status: PaymentStatus::Pending, ..Default::default() },
    )
    .await;

    let cancelled = state
        .orders
        .transition(SELLER, &o.order_id, OrderStatus::Cancelled, &Actor::seller(SELLER), None)
        .await
        .unwrap();

    assert_eq!(cancelled.payment_status, PaymentStatus::Pending);
    assert!(payments.refund_attempts().is_empty());
    let p1 = product(&db, "P1").await;
    assert_eq!((p1.stock, p1.order_count), (7, 3));
}

#[tokio::test]
async fn cancel_cancels_the_booked_shipment_even_if_the_provider_fails() {
    let (_dir, db) = test_db().await;
    seed_products(&db).await;
    register_pickup(&db).await;
    let shipping = MockShipping::new();
    shipping.fail_cancel.store(true, Ordering::SeqCst);
    let (state, _rx) = app_state(&db, &shipping, &MockPayments::new());
    let o = seed_order(&db, "MP-1007", OrderSeed::default()).await;

    let created = state
        .shipments
        .create_shipment(SELLER, &o.order_id, &CreateShipmentRequest::default(), &Actor::seller(SELLER))
        .await
        .unwrap();

    let cancelled = state
        .orders
        .transition(SELLER, &o.order_id, OrderStatus::Cancelled, &Actor::seller(SELLER), None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(MockShipping::count(&shipping.cancel_calls), 1);

    let shipment = store::fetch_shipment(&db, &created.shipment.shipment_id).await.unwrap().unwrap();
    assert_eq!(shipment.status, ShipmentStatus::Cancelled);
    let entries = history(&db, HistoryTable::Shipment, &shipment.shipment_id).await;
    assert_eq!(entries.last().unwrap().status, "cancelled");
}

#[tokio::test]
async fn stock_restore_is_idempotent_per_order() {
    let (_dir, db) = test_db().await;
    seed_products(&db).await;
    let o = seed_order(&db, "MP-1008", OrderSeed::default()).await;
    let items = store::fetch_order_items(&db, &o.order_id).await.unwrap();

    for _ in 0..2 {
        let mut tx = db.begin().await.unwrap();
        store::restore_stock(&mut tx, &o, &items, store::now_ms()).await.unwrap();
        tx.commit().await.unwrap();
    }

    let p1 = product(&db, "P1").await;
    assert_eq!((p1.stock, p1.order_count), (7, 1));
}

#[tokio::test]
async fn manual_ship_records_tracking_info() {
    let (_dir, db) = test_db().await;
    let (state, _rx) = app_state(&db, &MockShipping::new(), &MockPayments::new());
    let o = seed_order(&db, "MP-1009", OrderSeed::default()).await;

    let req = ShipOrderRequest {
        courier_name: "Delhivery".to_string(),
        tracking_number: "DL123".to_string(),
        tracking_url: None,
        estimated_delivery: Some("2026-10-25".to_string()),
    };
    let shipped = state
        .orders
        .ship(SELLER, &o.order_id, &req, &Actor::seller(SELLER))
        .await
        .unwrap();

    assert_eq!(shipped.status, OrderStatus::Shipped);
    let tracking = shipped.tracking().unwrap();
    assert_eq!(tracking.courier_name, "Delhivery");
    assert_eq!(tracking.tracking_number, "DL123");

    let empty = ShipOrderRequest {
        courier_name: " ".to_string(),
        tracking_number: "X".to_string(),
        tracking_url: None,
        estimated_delivery: None,
    };
    let err = state.orders.ship(SELLER, &o.order_id, &empty, &Actor::seller(SELLER)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
