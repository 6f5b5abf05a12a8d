//! Seller Portal API
//! マーケットプレイス出品者向けの注文・出荷・返品管理

pub mod adapters;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::adapters::{PaymentGateway, ShippingProvider};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventBus;
use crate::services::{OrderService, ReturnWorkflow, ShipmentService};

// ========================================
// アプリケーション状態
// ========================================

pub struct AppState {
    pub db: DbPool,
    pub orders: OrderService,
    pub shipments: Arc<ShipmentService>,
    pub returns: ReturnWorkflow,
    pub events: EventBus,
}

impl AppState {
    pub fn new(
        db: DbPool,
        shipping: Arc<dyn ShippingProvider>,
        payments: Arc<dyn PaymentGateway>,
        events: EventBus,
        config: &AppConfig,
    ) -> Self {
        let shipments = Arc::new(ShipmentService::new(
            db.clone(),
            shipping,
            events.clone(),
            config.adapter_timeout,
            config.shipment_id_recovery_delay,
        ));
        let orders = OrderService::new(
            db.clone(),
            payments.clone(),
            shipments.clone(),
            events.clone(),
            config.adapter_timeout,
        );
        let returns = ReturnWorkflow::new(db.clone(), payments, events.clone(), config.adapter_timeout);

        Self { db, orders, shipments, returns, events }
    }
}

// ========================================
// ルーター
// ========================================

pub fn build_router(state: Arc<AppState>) -> Router {
    use handlers::{health, orders, returns, shipping};

    Router::new()
        // Health
        .route("/api/health", get(health::health_check))
        // Orders
        .route("/api/orders/:id", get(orders::get_order))
        .route("/api/orders/:id/status", put(orders::update_status))
        .route("/api/orders/:id/ship", put(orders::ship_order))
        // Shipping
        .route("/api/shipping/serviceability", post(shipping::check_serviceability))
        .route(
            "/api/shipping/pickup-locations",
            get(shipping::list_pickup_locations).post(shipping::add_pickup_location),
        )
        .route("/api/shipping/pickup-locations/:name", put(shipping::update_pickup_location))
        .route("/api/shipping/:order_id", get(shipping::get_shipment))
        .route("/api/shipping/:order_id/create", post(shipping::create_shipment))
        .route("/api/shipping/:order_id/assign-courier", post(shipping::assign_courier))
        .route("/api/shipping/:order_id/pickup", post(shipping::schedule_pickup))
        .route("/api/shipping/:order_id/track", get(shipping::track_shipment))
        .route("/api/shipping/:order_id/label", get(shipping::generate_label))
        // Returns
        .route("/api/returns/:id", get(returns::get_return))
        .route("/api/returns/:id/approve", put(returns::approve_return))
        .route("/api/returns/:id/reject", put(returns::reject_return))
        .route("/api/returns/:id/shipped-back", put(returns::mark_shipped_back))
        .route("/api/returns/:id/received", put(returns::mark_received))
        .route("/api/returns/:id/retry-refund", put(returns::retry_refund))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
