#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use seller_portal_api::adapters::{
    AdapterError, CourierAssignment, CourierOption, CreateOrderPayload, CreatedOrder, GatewayOrder,
    PaymentGateway, PickupLocation, PickupOutcome, RefundReceipt, RefundRequest,
    RemoteOrderDetails, ServiceabilityQuery, ShippingProvider, TrackingSnapshot,
};
use seller_portal_api::config::AppConfig;
use seller_portal_api::db::{init_db, DbPool};
use seller_portal_api::events::{dispatch, DomainEvent, EventBus};
use seller_portal_api::models::{
    HistoryEntry, NewOrder, NewOrderItem, Order, OrderStatus, PaymentStatus, PickupLocationRequest,
    Product, ShipmentStatus, ShippingAddress, ShippingPaidBy,
};
use seller_portal_api::store::{self, HistoryTable};
use seller_portal_api::AppState;

pub const SELLER: &str = "S1";
pub const OTHER_SELLER: &str = "S2";
pub const CUSTOMER: &str = "C1";
pub const PICKUP: &str = "Warehouse-1";

// ========================================
// Database
// ========================================

pub async fn test_db() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portal.db");
    let db = init_db(path.to_str().unwrap()).await.unwrap();
    (dir, db)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        adapter_timeout: Duration::from_secs(2),
        shipment_id_recovery_delay: Duration::from_millis(0),
        ..AppConfig::default()
    }
}

pub fn app_state(
    db: &DbPool,
    shipping: &Arc<MockShipping>,
    payments: &Arc<MockPayments>,
) -> (Arc<AppState>, UnboundedReceiver<DomainEvent>) {
    let (events, rx) = EventBus::new();
    let state = AppState::new(db.clone(), shipping.clone(), payments.clone(), events, &test_config());
    (Arc::new(state), rx)
}

/// 溜まったイベントをディスパッチして返す
pub async fn drain_events(db: &DbPool, rx: &mut UnboundedReceiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = rx.try_recv() {
        dispatch(db, &event).await;
        drained.push(event);
    }
    drained
}

// ========================================
// Seed data
// ========================================

pub struct OrderSeed {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub paid_by: ShippingPaidBy,
    pub shipping_cost: f64,
    pub gateway_order_id: Option<&'static str>,
}

impl Default for OrderSeed {
    fn default() -> Self {
        Self {
            status: OrderStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            paid_by: ShippingPaidBy::Seller,
            shipping_cost: 0.0,
            gateway_order_id: Some("cf_order_1"),
        }
    }
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        name: "Ravi Kumar".to_string(),
        phone: "9876543210".to_string(),
        email: Some("ravi@example.com".to_string()),
        address: "44 Lake View Road".to_string(),
        address_2: None,
        city: "Bengaluru".to_string(),
        state: "Karnataka".to_string(),
        pincode: "560001".to_string(),
        country: "India".to_string(),
    }
}

pub async fn seed_products(db: &DbPool) {
    for (id, stock, order_count) in [("P1", 5, 3), ("P2", 1, 1)] {
        store::upsert_product(
            db,
            &Product {
                product_id: id.to_string(),
                seller_id: SELLER.to_string(),
                title: format!("Product {}", id),
                stock,
                order_count,
            },
        )
        .await
        .unwrap();
    }
}

/// P1 x2 (150) + P2 x1 (200) = 500
pub async fn seed_order(db: &DbPool, order_number: &str, seed: OrderSeed) -> Order {
    let new = NewOrder {
        order_number: order_number.to_string(),
        seller_id: SELLER.to_string(),
        customer_id: CUSTOMER.to_string(),
        customer_email: Some("ravi@example.com".to_string()),
        customer_phone: Some("9876543210".to_string()),
        status: seed.status,
        payment_status: seed.payment_status,
        total_amount: 500.0,
        seller_amount: 450.0,
        commission_amount: 50.0,
        shipping_paid_by: seed.paid_by,
        shipping_cost: seed.shipping_cost,
        shipping_address: address(),
        gateway_order_id: seed.gateway_order_id.map(str::to_string),
        items: vec![
            NewOrderItem {
                product_id: "P1".to_string(),
                quantity: 2,
                price: 150.0,
                title: "Handloom Scarf".to_string(),
                sku: Some("SCARF-01".to_string()),
            },
            NewOrderItem {
                product_id: "P2".to_string(),
                quantity: 1,
                price: 200.0,
                title: "Brass Lamp".to_string(),
                sku: None,
            },
        ],
    };
    store::insert_order(db, &new).await.unwrap()
}

pub async fn register_pickup(db: &DbPool) {
    store::upsert_seller_pickup(db, SELLER, PICKUP, Some("411001")).await.unwrap();
}

pub async fn product(db: &DbPool, product_id: &str) -> Product {
    store::fetch_product(db, product_id).await.unwrap().unwrap()
}

pub async fn order(db: &DbPool, order_id: &str) -> Order {
    store::fetch_order(db, SELLER, order_id).await.unwrap()
}

pub async fn history(db: &DbPool, table: HistoryTable, id: &str) -> Vec<HistoryEntry> {
    store::load_history(db, table, id).await.unwrap()
}

pub async fn force_shipment_status(db: &DbPool, order_id: &str, status: ShipmentStatus) {
    sqlx::query("UPDATE shipments SET status = ?, version = version + 1 WHERE order_id = ? AND status != 'cancelled'")
        .bind(status)
        .bind(order_id)
        .execute(db)
        .await
        .unwrap();
}

pub fn pickup_request() -> PickupLocationRequest {
    PickupLocationRequest {
        name: PICKUP.to_string(),
        contact_name: "Asha".to_string(),
        email: "asha@example.com".to_string(),
        phone: "9876543210".to_string(),
        address: "12 Market Road, Sector 4".to_string(),
        address_2: None,
        city: "Pune".to_string(),
        state: "Maharashtra".to_string(),
        pincode: "411001".to_string(),
        country: "India".to_string(),
    }
}

// ========================================
// Mock Shipping Provider
// ========================================

pub struct MockShipping {
    pub created: Mutex<CreatedOrder>,
    pub details: Mutex<RemoteOrderDetails>,
    pub pickup: Mutex<PickupOutcome>,
    pub locations: Mutex<Vec<PickupLocation>>,
    pub couriers: Mutex<Vec<CourierOption>>,
    pub tracking: Mutex<TrackingSnapshot>,
    pub last_payload: Mutex<Option<CreateOrderPayload>>,
    pub fail_create: AtomicBool,
    pub fail_cancel: AtomicBool,
    pub create_calls: AtomicUsize,
    pub details_calls: AtomicUsize,
    pub assign_calls: AtomicUsize,
    pub pickup_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl MockShipping {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(CreatedOrder {
                remote_order_id: "SR-1001".to_string(),
                remote_shipment_id: Some("SH-2001".to_string()),
            }),
            details: Mutex::new(RemoteOrderDetails { shipment_ids: vec!["SH-2001".to_string()] }),
            pickup: Mutex::new(PickupOutcome::Scheduled { scheduled_date: Some("2026-10-20".to_string()) }),
            locations: Mutex::new(vec![PickupLocation {
                name: PICKUP.to_string(),
                pincode: Some("411001".to_string()),
                active: true,
                phone_verified: true,
            }]),
            couriers: Mutex::new(Vec::new()),
            tracking: Mutex::new(TrackingSnapshot {
                current_status: Some("PICKED UP".to_string()),
                status: Some(ShipmentStatus::PickedUp),
                tracking_url: None,
                events: Vec::new(),
            }),
            last_payload: Mutex::new(None),
            fail_create: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            details_calls: AtomicUsize::new(0),
            assign_calls: AtomicUsize::new(0),
            pickup_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        })
    }

    /// 作成レスポンスに shipment id が無く、照会でも見つからない状態
    pub fn without_shipment_id(&self) {
        self.created.lock().unwrap().remote_shipment_id = None;
        self.details.lock().unwrap().shipment_ids.clear();
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShippingProvider for MockShipping {
    async fn check_serviceability(&self, _query: &ServiceabilityQuery) -> Result<Vec<CourierOption>, AdapterError> {
        Ok(self.couriers.lock().unwrap().clone())
    }

    async fn create_order(&self, payload: &CreateOrderPayload) -> Result<CreatedOrder, AdapterError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_payload.lock().unwrap() = Some(payload.clone());
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AdapterError::Remote { status: 422, message: "pickup address rejected".to_string() });
        }
        Ok(self.created.lock().unwrap().clone())
    }

    async fn get_order_details(&self, _remote_order_id: &str) -> Result<RemoteOrderDetails, AdapterError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.details.lock().unwrap().clone())
    }

    async fn assign_courier(&self, _remote_shipment_id: &str, courier_id: i64) -> Result<CourierAssignment, AdapterError> {
        self.assign_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CourierAssignment {
            awb_code: "AWB123456".to_string(),
            courier_name: format!("Courier {}", courier_id),
        })
    }

    async fn schedule_pickup(&self, _remote_shipment_id: &str) -> Result<PickupOutcome, AdapterError> {
        self.pickup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pickup.lock().unwrap().clone())
    }

    async fn track_by_awb(&self, _awb_code: &str) -> Result<TrackingSnapshot, AdapterError> {
        Ok(self.tracking.lock().unwrap().clone())
    }

    async fn generate_label(&self, remote_shipment_id: &str) -> Result<String, AdapterError> {
        Ok(format!("https://labels.test/{}.pdf", remote_shipment_id))
    }

    async fn cancel_order(&self, _remote_order_id: &str) -> Result<(), AdapterError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(AdapterError::Remote { status: 500, message: "provider down".to_string() });
        }
        Ok(())
    }

    async fn get_pickup_locations(&self) -> Result<Vec<PickupLocation>, AdapterError> {
        Ok(self.locations.lock().unwrap().clone())
    }

    async fn add_pickup_location(&self, _location: &PickupLocationRequest) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn update_pickup_location(&self, _location: &PickupLocationRequest) -> Result<(), AdapterError> {
        Ok(())
    }
}

// ========================================
// Mock Payment Gateway
// ========================================

pub struct MockPayments {
    /// None ならゲートウェイ照会を失敗させる
    pub order_amount: Mutex<Option<f64>>,
    pub fail_refund: AtomicBool,
    pub refunds: Mutex<Vec<RefundRequest>>,
}

impl MockPayments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            order_amount: Mutex::new(Some(500.0)),
            fail_refund: AtomicBool::new(false),
            refunds: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        let payments = Self::new();
        payments.fail_refund.store(true, Ordering::SeqCst);
        payments
    }

    pub fn refund_attempts(&self) -> Vec<RefundRequest> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPayments {
    async fn get_order(&self, _gateway_order_id: &str) -> Result<GatewayOrder, AdapterError> {
        match *self.order_amount.lock().unwrap() {
            Some(amount) => Ok(GatewayOrder { order_amount: amount, order_status: Some("PAID".to_string()) }),
            None => Err(AdapterError::Remote { status: 404, message: "order not found".to_string() }),
        }
    }

    async fn create_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, AdapterError> {
        self.refunds.lock().unwrap().push(request.clone());
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(AdapterError::Timeout);
        }
        Ok(RefundReceipt {
            refund_id: request.refund_id.clone(),
            status: Some("PENDING".to_string()),
        })
    }
}
