//! Data Models
//! Order, Shipment, ReturnRequest などのデータ構造定義

use serde::{Deserialize, Serialize};
use std::fmt;

// ========================================
// Actor
// ========================================

/// 操作者のロール（status_history の changed_by_role）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ActorRole {
    Seller,
    Customer,
    System,
}

/// 操作者（明示的に引数で渡す。アンビエントな「現在のユーザー」は持たない）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn seller(seller_id: impl Into<String>) -> Self {
        Self { id: seller_id.into(), role: ActorRole::Seller }
    }

    pub fn customer(customer_id: impl Into<String>) -> Self {
        Self { id: customer_id.into(), role: ActorRole::Customer }
    }

    pub fn system() -> Self {
        Self { id: "system".to_string(), role: ActorRole::System }
    }
}

// ========================================
// Order
// ========================================

/// Order ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// 遷移可能なステータス一覧
    pub fn allowed_targets(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Shipped, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered],
            Delivered | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 支払いステータス（paid → refund_pending → refunded の順にしか進まない）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    RefundPending,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::RefundPending => "refund_pending",
            Self::Refunded => "refunded",
        }
    }
}

/// 送料負担者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ShippingPaidBy {
    Seller,
    Customer,
}

/// 配送先住所 (orders.shipping_address の JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: String,
    pub address_2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String { "India".to_string() }

/// 追跡情報 (orders.tracking_info の JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    pub courier_name: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub estimated_delivery: Option<String>,
    pub shipped_at_ms: i64,
}

/// Order (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub order_number: String,
    pub seller_id: String,
    pub customer_id: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub seller_amount: f64,
    pub commission_amount: f64,
    pub shipping_paid_by: ShippingPaidBy,
    pub shipping_cost: f64,
    pub actual_shipping_cost: Option<f64>,
    pub shipping_address: String,     // JSON
    pub tracking_info: Option<String>, // JSON
    pub gateway_order_id: Option<String>,
    pub return_status: Option<String>,
    pub refund_id: Option<String>,
    pub shipped_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub version: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Order {
    pub fn address(&self) -> Option<ShippingAddress> {
        serde_json::from_str(&self.shipping_address).ok()
    }

    pub fn tracking(&self) -> Option<TrackingInfo> {
        self.tracking_info
            .as_ref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

/// Order 明細 (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub order_id: String,
    pub position: i64,
    pub product_id: String,
    pub quantity: i64,
    pub price: f64,
    pub title: String,
    pub sku: Option<String>,
}

/// ステータス履歴 (order / shipment / return 共通の DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub status: String,
    pub timestamp_ms: i64,
    pub changed_by: String,
    pub changed_by_role: ActorRole,
    pub note: Option<String>,
}

/// Order 登録（上流のチェックアウト処理から渡される）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub order_number: String,
    pub seller_id: String,
    pub customer_id: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    #[serde(default = "default_order_status")]
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub seller_amount: f64,
    #[serde(default)]
    pub commission_amount: f64,
    pub shipping_paid_by: ShippingPaidBy,
    #[serde(default)]
    pub shipping_cost: f64,
    pub shipping_address: ShippingAddress,
    pub gateway_order_id: Option<String>,
    pub items: Vec<NewOrderItem>,
}

fn default_order_status() -> OrderStatus { OrderStatus::Pending }

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderItem {
    pub product_id: String,
    pub quantity: i64,
    pub price: f64,
    pub title: String,
    pub sku: Option<String>,
}

/// ステータス更新リクエスト
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
}

/// 手動出荷リクエスト
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipOrderRequest {
    pub courier_name: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub estimated_delivery: Option<String>,
}

/// Order レスポンス（API返却用）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub seller_amount: f64,
    pub commission_amount: f64,
    pub shipping_paid_by: ShippingPaidBy,
    pub shipping_cost: f64,
    pub actual_shipping_cost: Option<f64>,
    pub items: Vec<OrderItem>,
    pub shipping_address: Option<ShippingAddress>,
    pub customer_id: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub tracking_info: Option<TrackingInfo>,
    pub status_history: Vec<HistoryEntry>,
    pub return_status: Option<String>,
    pub refund_id: Option<String>,
    pub shipped_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl OrderResponse {
    pub fn from_order(order: &Order, items: Vec<OrderItem>, status_history: Vec<HistoryEntry>) -> Self {
        Self {
            order_id: order.order_id.clone(),
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            seller_amount: order.seller_amount,
            commission_amount: order.commission_amount,
            shipping_paid_by: order.shipping_paid_by,
            shipping_cost: order.shipping_cost,
            actual_shipping_cost: order.actual_shipping_cost,
            items,
            shipping_address: order.address(),
            customer_id: order.customer_id.clone(),
            customer_email: order.customer_email.clone(),
            customer_phone: order.customer_phone.clone(),
            tracking_info: order.tracking(),
            status_history,
            return_status: order.return_status.clone(),
            refund_id: order.refund_id.clone(),
            shipped_at: order.shipped_at,
            delivered_at: order.delivered_at,
            cancelled_at: order.cancelled_at,
            created_at_ms: order.created_at_ms,
            updated_at_ms: order.updated_at_ms,
        }
    }
}

// ========================================
// Product / Seller
// ========================================

/// Product 在庫 (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: String,
    pub seller_id: String,
    pub title: String,
    pub stock: i64,
    pub order_count: i64,
}

/// Seller の集荷拠点設定 (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Seller {
    pub seller_id: String,
    pub pickup_location: Option<String>,
    pub pickup_pincode: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

// ========================================
// Shipment
// ========================================

/// Shipment ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Created,
    CourierAssigned,
    PickupScheduled,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CourierAssigned => "courier_assigned",
            Self::PickupScheduled => "pickup_scheduled",
            Self::PickedUp => "picked_up",
            Self::InTransit => "in_transit",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// 荷物が既に配送業者の手に渡っているか
    pub fn courier_has_custody(&self) -> bool {
        matches!(
            self,
            Self::PickedUp | Self::InTransit | Self::OutForDelivery | Self::Delivered
        )
    }

    /// 進捗順序（追跡同期で後退させないため）
    pub fn progress(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::CourierAssigned => 1,
            Self::PickupScheduled => 2,
            Self::PickedUp => 3,
            Self::InTransit => 4,
            Self::OutForDelivery => 5,
            Self::Delivered => 6,
            Self::Cancelled => 7,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shipment (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub shipment_id: String,
    pub order_id: String,
    pub seller_id: String,
    pub shiprocket_order_id: Option<String>,
    pub shiprocket_shipment_id: Option<String>,
    pub awb_code: Option<String>,
    pub courier_id: Option<i64>,
    pub courier_name: Option<String>,
    pub pickup_location: Option<String>,
    pub weight_grams: i64,
    pub length_cm: f64,
    pub width_cm: f64,
    pub height_cm: f64,
    pub shipping_charge: Option<f64>,
    pub status: ShipmentStatus,
    pub label_url: Option<String>,
    pub pickup_scheduled_at: Option<i64>,
    pub version: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// 外寸
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

/// Shipment レスポンス（API返却用）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentResponse {
    pub shipment_id: String,
    pub order_id: String,
    pub shiprocket_order_id: Option<String>,
    pub shiprocket_shipment_id: Option<String>,
    pub awb_code: Option<String>,
    pub courier_id: Option<i64>,
    pub courier_name: Option<String>,
    pub pickup_location: Option<String>,
    pub weight: i64,
    pub dimensions: Dimensions,
    pub shipping_charge: Option<f64>,
    pub status: ShipmentStatus,
    pub label_url: Option<String>,
    pub pickup_scheduled_at: Option<i64>,
    pub status_history: Vec<HistoryEntry>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl ShipmentResponse {
    pub fn from_shipment(s: &Shipment, status_history: Vec<HistoryEntry>) -> Self {
        Self {
            shipment_id: s.shipment_id.clone(),
            order_id: s.order_id.clone(),
            shiprocket_order_id: s.shiprocket_order_id.clone(),
            shiprocket_shipment_id: s.shiprocket_shipment_id.clone(),
            awb_code: s.awb_code.clone(),
            courier_id: s.courier_id,
            courier_name: s.courier_name.clone(),
            pickup_location: s.pickup_location.clone(),
            weight: s.weight_grams,
            dimensions: Dimensions {
                length: s.length_cm,
                width: s.width_cm,
                height: s.height_cm,
            },
            shipping_charge: s.shipping_charge,
            status: s.status,
            label_url: s.label_url.clone(),
            pickup_scheduled_at: s.pickup_scheduled_at,
            status_history,
            created_at_ms: s.created_at_ms,
            updated_at_ms: s.updated_at_ms,
        }
    }
}

/// Shipment 作成リクエスト（重さはグラム、寸法は cm）
#[derive(Debug, Default, Deserialize)]
pub struct CreateShipmentRequest {
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

/// 配送業者割当リクエスト
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignCourierRequest {
    pub courier_id: i64,
    pub courier_rate: Option<f64>,
}

/// 配送可否確認リクエスト
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceabilityRequest {
    pub order_id: String,
}

/// 集荷拠点登録リクエスト
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupLocationRequest {
    pub name: String,
    pub contact_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub address_2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
    #[serde(default = "default_country")]
    pub country: String,
}

// ========================================
// ReturnRequest
// ========================================

/// 返品種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReturnType {
    Return,
    Exchange,
}

/// 返品ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReturnStatus {
    Requested,
    Approved,
    Rejected,
    ShippedBack,
    Received,
    Refunded,
    Exchanged,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ShippedBack => "shipped_back",
            Self::Received => "received",
            Self::Refunded => "refunded",
            Self::Exchanged => "exchanged",
        }
    }

    pub fn allowed_targets(&self) -> &'static [ReturnStatus] {
        use ReturnStatus::*;
        match self {
            Requested => &[Approved, Rejected],
            Approved => &[Received, ShippedBack],
            ShippedBack => &[Received],
            Received => &[Refunded, Exchanged],
            Rejected | Refunded | Exchanged => &[],
        }
    }

    pub fn can_transition_to(&self, target: ReturnStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Refunded | Self::Exchanged)
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ReturnRequest (DB row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub return_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub seller_id: String,
    pub return_type: ReturnType,
    pub status: ReturnStatus,
    pub reason: Option<String>,
    pub refund_amount: f64,
    pub refund_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub resolved_at: Option<i64>,
    pub version: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// 返品申請（顧客側フローから渡される）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReturnRequest {
    pub order_id: String,
    pub customer_id: String,
    pub return_type: ReturnType,
    pub reason: Option<String>,
    #[serde(default)]
    pub refund_amount: f64,
}

/// 返品却下リクエスト
#[derive(Debug, Deserialize)]
pub struct RejectReturnRequest {
    pub reason: Option<String>,
}

/// ReturnRequest レスポンス（API返却用）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnResponse {
    pub return_id: String,
    pub order_id: String,
    pub customer_id: String,
    #[serde(rename = "type")]
    pub return_type: ReturnType,
    pub status: ReturnStatus,
    pub reason: Option<String>,
    pub refund_amount: f64,
    pub refund_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub resolved_at: Option<i64>,
    pub status_history: Vec<HistoryEntry>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl ReturnResponse {
    pub fn from_request(r: &ReturnRequest, status_history: Vec<HistoryEntry>) -> Self {
        Self {
            return_id: r.return_id.clone(),
            order_id: r.order_id.clone(),
            customer_id: r.customer_id.clone(),
            return_type: r.return_type,
            status: r.status,
            reason: r.reason.clone(),
            refund_amount: r.refund_amount,
            refund_id: r.refund_id.clone(),
            rejection_reason: r.rejection_reason.clone(),
            resolved_at: r.resolved_at,
            status_history,
            created_at_ms: r.created_at_ms,
            updated_at_ms: r.updated_at_ms,
        }
    }
}
