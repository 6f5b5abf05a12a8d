//! Shipping Provider contract
//! 正規化済みの結果型だけを返す。形式の推測はアダプタ実装側で行う

use async_trait::async_trait;
use serde::Serialize;

use super::AdapterError;
use crate::models::{PickupLocationRequest, ShipmentStatus, ShippingAddress};

/// 配送可否確認の条件
#[derive(Debug, Clone)]
pub struct ServiceabilityQuery {
    pub pickup_pincode: String,
    pub delivery_pincode: String,
    pub weight_kg: f64,
    pub cod: bool,
}

/// 利用可能な配送業者
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourierOption {
    pub courier_id: i64,
    pub courier_name: String,
    pub rate: f64,
    pub estimated_days: Option<i64>,
    pub rating: Option<f64>,
}

/// 出荷依頼の明細
#[derive(Debug, Clone)]
pub struct PayloadItem {
    pub name: String,
    pub sku: String,
    pub units: i64,
    pub selling_price: f64,
}

/// 出荷依頼（重量・寸法はクランプ済み）
#[derive(Debug, Clone)]
pub struct CreateOrderPayload {
    pub order_number: String,
    pub order_date: String,
    pub pickup_location: String,
    pub billing: ShippingAddress,
    pub customer_email: Option<String>,
    pub items: Vec<PayloadItem>,
    pub sub_total: f64,
    pub weight_kg: f64,
    pub length_cm: f64,
    pub width_cm: f64,
    pub height_cm: f64,
}

/// 出荷依頼の結果（shipment id は欠けることがある）
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedOrder {
    pub remote_order_id: String,
    pub remote_shipment_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteOrderDetails {
    pub shipment_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourierAssignment {
    pub awb_code: String,
    pub courier_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickupOutcome {
    Scheduled { scheduled_date: Option<String> },
    /// プロバイダ側で既に集荷手配済み（自動手配を含む）
    AlreadyScheduled,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    pub date: Option<String>,
    pub activity: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub current_status: Option<String>,
    /// プロバイダの状態文字列を ShipmentStatus に対応付けたもの
    pub status: Option<ShipmentStatus>,
    pub tracking_url: Option<String>,
    pub events: Vec<TrackingEvent>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PickupLocation {
    pub name: String,
    pub pincode: Option<String>,
    pub active: bool,
    pub phone_verified: bool,
}

#[async_trait]
pub trait ShippingProvider: Send + Sync {
    async fn check_serviceability(
        &self,
        query: &ServiceabilityQuery,
    ) -> Result<Vec<CourierOption>, AdapterError>;

    async fn create_order(&self, payload: &CreateOrderPayload) -> Result<CreatedOrder, AdapterError>;

    async fn get_order_details(&self, remote_order_id: &str)
        -> Result<RemoteOrderDetails, AdapterError>;

    async fn assign_courier(
        &self,
        remote_shipment_id: &str,
        courier_id: i64,
    ) -> Result<CourierAssignment, AdapterError>;

    async fn schedule_pickup(&self, remote_shipment_id: &str) -> Result<PickupOutcome, AdapterError>;

    async fn track_by_awb(&self, awb_code: &str) -> Result<TrackingSnapshot, AdapterError>;

    async fn generate_label(&self, remote_shipment_id: &str) -> Result<String, AdapterError>;

    async fn cancel_order(&self, remote_order_id: &str) -> Result<(), AdapterError>;

    async fn get_pickup_locations(&self) -> Result<Vec<PickupLocation>, AdapterError>;

    async fn add_pickup_location(&self, location: &PickupLocationRequest) -> Result<(), AdapterError>;

    async fn update_pickup_location(
        &self,
        location: &PickupLocationRequest,
    ) -> Result<(), AdapterError>;

    /// 顧客向け追跡ページの URL
    fn tracking_url(&self, _awb_code: &str) -> Option<String> {
        None
    }
}
