//! Shipping API Handlers
//! /api/shipping エンドポイント - Shiprocket 出荷・集荷・追跡

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::adapters::{CourierOption, TrackingSnapshot};
use crate::auth::SellerIdentity;
use crate::error::AppResult;
use crate::models::{
    AssignCourierRequest, CreateShipmentRequest, PickupLocationRequest, ServiceabilityRequest,
    ShipmentResponse,
};
use crate::services::PickupLocations;
use crate::store;
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct ShipmentDetailResponse {
    pub success: bool,
    pub shipment: ShipmentResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceabilityResponse {
    pub success: bool,
    pub couriers: Vec<CourierOption>,
    pub pickup_pincode: String,
    pub delivery_pincode: String,
}

#[derive(Serialize)]
pub struct TrackingResponse {
    pub success: bool,
    pub shipment: ShipmentResponse,
    pub tracking: TrackingSnapshot,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelResponse {
    pub success: bool,
    pub label_url: String,
    pub shipment: ShipmentResponse,
}

#[derive(Serialize)]
pub struct PickupLocationsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub pickup: PickupLocations,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

// ========================================
// Handlers
// ========================================

/// POST /api/shipping/serviceability - 配送可否と料金
pub async fn check_serviceability(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Json(payload): Json<ServiceabilityRequest>,
) -> AppResult<Json<ServiceabilityResponse>> {
    let result = state
        .shipments
        .check_serviceability(seller.id(), &payload.order_id)
        .await?;

    Ok(Json(ServiceabilityResponse {
        success: true,
        couriers: result.couriers,
        pickup_pincode: result.pickup_pincode,
        delivery_pincode: result.delivery_pincode,
    }))
}

/// GET /api/shipping/:order_id - Shipment詳細
pub async fn get_shipment(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
) -> AppResult<Json<ShipmentDetailResponse>> {
    let shipment = state.shipments.get(seller.id(), &order_id).await?;
    let shipment = store::shipment_view(&state.db, &shipment).await?;
    Ok(Json(ShipmentDetailResponse { success: true, shipment, warning: None }))
}

/// POST /api/shipping/:order_id/create - Shiprocket に出荷登録
pub async fn create_shipment(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
    payload: Option<Json<CreateShipmentRequest>>,
) -> AppResult<Json<ShipmentDetailResponse>> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let created = state
        .shipments
        .create_shipment(seller.id(), &order_id, &request, &seller.actor())
        .await?;

    let shipment = store::shipment_view(&state.db, &created.shipment).await?;
    Ok(Json(ShipmentDetailResponse {
        success: true,
        shipment,
        warning: created.warning,
    }))
}

/// POST /api/shipping/:order_id/assign-courier - 配送業者割当（AWB発行）
pub async fn assign_courier(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
    Json(payload): Json<AssignCourierRequest>,
) -> AppResult<Json<ShipmentDetailResponse>> {
    let shipment = state
        .shipments
        .assign_courier(seller.id(), &order_id, &payload, &seller.actor())
        .await?;

    let shipment = store::shipment_view(&state.db, &shipment).await?;
    Ok(Json(ShipmentDetailResponse { success: true, shipment, warning: None }))
}

/// POST /api/shipping/:order_id/pickup - 集荷依頼
pub async fn schedule_pickup(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
) -> AppResult<Json<ShipmentDetailResponse>> {
    let shipment = state
        .shipments
        .schedule_pickup(seller.id(), &order_id, &seller.actor())
        .await?;

    let shipment = store::shipment_view(&state.db, &shipment).await?;
    Ok(Json(ShipmentDetailResponse { success: true, shipment, warning: None }))
}

/// GET /api/shipping/:order_id/track - 追跡（ステータスも同期）
pub async fn track_shipment(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
) -> AppResult<Json<TrackingResponse>> {
    let (shipment, tracking) = state.shipments.track(seller.id(), &order_id).await?;
    let shipment = store::shipment_view(&state.db, &shipment).await?;
    Ok(Json(TrackingResponse { success: true, shipment, tracking }))
}

/// GET /api/shipping/:order_id/label - 配送ラベル
pub async fn generate_label(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
) -> AppResult<Json<LabelResponse>> {
    let (shipment, label_url) = state.shipments.label(seller.id(), &order_id).await?;
    let shipment = store::shipment_view(&state.db, &shipment).await?;
    Ok(Json(LabelResponse { success: true, label_url, shipment }))
}

// ========================================
// Pickup locations
// ========================================

/// GET /api/shipping/pickup-locations - 集荷拠点一覧
pub async fn list_pickup_locations(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
) -> AppResult<Json<PickupLocationsResponse>> {
    let pickup = state.shipments.list_pickup_locations(seller.id()).await?;
    Ok(Json(PickupLocationsResponse { success: true, pickup }))
}

/// POST /api/shipping/pickup-locations - 集荷拠点登録
pub async fn add_pickup_location(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Json(payload): Json<PickupLocationRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .shipments
        .register_pickup_location(seller.id(), &payload)
        .await?;

    Ok(Json(MessageResponse {
        success: true,
        message: format!(
            "Pickup location '{}' added. Verify its phone number with Shiprocket before booking shipments.",
            payload.name
        ),
    }))
}

/// PUT /api/shipping/pickup-locations/:name - 集荷拠点更新
pub async fn update_pickup_location(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(name): Path<String>,
    Json(payload): Json<PickupLocationRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .shipments
        .update_pickup_location(seller.id(), &name, &payload)
        .await?;

    Ok(Json(MessageResponse {
        success: true,
        message: format!("Pickup location '{}' updated", name),
    }))
}
