//! Orders API Handlers
//! /api/orders エンドポイント - ステータス更新・手動出荷

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::SellerIdentity;
use crate::error::AppResult;
use crate::models::{OrderResponse, ShipOrderRequest, UpdateStatusRequest};
use crate::store;
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct OrderDetailResponse {
    pub success: bool,
    pub order: OrderResponse,
}

// ========================================
// Handlers
// ========================================

/// GET /api/orders/:id - Order詳細
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
) -> AppResult<Json<OrderDetailResponse>> {
    let order = state.orders.get(seller.id(), &order_id).await?;
    Ok(Json(OrderDetailResponse { success: true, order }))
}

/// PUT /api/orders/:id/status - ステータス更新
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<OrderDetailResponse>> {
    let order = state
        .orders
        .transition(
            seller.id(),
            &order_id,
            payload.status,
            &seller.actor(),
            payload.note.as_deref(),
        )
        .await?;

    let order = store::order_view(&state.db, &order).await?;
    Ok(Json(OrderDetailResponse { success: true, order }))
}

/// PUT /api/orders/:id/ship - 手動出荷（追跡番号を登録して shipped へ）
pub async fn ship_order(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(order_id): Path<String>,
    Json(payload): Json<ShipOrderRequest>,
) -> AppResult<Json<OrderDetailResponse>> {
    let order = state
        .orders
        .ship(seller.id(), &order_id, &payload, &seller.actor())
        .await?;

    let order = store::order_view(&state.db, &order).await?;
    Ok(Json(OrderDetailResponse { success: true, order }))
}
