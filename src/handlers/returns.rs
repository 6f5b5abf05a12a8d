//! Returns API Handlers
//! /api/returns エンドポイント

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::SellerIdentity;
use crate::error::AppResult;
use crate::models::{RejectReturnRequest, ReturnRequest, ReturnResponse};
use crate::store;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnDetailResponse {
    pub success: bool,
    pub return_request: ReturnResponse,
}

async fn respond(state: &AppState, request: &ReturnRequest) -> AppResult<Json<ReturnDetailResponse>> {
    let return_request = store::return_view(&state.db, request).await?;
    Ok(Json(ReturnDetailResponse { success: true, return_request }))
}

/// GET /api/returns/:id
pub async fn get_return(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(return_id): Path<String>,
) -> AppResult<Json<ReturnDetailResponse>> {
    let request = state.returns.get(seller.id(), &return_id).await?;
    respond(&state, &request).await
}

/// PUT /api/returns/:id/approve
pub async fn approve_return(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(return_id): Path<String>,
) -> AppResult<Json<ReturnDetailResponse>> {
    let request = state
        .returns
        .approve(seller.id(), &return_id, &seller.actor())
        .await?;
    respond(&state, &request).await
}

/// PUT /api/returns/:id/reject - 却下（理由必須）
pub async fn reject_return(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(return_id): Path<String>,
    payload: Option<Json<RejectReturnRequest>>,
) -> AppResult<Json<ReturnDetailResponse>> {
    let reason = payload.and_then(|Json(p)| p.reason);
    let request = state
        .returns
        .reject(seller.id(), &return_id, reason.as_deref(), &seller.actor())
        .await?;
    respond(&state, &request).await
}

/// PUT /api/returns/:id/shipped-back
pub async fn mark_shipped_back(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(return_id): Path<String>,
) -> AppResult<Json<ReturnDetailResponse>> {
    let request = state
        .returns
        .mark_shipped_back(seller.id(), &return_id, &seller.actor())
        .await?;
    respond(&state, &request).await
}

/// PUT /api/returns/:id/received - 受領（返品は返金、交換は完了）
pub async fn mark_received(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(return_id): Path<String>,
) -> AppResult<Json<ReturnDetailResponse>> {
    let request = state
        .returns
        .mark_received(seller.id(), &return_id, &seller.actor())
        .await?;
    respond(&state, &request).await
}

/// PUT /api/returns/:id/retry-refund - 返金失敗後の再試行
pub async fn retry_refund(
    State(state): State<Arc<AppState>>,
    seller: SellerIdentity,
    Path(return_id): Path<String>,
) -> AppResult<Json<ReturnDetailResponse>> {
    let request = state
        .returns
        .retry_refund(seller.id(), &return_id, &seller.actor())
        .await?;
    respond(&state, &request).await
}
