//! Payment Gateway contract

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::AdapterError;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayOrder {
    pub order_amount: f64,
    pub order_status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub gateway_order_id: String,
    pub amount: f64,
    pub refund_id: String,
    pub note: String,
}

/// 返金受付結果（完了は非同期）
#[derive(Debug, Clone, PartialEq)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn get_order(&self, gateway_order_id: &str) -> Result<GatewayOrder, AdapterError>;

    async fn create_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, AdapterError>;
}

/// 同じ対象には同じ返金IDを使う（再試行時にゲートウェイ側で重複排除される）
pub fn refund_id_for(prefix: &str, key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}_{}", prefix, &digest[..16])
}
