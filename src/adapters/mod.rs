//! External Adapters
//! 配送プロバイダ・決済ゲートウェイとの境界。レスポンス形式の揺れはここで吸収する

pub mod cashfree;
pub mod payment;
pub mod shipping;
pub mod shiprocket;

use serde_json::Value;
use std::future::Future;
use std::time::Duration;

pub use cashfree::Cashfree;
pub use payment::{GatewayOrder, PaymentGateway, RefundReceipt, RefundRequest};
pub use shipping::{
    CourierAssignment, CourierOption, CreateOrderPayload, CreatedOrder, PayloadItem, PickupLocation,
    PickupOutcome, RemoteOrderDetails, ServiceabilityQuery, ShippingProvider, TrackingEvent,
    TrackingSnapshot,
};
pub use shiprocket::Shiprocket;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider call timed out")]
    Timeout,

    #[error("provider returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("unexpected provider response: {0}")]
    Malformed(String),

    #[error("{0} credentials are not configured")]
    NotConfigured(&'static str),
}

impl AdapterError {
    /// プロバイダが返したメッセージ（あれば）
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Remote { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// 外部呼び出しにタイムアウトを付ける
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout),
    }
}

// ========================================
// レスポンス読み取りヘルパー
// ========================================

/// 数値でも文字列でも ID として取り出す
pub(crate) fn loose_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn loose_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn loose_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// エラーレスポンスからメッセージを取り出す
pub(crate) fn error_message(v: &Value) -> Option<String> {
    if let Some(msg) = v.get("message").and_then(Value::as_str) {
        return Some(msg.to_string());
    }
    // {"errors": {"field": ["..."]}} 形式
    if let Some(errors) = v.get("errors").and_then(Value::as_object) {
        let joined = errors
            .values()
            .flat_map(|e| match e {
                Value::Array(list) => list.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                Value::String(s) => vec![s.clone()],
                _ => Vec::new(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    None
}

/// HTTP レスポンスを JSON として読み、非 2xx はエラーにする
pub(crate) async fn read_json(resp: reqwest::Response) -> Result<Value, AdapterError> {
    let status = resp.status();
    let text = resp.text().await?;
    let value: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text.clone()))
    };

    if !status.is_success() {
        let message = error_message(&value).unwrap_or_else(|| text.chars().take(300).collect());
        return Err(AdapterError::Remote {
            status: status.as_u16(),
            message,
        });
    }
    Ok(value)
}
