//! Cashfree Adapter
//! Cashfree PG API (/pg/orders)

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;

use super::payment::*;
use super::{loose_f64, loose_string, read_json, AdapterError};
use crate::config::CashfreeConfig;

pub struct Cashfree {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    api_version: String,
}

impl Cashfree {
    pub fn new(config: &CashfreeConfig, timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            api_version: config.api_version.clone(),
        })
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, AdapterError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(AdapterError::NotConfigured("Cashfree"));
        }
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-client-id", &self.client_id)
            .header("x-client-secret", &self.client_secret)
            .header("x-api-version", &self.api_version);
        if let Some(b) = body {
            req = req.json(b);
        }
        read_json(req.send().await?).await
    }
}

#[async_trait]
impl PaymentGateway for Cashfree {
    async fn get_order(&self, gateway_order_id: &str) -> Result<GatewayOrder, AdapterError> {
        let resp = self
            .request(Method::GET, &format!("/orders/{}", gateway_order_id), None)
            .await?;
        parse_order(&resp)
    }

    async fn create_refund(&self, request: &RefundRequest) -> Result<RefundReceipt, AdapterError> {
        let body = json!({
            "refund_amount": request.amount,
            "refund_id": request.refund_id,
            "refund_note": request.note,
        });
        let resp = self
            .request(
                Method::POST,
                &format!("/orders/{}/refunds", request.gateway_order_id),
                Some(&body),
            )
            .await?;
        Ok(parse_refund(&resp, &request.refund_id))
    }
}

fn parse_order(v: &Value) -> Result<GatewayOrder, AdapterError> {
    let order_amount = v
        .get("order_amount")
        .and_then(loose_f64)
        .ok_or_else(|| AdapterError::Malformed("order response has no order_amount".to_string()))?;
    Ok(GatewayOrder {
        order_amount,
        order_status: v.get("order_status").and_then(loose_string),
    })
}

fn parse_refund(v: &Value, requested_id: &str) -> RefundReceipt {
    RefundReceipt {
        refund_id: v
            .get("refund_id")
            .and_then(loose_string)
            .unwrap_or_else(|| requested_id.to_string()),
        status: v.get("refund_status").and_then(loose_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_amount_number_or_string() {
        let order = parse_order(&json!({"order_amount": 499.0, "order_status": "PAID"})).unwrap();
        assert_eq!(order.order_amount, 499.0);
        assert_eq!(order.order_status.as_deref(), Some("PAID"));
        assert_eq!(parse_order(&json!({"order_amount": "250.50"})).unwrap().order_amount, 250.5);
        assert!(parse_order(&json!({})).is_err());
    }

    #[test]
    fn refund_falls_back_to_requested_id() {
        let receipt = parse_refund(&json!({"refund_status": "PENDING"}), "RF_abc");
        assert_eq!(receipt.refund_id, "RF_abc");
        assert_eq!(receipt.status.as_deref(), Some("PENDING"));
    }

    #[tokio::test]
    async fn unconfigured_gateway_fails_fast() {
        let gateway = Cashfree::new(&crate::config::AppConfig::default().cashfree, Duration::from_secs(1)).unwrap();
        let err = gateway.get_order("cf_1").await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConfigured("Cashfree")));
    }
}
