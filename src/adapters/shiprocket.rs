//! Shiprocket Adapter
//! Shiprocket external API (https://apiv2.shiprocket.in/v1/external)

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::shipping::*;
use super::{error_message, loose_f64, loose_i64, loose_string, read_json, AdapterError};
use crate::config::ShiprocketConfig;
use crate::models::{PickupLocationRequest, ShipmentStatus};

/// トークンの有効期限は 10 日。余裕を見て 9 日で更新
const TOKEN_TTL: Duration = Duration::from_secs(9 * 24 * 60 * 60);

struct CachedToken {
    value: String,
    obtained_at: Instant,
}

pub struct Shiprocket {
    client: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    token: RwLock<Option<CachedToken>>,
}

impl Shiprocket {
    pub fn new(config: &ShiprocketConfig, timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            password: config.password.clone(),
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/external{}", self.base_url, path)
    }

    /// キャッシュ済みトークンを返す。期限切れならログインし直す
    async fn token(&self) -> Result<String, AdapterError> {
        {
            let guard = self.token.read().await;
            if let Some(t) = guard.as_ref() {
                if t.obtained_at.elapsed() < TOKEN_TTL {
                    return Ok(t.value.clone());
                }
            }
        }

        let mut guard = self.token.write().await;
        // 待っている間に他のタスクが更新済みかもしれない
        if let Some(t) = guard.as_ref() {
            if t.obtained_at.elapsed() < TOKEN_TTL {
                return Ok(t.value.clone());
            }
        }

        if self.email.is_empty() || self.password.is_empty() {
            return Err(AdapterError::NotConfigured("Shiprocket"));
        }

        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": self.email, "password": self.password }))
            .send()
            .await?;
        let body = read_json(resp).await?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::Malformed("login response has no token".to_string()))?
            .to_string();

        info!("Shiprocket token refreshed");
        *guard = Some(CachedToken {
            value: token.clone(),
            obtained_at: Instant::now(),
        });
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    /// 認証付きリクエスト。401 の場合は一度だけ再ログインして再試行
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, AdapterError> {
        let mut retried = false;
        loop {
            let token = self.token().await?;
            let mut req = self.client.request(method.clone(), self.url(path)).bearer_auth(&token);
            if let Some(b) = body {
                req = req.json(b);
            }
            let resp = req.send().await?;

            if resp.status() == StatusCode::UNAUTHORIZED && !retried {
                debug!("Shiprocket token rejected, re-authenticating");
                self.invalidate_token().await;
                retried = true;
                continue;
            }
            return read_json(resp).await;
        }
    }
}

#[async_trait]
impl ShippingProvider for Shiprocket {
    async fn check_serviceability(
        &self,
        query: &ServiceabilityQuery,
    ) -> Result<Vec<CourierOption>, AdapterError> {
        let path = format!(
            "/courier/serviceability/?pickup_postcode={}&delivery_postcode={}&weight={}&cod={}",
            query.pickup_pincode,
            query.delivery_pincode,
            query.weight_kg,
            if query.cod { 1 } else { 0 }
        );
        let body = self.request(Method::GET, &path, None).await?;
        Ok(parse_serviceability(&body))
    }

    async fn create_order(&self, payload: &CreateOrderPayload) -> Result<CreatedOrder, AdapterError> {
        let body = build_order_body(payload);
        let resp = self.request(Method::POST, "/orders/create/adhoc", Some(&body)).await?;
        parse_created_order(&resp)
    }

    async fn get_order_details(
        &self,
        remote_order_id: &str,
    ) -> Result<RemoteOrderDetails, AdapterError> {
        let resp = self
            .request(Method::GET, &format!("/orders/show/{}", remote_order_id), None)
            .await?;
        Ok(parse_order_details(&resp))
    }

    async fn assign_courier(
        &self,
        remote_shipment_id: &str,
        courier_id: i64,
    ) -> Result<CourierAssignment, AdapterError> {
        let body = json!({ "shipment_id": remote_shipment_id, "courier_id": courier_id });
        let resp = self.request(Method::POST, "/courier/assign/awb", Some(&body)).await?;
        parse_awb_assignment(&resp)
    }

    async fn schedule_pickup(&self, remote_shipment_id: &str) -> Result<PickupOutcome, AdapterError> {
        let body = json!({ "shipment_id": [remote_shipment_id] });
        match self.request(Method::POST, "/courier/generate/pickup", Some(&body)).await {
            Ok(resp) => parse_pickup(&resp),
            Err(e) => match e.remote_message() {
                Some(msg) if is_already_scheduled(msg) => Ok(PickupOutcome::AlreadyScheduled),
                _ => Err(e),
            },
        }
    }

    async fn track_by_awb(&self, awb_code: &str) -> Result<TrackingSnapshot, AdapterError> {
        let resp = self
            .request(Method::GET, &format!("/courier/track/awb/{}", awb_code), None)
            .await?;
        Ok(parse_tracking(&resp))
    }

    async fn generate_label(&self, remote_shipment_id: &str) -> Result<String, AdapterError> {
        let body = json!({ "shipment_id": [remote_shipment_id] });
        let resp = self.request(Method::POST, "/courier/generate/label", Some(&body)).await?;
        parse_label(&resp)
    }

    async fn cancel_order(&self, remote_order_id: &str) -> Result<(), AdapterError> {
        let body = json!({ "ids": [remote_order_id] });
        self.request(Method::POST, "/orders/cancel", Some(&body)).await?;
        Ok(())
    }

    async fn get_pickup_locations(&self) -> Result<Vec<PickupLocation>, AdapterError> {
        let resp = self.request(Method::GET, "/settings/company/pickup", None).await?;
        Ok(parse_pickup_locations(&resp))
    }

    async fn add_pickup_location(&self, location: &PickupLocationRequest) -> Result<(), AdapterError> {
        let body = pickup_location_body(location);
        self.request(Method::POST, "/settings/company/addpickup", Some(&body)).await?;
        Ok(())
    }

    async fn update_pickup_location(
        &self,
        location: &PickupLocationRequest,
    ) -> Result<(), AdapterError> {
        let body = pickup_location_body(location);
        self.request(Method::POST, "/settings/company/updatepickup", Some(&body)).await?;
        Ok(())
    }

    fn tracking_url(&self, awb_code: &str) -> Option<String> {
        Some(format!("https://shiprocket.co/tracking/{}", awb_code))
    }
}

// ========================================
// Request Builders
// ========================================

fn build_order_body(p: &CreateOrderPayload) -> Value {
    let items: Vec<Value> = p
        .items
        .iter()
        .map(|i| {
            json!({
                "name": i.name,
                "sku": i.sku,
                "units": i.units,
                "selling_price": i.selling_price,
            })
        })
        .collect();

    json!({
        "order_id": p.order_number,
        "order_date": p.order_date,
        "pickup_location": p.pickup_location,
        "billing_customer_name": p.billing.name,
        "billing_last_name": "",
        "billing_address": p.billing.address,
        "billing_address_2": p.billing.address_2.clone().unwrap_or_default(),
        "billing_city": p.billing.city,
        "billing_pincode": p.billing.pincode,
        "billing_state": p.billing.state,
        "billing_country": p.billing.country,
        "billing_email": p.customer_email.clone().or_else(|| p.billing.email.clone()).unwrap_or_default(),
        "billing_phone": p.billing.phone,
        "shipping_is_billing": true,
        "order_items": items,
        "payment_method": "Prepaid",
        "sub_total": p.sub_total,
        "length": p.length_cm,
        "breadth": p.width_cm,
        "height": p.height_cm,
        "weight": p.weight_kg,
    })
}

fn pickup_location_body(l: &PickupLocationRequest) -> Value {
    json!({
        "pickup_location": l.name,
        "name": l.contact_name,
        "email": l.email,
        "phone": l.phone,
        "address": l.address,
        "address_2": l.address_2.clone().unwrap_or_default(),
        "city": l.city,
        "state": l.state,
        "country": l.country,
        "pin_code": l.pincode,
    })
}

// ========================================
// Response Normalization
// ========================================

/// トップレベル・payload・data のいずれかにある ID を探す
fn find_id(v: &Value, key: &str) -> Option<String> {
    [Some(v), v.get("payload"), v.get("data")]
        .into_iter()
        .flatten()
        .find_map(|scope| scope.get(key).and_then(loose_string))
}

fn parse_created_order(v: &Value) -> Result<CreatedOrder, AdapterError> {
    let remote_order_id = find_id(v, "order_id").ok_or_else(|| {
        let msg = error_message(v).unwrap_or_else(|| "order creation response has no order_id".to_string());
        AdapterError::Malformed(msg)
    })?;
    Ok(CreatedOrder {
        remote_order_id,
        remote_shipment_id: find_id(v, "shipment_id"),
    })
}

fn parse_order_details(v: &Value) -> RemoteOrderDetails {
    let data = v.get("data").unwrap_or(v);
    let shipment_ids = match data.get("shipments") {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|s| s.get("id").and_then(loose_string))
            .collect(),
        Some(obj @ Value::Object(_)) => obj.get("id").and_then(loose_string).into_iter().collect(),
        _ => Vec::new(),
    };
    RemoteOrderDetails { shipment_ids }
}

fn parse_awb_assignment(v: &Value) -> Result<CourierAssignment, AdapterError> {
    if v.get("awb_assign_status").and_then(loose_i64) == Some(0) {
        let message = v
            .pointer("/response/data/awb_assign_error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error_message(v))
            .unwrap_or_else(|| "courier assignment rejected".to_string());
        return Err(AdapterError::Remote { status: 422, message });
    }

    let data = v.pointer("/response/data").unwrap_or(v);
    let awb_code = data
        .get("awb_code")
        .and_then(loose_string)
        .ok_or_else(|| AdapterError::Malformed("courier assignment response has no awb_code".to_string()))?;
    let courier_name = data
        .get("courier_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(CourierAssignment { awb_code, courier_name })
}

/// 「既に集荷手配済み」を示すメッセージか（構造化エラーコードが無いため文言で判定）
pub fn is_already_scheduled(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("already")
        && ["pickup", "scheduled", "generated", "queue"]
            .iter()
            .any(|k| m.contains(k))
}

fn parse_pickup(v: &Value) -> Result<PickupOutcome, AdapterError> {
    if v.get("pickup_status").and_then(loose_i64) == Some(1) {
        let scheduled_date = v
            .pointer("/response/pickup_scheduled_date")
            .and_then(loose_string);
        return Ok(PickupOutcome::Scheduled { scheduled_date });
    }
    match error_message(v) {
        Some(msg) if is_already_scheduled(&msg) => Ok(PickupOutcome::AlreadyScheduled),
        Some(msg) => Err(AdapterError::Remote { status: 422, message: msg }),
        None => Ok(PickupOutcome::Scheduled { scheduled_date: None }),
    }
}

/// プロバイダの状態文字列を ShipmentStatus に対応付ける
pub fn map_tracking_status(raw: &str) -> Option<ShipmentStatus> {
    let s = raw.trim().to_uppercase();
    if s.is_empty() {
        return None;
    }
    if s.contains("CANCEL") {
        Some(ShipmentStatus::Cancelled)
    } else if s.contains("UNDELIVERED") || s.contains("RTO") {
        Some(ShipmentStatus::InTransit)
    } else if s.contains("OUT FOR DELIVERY") {
        Some(ShipmentStatus::OutForDelivery)
    } else if s.contains("DELIVERED") {
        Some(ShipmentStatus::Delivered)
    } else if s.contains("OUT FOR PICKUP") || s.contains("PICKUP SCHEDULED") || s.contains("PICKUP GENERATED") {
        Some(ShipmentStatus::PickupScheduled)
    } else if s.contains("PICKED UP") {
        Some(ShipmentStatus::PickedUp)
    } else if s.contains("IN TRANSIT") || s.contains("SHIPPED") || s.contains("REACHED") {
        Some(ShipmentStatus::InTransit)
    } else if s.contains("AWB ASSIGNED") {
        Some(ShipmentStatus::CourierAssigned)
    } else {
        None
    }
}

fn parse_tracking(v: &Value) -> TrackingSnapshot {
    let td = v.get("tracking_data").unwrap_or(v);

    let current_status = td
        .pointer("/shipment_track/0/current_status")
        .and_then(Value::as_str)
        .map(str::to_string);

    let events = td
        .get("shipment_track_activities")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|a| TrackingEvent {
                    date: a.get("date").and_then(loose_string),
                    activity: a.get("activity").and_then(loose_string),
                    location: a.get("location").and_then(loose_string),
                })
                .collect()
        })
        .unwrap_or_default();

    TrackingSnapshot {
        status: current_status.as_deref().and_then(map_tracking_status),
        current_status,
        tracking_url: td.get("track_url").and_then(loose_string),
        events,
    }
}

fn parse_label(v: &Value) -> Result<String, AdapterError> {
    if let Some(url) = v.get("label_url").and_then(loose_string) {
        return Ok(url);
    }
    let message = error_message(v).unwrap_or_else(|| "label response has no label_url".to_string());
    Err(AdapterError::Malformed(message))
}

fn parse_serviceability(v: &Value) -> Vec<CourierOption> {
    v.pointer("/data/available_courier_companies")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|c| {
                    Some(CourierOption {
                        courier_id: c.get("courier_company_id").and_then(loose_i64)?,
                        courier_name: c.get("courier_name").and_then(loose_string)?,
                        rate: c.get("rate").and_then(loose_f64)?,
                        estimated_days: c.get("estimated_delivery_days").and_then(loose_i64),
                        rating: c.get("rating").and_then(loose_f64),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_pickup_locations(v: &Value) -> Vec<PickupLocation> {
    v.pointer("/data/shipping_address")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|l| {
                    Some(PickupLocation {
                        name: l.get("pickup_location").and_then(loose_string)?,
                        pincode: l.get("pin_code").and_then(loose_string),
                        active: l.get("status").and_then(loose_i64) == Some(1),
                        phone_verified: l.get("phone_verified").and_then(loose_i64) == Some(1),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
