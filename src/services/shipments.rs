//! Shipment Reconciliation
//! Shiprocket 上の出荷と、ローカルの Shipment / Order の状態を揃える

use chrono::TimeZone;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::{
    bounded, CourierOption, CreateOrderPayload, PayloadItem, PickupLocation,
    PickupOutcome, ServiceabilityQuery, ShippingProvider, TrackingSnapshot,
};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::events::{DomainEvent, EventBus};
use crate::models::{
    Actor, AssignCourierRequest, CreateShipmentRequest, Order, OrderStatus, PaymentStatus,
    PickupLocationRequest, Shipment, ShipmentStatus, ShippingPaidBy, TrackingInfo,
};
use crate::services::orders;
use crate::store::{self, HistoryTable};

// ========================================
// 重量・寸法の範囲
// ========================================

pub const MIN_WEIGHT_GRAMS: i64 = 50;
pub const MAX_WEIGHT_GRAMS: i64 = 50_000;
pub const DEFAULT_WEIGHT_GRAMS: i64 = 500;
pub const MIN_DIMENSION_CM: f64 = 1.0;
pub const MAX_DIMENSION_CM: f64 = 200.0;
pub const DEFAULT_DIMENSION_CM: f64 = 10.0;

/// 未指定・0・非数は既定値、それ以外は範囲内に丸める
pub fn clamp_weight(grams: Option<f64>) -> i64 {
    match grams {
        Some(g) if g.is_finite() && g != 0.0 => {
            (g.round() as i64).clamp(MIN_WEIGHT_GRAMS, MAX_WEIGHT_GRAMS)
        }
        _ => DEFAULT_WEIGHT_GRAMS,
    }
}

pub fn clamp_dimension(cm: Option<f64>) -> f64 {
    match cm {
        Some(c) if c.is_finite() && c != 0.0 => c.clamp(MIN_DIMENSION_CM, MAX_DIMENSION_CM),
        _ => DEFAULT_DIMENSION_CM,
    }
}

/// createShipment の結果。shipment id が取れなかった場合は warning を返す
#[derive(Debug, Clone)]
pub struct CreatedShipment {
    pub shipment: Shipment,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Serviceability {
    pub couriers: Vec<CourierOption>,
    pub pickup_pincode: String,
    pub delivery_pincode: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupLocations {
    pub locations: Vec<PickupLocation>,
    pub registered: Option<String>,
}

struct ResolvedPickup {
    name: String,
    pincode: Option<String>,
}

pub struct ShipmentService {
    db: DbPool,
    shipping: Arc<dyn ShippingProvider>,
    events: EventBus,
    adapter_timeout: Duration,
    recovery_delay: Duration,
}

impl ShipmentService {
    pub fn new(
        db: DbPool,
        shipping: Arc<dyn ShippingProvider>,
        events: EventBus,
        adapter_timeout: Duration,
        recovery_delay: Duration,
    ) -> Self {
        Self { db, shipping, events, adapter_timeout, recovery_delay }
    }

    pub async fn get(&self, seller_id: &str, order_id: &str) -> AppResult<Shipment> {
        store::fetch_order(&self.db, seller_id, order_id).await?;
        store::fetch_latest_shipment(&self.db, seller_id, order_id)
            .await?
            .ok_or(AppError::NotFound("Shipment"))
    }

    // ========================================
    // createShipment
    // ========================================

    pub async fn create_shipment(
        &self,
        seller_id: &str,
        order_id: &str,
        req: &CreateShipmentRequest,
        actor: &Actor,
    ) -> AppResult<CreatedShipment> {
        let order = store::fetch_order(&self.db, seller_id, order_id).await?;

        if order.payment_status != PaymentStatus::Paid {
            return Err(AppError::NotPaid(order.payment_status));
        }
        // 二重作成防止: 既存の Shipment をそのまま返す
        if let Some(existing) = store::fetch_active_shipment(&self.db, seller_id, order_id).await? {
            return Err(AppError::AlreadyShipped(Box::new(existing)));
        }
        // confirmed / processing 以外は出荷できない（pending のまま集荷されるのを防ぐ）
        if !matches!(order.status, OrderStatus::Confirmed | OrderStatus::Processing) {
            return Err(AppError::Validation(format!(
                "Cannot create a shipment for an order in status '{}'",
                order.status
            )));
        }

        let billing = order
            .address()
            .ok_or_else(|| AppError::Validation("Order has no valid shipping address".to_string()))?;
        let pickup = self.resolve_pickup(seller_id).await?;
        let items = store::fetch_order_items(&self.db, order_id).await?;

        let weight_grams = clamp_weight(req.weight);
        let dimensions = (
            clamp_dimension(req.length),
            clamp_dimension(req.width),
            clamp_dimension(req.height),
        );
        let (length, width, height) = dimensions;

        let payload = CreateOrderPayload {
            order_number: order.order_number.clone(),
            order_date: chrono::Utc
                .timestamp_millis_opt(order.created_at_ms)
                .single()
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
            pickup_location: pickup.name.clone(),
            billing,
            customer_email: order.customer_email.clone(),
            items: items
                .iter()
                .map(|i| PayloadItem {
                    name: i.title.clone(),
                    sku: i.sku.clone().unwrap_or_else(|| i.product_id.clone()),
                    units: i.quantity,
                    selling_price: i.price,
                })
                .collect(),
            sub_total: order.total_amount,
            weight_kg: weight_grams as f64 / 1000.0,
            length_cm: length,
            width_cm: width,
            height_cm: height,
        };

        // プロバイダ呼び出し前に出荷枠を確保する。同時リクエストはここで ALREADY_SHIPPED になる
        let shipment_id = store::generate_id("SHP");
        self.claim_shipment(&order, &shipment_id, &pickup.name, weight_grams, dimensions)
            .await?;

        let created = match bounded(self.adapter_timeout, self.shipping.create_order(&payload)).await {
            Ok(created) => created,
            Err(e) => {
                self.release_claim(&shipment_id).await;
                return Err(e.into());
            }
        };
        info!(
            "Shiprocket order created: order={}, remote_order={}, remote_shipment={:?}",
            order.order_id, created.remote_order_id, created.remote_shipment_id
        );

        // 作成レスポンスに shipment_id が無いことがある。少し待って照会し直す
        let mut warning = None;
        let remote_shipment_id = match created.remote_shipment_id.clone() {
            Some(id) => Some(id),
            None => {
                tokio::time::sleep(self.recovery_delay).await;
                let recovered = self.lookup_shipment_id(&created.remote_order_id).await;
                if recovered.is_none() {
                    warn!(
                        order_id = %order.order_id,
                        remote_order_id = %created.remote_order_id,
                        "Shipment id still missing after re-query"
                    );
                    warning = Some(
                        "Shipment created but the provider has not assigned a shipment id yet; \
                         courier assignment will retry the lookup"
                            .to_string(),
                    );
                }
                recovered
            }
        };

        let persisted = self
            .persist_created(
                &order,
                &shipment_id,
                &created.remote_order_id,
                remote_shipment_id.as_deref(),
                actor,
                warning.as_deref(),
                store::now_ms(),
            )
            .await;

        let advanced = match persisted {
            Ok(advanced) => advanced,
            Err(e) => {
                // ローカル保存に失敗したら、このリクエストで作ったリモートの出荷を取り消す
                warn!(order_id = %order.order_id, "Shipment save failed, cancelling remote order: {}", e);
                if let Err(cancel_err) =
                    bounded(self.adapter_timeout, self.shipping.cancel_order(&created.remote_order_id)).await
                {
                    warn!(
                        remote_order_id = %created.remote_order_id,
                        "Remote order cancel failed: {}", cancel_err
                    );
                }
                self.release_claim(&shipment_id).await;
                return Err(e);
            }
        };

        if advanced {
            orders::emit_transition_events(&self.events, &order, OrderStatus::Processing);
        }
        self.events.emit(DomainEvent::ShipmentCreated {
            seller_id: order.seller_id.clone(),
            order_id: order.order_id.clone(),
            shipment_id: shipment_id.clone(),
            warning: warning.clone(),
        });

        let shipment = self.reload(&shipment_id).await?;
        Ok(CreatedShipment { shipment, warning })
    }

    /// リモート ID 未設定の Shipment 行を入れて Order の出荷枠を押さえる（version 0 のまま）
    async fn claim_shipment(
        &self,
        order: &Order,
        shipment_id: &str,
        pickup_location: &str,
        weight_grams: i64,
        (length, width, height): (f64, f64, f64),
    ) -> AppResult<()> {
        let now = store::now_ms();
        let inserted = sqlx::query(r#"
            INSERT INTO shipments (
                shipment_id, order_id, seller_id, pickup_location,
                weight_grams, length_cm, width_cm, height_cm,
                status, version, created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#)
        .bind(shipment_id)
        .bind(&order.order_id)
        .bind(&order.seller_id)
        .bind(pickup_location)
        .bind(weight_grams)
        .bind(length)
        .bind(width)
        .bind(height)
        .bind(ShipmentStatus::Created)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // 先に確保した別リクエストの Shipment を返す
                match store::fetch_active_shipment(&self.db, &order.seller_id, &order.order_id).await? {
                    Some(existing) => Err(AppError::AlreadyShipped(Box::new(existing))),
                    None => Err(AppError::Conflict("Shipment")),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 確保だけして使われなかった行を消す。失敗はログのみ
    async fn release_claim(&self, shipment_id: &str) {
        let released = sqlx::query("DELETE FROM shipments WHERE shipment_id = ? AND version = 0")
            .bind(shipment_id)
            .execute(&self.db)
            .await;
        if let Err(e) = released {
            warn!(shipment_id = %shipment_id, "Failed to release shipment claim: {}", e);
        }
    }

    /// 確保済みの行にリモート ID を書き込み、Order を processing へ進める。遷移したら true
    #[allow(clippy::too_many_arguments)]
    async fn persist_created(
        &self,
        order: &Order,
        shipment_id: &str,
        remote_order_id: &str,
        remote_shipment_id: Option<&str>,
        actor: &Actor,
        warning: Option<&str>,
        now: i64,
    ) -> AppResult<bool> {
        let mut tx = self.db.begin().await?;

        // 確保後にキャンセルされていれば version が進んでいる
        let result = sqlx::query(r#"
            UPDATE shipments SET
                shiprocket_order_id = ?,
                shiprocket_shipment_id = ?,
                version = version + 1,
                updated_at_ms = ?
            WHERE shipment_id = ? AND version = 0
        "#)
        .bind(remote_order_id)
        .bind(remote_shipment_id)
        .bind(now)
        .bind(shipment_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict("Shipment"));
        }

        let note = warning.unwrap_or("Shipment created with provider");
        store::append_history(
            &mut tx,
            HistoryTable::Shipment,
            shipment_id,
            ShipmentStatus::Created.as_str(),
            actor,
            Some(note),
            now,
        )
        .await?;

        let advanced = order.status == OrderStatus::Confirmed;
        if advanced {
            orders::write_transition(
                &mut tx,
                order,
                OrderStatus::Processing,
                actor,
                Some("Shipment created"),
                now,
            )
            .await?;
        } else {
            orders::claim_version(&mut tx, order, now).await?;
        }

        tx.commit().await?;
        Ok(advanced)
    }

    // ========================================
    // Shipment ID の自己修復
    // ========================================

    /// 照会して最初の shipment id を返す。失敗はログのみ
    async fn lookup_shipment_id(&self, remote_order_id: &str) -> Option<String> {
        match bounded(self.adapter_timeout, self.shipping.get_order_details(remote_order_id)).await {
            Ok(details) => details.shipment_ids.into_iter().next(),
            Err(e) => {
                warn!(remote_order_id = %remote_order_id, "Order details lookup failed: {}", e);
                None
            }
        }
    }

    /// shipment id を保証する。欠けていれば一度だけ照会して保存し、それでも無ければ MissingShipmentId
    pub async fn ensure_shipment_id(&self, shipment: &Shipment) -> AppResult<String> {
        if let Some(id) = &shipment.shiprocket_shipment_id {
            return Ok(id.clone());
        }
        let remote_order_id = shipment
            .shiprocket_order_id
            .as_deref()
            .ok_or(AppError::MissingShipmentId)?;

        let recovered = self
            .lookup_shipment_id(remote_order_id)
            .await
            .ok_or(AppError::MissingShipmentId)?;

        sqlx::query(
            "UPDATE shipments SET shiprocket_shipment_id = ?, updated_at_ms = ? WHERE shipment_id = ? AND shiprocket_shipment_id IS NULL"
        )
        .bind(&recovered)
        .bind(store::now_ms())
        .bind(&shipment.shipment_id)
        .execute(&self.db)
        .await?;

        info!("Recovered shipment id {} for shipment {}", recovered, shipment.shipment_id);
        Ok(recovered)
    }

    // ========================================
    // assignCourier / schedulePickup
    // ========================================

    pub async fn assign_courier(
        &self,
        seller_id: &str,
        order_id: &str,
        req: &AssignCourierRequest,
        actor: &Actor,
    ) -> AppResult<Shipment> {
        let order = store::fetch_order(&self.db, seller_id, order_id).await?;
        let shipment = self.active_shipment(seller_id, order_id).await?;

        if !matches!(shipment.status, ShipmentStatus::Created | ShipmentStatus::CourierAssigned) {
            return Err(AppError::Validation(format!(
                "Courier cannot be assigned to a shipment in status '{}'",
                shipment.status
            )));
        }
        if let Some(rate) = req.courier_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(AppError::Validation("courierRate must be a non-negative number".to_string()));
            }
        }

        let remote_shipment_id = self.ensure_shipment_id(&shipment).await?;
        let assignment = bounded(
            self.adapter_timeout,
            self.shipping.assign_courier(&remote_shipment_id, req.courier_id),
        )
        .await?;

        let now = store::now_ms();
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(r#"
            UPDATE shipments SET
                shiprocket_shipment_id = ?,
                awb_code = ?,
                courier_id = ?,
                courier_name = ?,
                shipping_charge = COALESCE(?, shipping_charge),
                status = ?,
                version = version + 1,
                updated_at_ms = ?
            WHERE shipment_id = ? AND version = ?
        "#)
        .bind(&remote_shipment_id)
        .bind(&assignment.awb_code)
        .bind(req.courier_id)
        .bind(&assignment.courier_name)
        .bind(req.courier_rate)
        .bind(ShipmentStatus::CourierAssigned)
        .bind(now)
        .bind(&shipment.shipment_id)
        .bind(shipment.version)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict("Shipment"));
        }

        let note = format!("AWB {} via {}", assignment.awb_code, assignment.courier_name);
        store::append_history(
            &mut tx,
            HistoryTable::Shipment,
            &shipment.shipment_id,
            ShipmentStatus::CourierAssigned.as_str(),
            actor,
            Some(&note),
            now,
        )
        .await?;

        // 出品者負担の送料は精算時に差し引く
        if let (Some(rate), ShippingPaidBy::Seller) = (req.courier_rate, order.shipping_paid_by) {
            sqlx::query(
                "UPDATE orders SET actual_shipping_cost = ?, version = version + 1, updated_at_ms = ? WHERE order_id = ?"
            )
            .bind(rate)
            .bind(now)
            .bind(&order.order_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!("Courier assigned: shipment={}, {}", shipment.shipment_id, note);
        self.events.emit(DomainEvent::CourierAssigned {
            seller_id: order.seller_id.clone(),
            order_id: order.order_id.clone(),
            shipment_id: shipment.shipment_id.clone(),
            awb_code: assignment.awb_code,
            courier_name: assignment.courier_name,
        });

        self.reload(&shipment.shipment_id).await
    }

    pub async fn schedule_pickup(&self, seller_id: &str, order_id: &str, actor: &Actor) -> AppResult<Shipment> {
        let order = store::fetch_order(&self.db, seller_id, order_id).await?;
        let shipment = self.active_shipment(seller_id, order_id).await?;

        if !matches!(shipment.status, ShipmentStatus::CourierAssigned | ShipmentStatus::PickupScheduled) {
            return Err(AppError::Validation(format!(
                "Pickup cannot be scheduled for a shipment in status '{}'",
                shipment.status
            )));
        }
        let awb_code = shipment
            .awb_code
            .clone()
            .ok_or_else(|| AppError::Validation("Shipment has no AWB code, assign a courier first".to_string()))?;

        let remote_shipment_id = self.ensure_shipment_id(&shipment).await?;
        let outcome = bounded(self.adapter_timeout, self.shipping.schedule_pickup(&remote_shipment_id)).await?;
        let note = match &outcome {
            PickupOutcome::Scheduled { scheduled_date: Some(date) } => format!("Pickup scheduled for {}", date),
            PickupOutcome::Scheduled { scheduled_date: None } => "Pickup scheduled".to_string(),
            PickupOutcome::AlreadyScheduled => "Pickup already scheduled with provider".to_string(),
        };

        let now = store::now_ms();
        let mut tx = self.db.begin().await?;

        // pickup_scheduled_at は最初の値を保持する
        let result = sqlx::query(r#"
            UPDATE shipments SET
                status = ?,
                pickup_scheduled_at = COALESCE(pickup_scheduled_at, ?),
                version = version + 1,
                updated_at_ms = ?
            WHERE shipment_id = ? AND version = ?
        "#)
        .bind(ShipmentStatus::PickupScheduled)
        .bind(now)
        .bind(now)
        .bind(&shipment.shipment_id)
        .bind(shipment.version)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict("Shipment"));
        }

        if shipment.status != ShipmentStatus::PickupScheduled {
            store::append_history(
                &mut tx,
                HistoryTable::Shipment,
                &shipment.shipment_id,
                ShipmentStatus::PickupScheduled.as_str(),
                actor,
                Some(&note),
                now,
            )
            .await?;
        }

        let ships_order = order.status.can_transition_to(OrderStatus::Shipped);
        if ships_order {
            orders::write_transition(&mut tx, &order, OrderStatus::Shipped, actor, Some(&note), now).await?;
            let tracking = TrackingInfo {
                courier_name: shipment.courier_name.clone().unwrap_or_default(),
                tracking_number: awb_code.clone(),
                tracking_url: self.shipping.tracking_url(&awb_code),
                estimated_delivery: None,
                shipped_at_ms: now,
            };
            orders::set_tracking_info(&mut tx, &order.order_id, &tracking).await?;
        }

        tx.commit().await?;

        info!("Pickup scheduled: shipment={}, awb={}", shipment.shipment_id, awb_code);
        if ships_order {
            orders::emit_transition_events(&self.events, &order, OrderStatus::Shipped);
        }
        self.events.emit(DomainEvent::PickupScheduled {
            seller_id: order.seller_id.clone(),
            order_id: order.order_id.clone(),
            shipment_id: shipment.shipment_id.clone(),
        });

        self.reload(&shipment.shipment_id).await
    }

    // ========================================
    // Tracking / Label
    // ========================================

    /// AWB で追跡し、ステータスを同期する（同期の失敗は追跡結果を妨げない）
    pub async fn track(&self, seller_id: &str, order_id: &str) -> AppResult<(Shipment, TrackingSnapshot)> {
        store::fetch_order(&self.db, seller_id, order_id).await?;
        let shipment = self.active_shipment(seller_id, order_id).await?;
        let awb_code = shipment
            .awb_code
            .clone()
            .ok_or_else(|| AppError::Validation("Shipment has no AWB code yet".to_string()))?;

        let snapshot = bounded(self.adapter_timeout, self.shipping.track_by_awb(&awb_code)).await?;

        if let Some(remote_status) = snapshot.status {
            if let Err(e) = self.sync_from_tracking(&shipment, remote_status).await {
                warn!(shipment_id = %shipment.shipment_id, "Tracking sync failed: {}", e);
            }
        }

        let shipment = match store::fetch_shipment(&self.db, &shipment.shipment_id).await {
            Ok(Some(latest)) => latest,
            _ => shipment,
        };
        Ok((shipment, snapshot))
    }

    /// 前進する場合のみ反映。配達完了なら shipped の Order を delivered にする
    async fn sync_from_tracking(&self, shipment: &Shipment, remote: ShipmentStatus) -> AppResult<()> {
        if remote == ShipmentStatus::Cancelled || remote.progress() <= shipment.status.progress() {
            return Ok(());
        }

        let system = Actor::system();
        let order = store::fetch_order(&self.db, &shipment.seller_id, &shipment.order_id).await?;
        let delivers_order = remote == ShipmentStatus::Delivered && order.status == OrderStatus::Shipped;
        let now = store::now_ms();

        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE shipments SET status = ?, version = version + 1, updated_at_ms = ? WHERE shipment_id = ? AND version = ?"
        )
        .bind(remote)
        .bind(now)
        .bind(&shipment.shipment_id)
        .bind(shipment.version)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict("Shipment"));
        }
        store::append_history(
            &mut tx,
            HistoryTable::Shipment,
            &shipment.shipment_id,
            remote.as_str(),
            &system,
            Some("Synced from courier tracking"),
            now,
        )
        .await?;

        if delivers_order {
            orders::write_transition(
                &mut tx,
                &order,
                OrderStatus::Delivered,
                &system,
                Some("Delivered per courier tracking"),
                now,
            )
            .await?;
        }
        tx.commit().await?;

        info!("Shipment {} synced: {} -> {}", shipment.shipment_id, shipment.status, remote);
        if delivers_order {
            orders::emit_transition_events(&self.events, &order, OrderStatus::Delivered);
        }
        Ok(())
    }

    pub async fn label(&self, seller_id: &str, order_id: &str) -> AppResult<(Shipment, String)> {
        store::fetch_order(&self.db, seller_id, order_id).await?;
        let shipment = self.active_shipment(seller_id, order_id).await?;
        let remote_shipment_id = self.ensure_shipment_id(&shipment).await?;

        let label_url = bounded(self.adapter_timeout, self.shipping.generate_label(&remote_shipment_id)).await?;

        sqlx::query("UPDATE shipments SET label_url = ?, updated_at_ms = ? WHERE shipment_id = ?")
            .bind(&label_url)
            .bind(store::now_ms())
            .bind(&shipment.shipment_id)
            .execute(&self.db)
            .await?;

        let shipment = self.reload(&shipment.shipment_id).await?;
        Ok((shipment, label_url))
    }

    // ========================================
    // Serviceability
    // ========================================

    pub async fn check_serviceability(&self, seller_id: &str, order_id: &str) -> AppResult<Serviceability> {
        let order = store::fetch_order(&self.db, seller_id, order_id).await?;
        let delivery_pincode = order
            .address()
            .map(|a| a.pincode)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Order has no delivery pincode".to_string()))?;

        let pickup = self.resolve_pickup(seller_id).await?;
        let pickup_pincode = pickup.pincode.ok_or_else(|| {
            AppError::Validation(format!("Pickup location '{}' has no pincode", pickup.name))
        })?;

        let weight_grams = match store::fetch_active_shipment(&self.db, seller_id, order_id).await? {
            Some(s) => s.weight_grams,
            None => DEFAULT_WEIGHT_GRAMS,
        };

        let query = ServiceabilityQuery {
            pickup_pincode: pickup_pincode.clone(),
            delivery_pincode: delivery_pincode.clone(),
            weight_kg: weight_grams as f64 / 1000.0,
            cod: false,
        };
        let couriers = bounded(self.adapter_timeout, self.shipping.check_serviceability(&query)).await?;
        let couriers = affordable_couriers(couriers, order.shipping_paid_by, order.shipping_cost);

        Ok(Serviceability { couriers, pickup_pincode, delivery_pincode })
    }

    // ========================================
    // Remote cancel（ベストエフォート）
    // ========================================

    /// リモートの出荷を取り消す。失敗はログのみで false を返す
    pub async fn cancel_shiprocket_order(&self, shipment: &Shipment) -> bool {
        let Some(remote_order_id) = shipment.shiprocket_order_id.as_deref() else {
            return false;
        };
        match bounded(self.adapter_timeout, self.shipping.cancel_order(remote_order_id)).await {
            Ok(()) => {
                info!("Shiprocket order {} cancelled", remote_order_id);
                true
            }
            Err(e) => {
                warn!(
                    shipment_id = %shipment.shipment_id,
                    remote_order_id = %remote_order_id,
                    "Shiprocket cancel failed: {}", e
                );
                false
            }
        }
    }

    // ========================================
    // Pickup locations
    // ========================================

    pub async fn list_pickup_locations(&self, seller_id: &str) -> AppResult<PickupLocations> {
        let locations = bounded(self.adapter_timeout, self.shipping.get_pickup_locations()).await?;
        let registered = store::fetch_seller(&self.db, seller_id)
            .await?
            .and_then(|s| s.pickup_location);
        Ok(PickupLocations { locations, registered })
    }

    pub async fn register_pickup_location(&self, seller_id: &str, req: &PickupLocationRequest) -> AppResult<()> {
        validate_pickup_location(req)?;
        bounded(self.adapter_timeout, self.shipping.add_pickup_location(req)).await?;
        store::upsert_seller_pickup(&self.db, seller_id, &req.name, Some(&req.pincode)).await?;
        info!("Pickup location '{}' registered for seller {}", req.name, seller_id);
        Ok(())
    }

    pub async fn update_pickup_location(
        &self,
        seller_id: &str,
        name: &str,
        req: &PickupLocationRequest,
    ) -> AppResult<()> {
        let mut location = req.clone();
        location.name = name.to_string();
        validate_pickup_location(&location)?;
        bounded(self.adapter_timeout, self.shipping.update_pickup_location(&location)).await?;
        store::upsert_seller_pickup(&self.db, seller_id, &location.name, Some(&location.pincode)).await?;
        info!("Pickup location '{}' updated for seller {}", location.name, seller_id);
        Ok(())
    }

    // ========================================
    // ヘルパー
    // ========================================

    async fn active_shipment(&self, seller_id: &str, order_id: &str) -> AppResult<Shipment> {
        store::fetch_active_shipment(&self.db, seller_id, order_id)
            .await?
            .ok_or(AppError::NotFound("Shipment"))
    }

    async fn reload(&self, shipment_id: &str) -> AppResult<Shipment> {
        store::fetch_shipment(&self.db, shipment_id)
            .await?
            .ok_or(AppError::NotFound("Shipment"))
    }

    /// 登録済みの集荷拠点を優先。未登録ならプロバイダ側の有効かつ電話認証済みの拠点を使う
    async fn resolve_pickup(&self, seller_id: &str) -> AppResult<ResolvedPickup> {
        let seller = store::fetch_seller(&self.db, seller_id).await?;
        let registered = seller
            .as_ref()
            .and_then(|s| s.pickup_location.clone())
            .filter(|name| !name.trim().is_empty());

        if let Some(name) = registered {
            let mut pincode = seller.and_then(|s| s.pickup_pincode);
            match bounded(self.adapter_timeout, self.shipping.get_pickup_locations()).await {
                Ok(locations) => {
                    if let Some(remote) = locations.into_iter().find(|l| l.name == name) {
                        if !remote.phone_verified {
                            return Err(AppError::PickupUnverified(name));
                        }
                        pincode = pincode.or(remote.pincode);
                    }
                }
                Err(e) => warn!(seller_id = %seller_id, "Pickup location check failed: {}", e),
            }
            return Ok(ResolvedPickup { name, pincode });
        }

        let locations = bounded(self.adapter_timeout, self.shipping.get_pickup_locations()).await?;
        if let Some(found) = locations.iter().find(|l| l.active && l.phone_verified) {
            info!("Using provider pickup location '{}' for seller {}", found.name, seller_id);
            return Ok(ResolvedPickup { name: found.name.clone(), pincode: found.pincode.clone() });
        }
        match locations.into_iter().find(|l| l.active) {
            Some(unverified) => Err(AppError::PickupUnverified(unverified.name)),
            None => Err(AppError::NoPickupLocation),
        }
    }
}

/// 顧客負担の場合、支払済み送料を超える業者は除外する。料金の安い順
pub fn affordable_couriers(
    mut couriers: Vec<CourierOption>,
    paid_by: ShippingPaidBy,
    shipping_paid: f64,
) -> Vec<CourierOption> {
    if paid_by == ShippingPaidBy::Customer {
        couriers.retain(|c| c.rate <= shipping_paid);
    }
    couriers.sort_by(|a, b| a.rate.total_cmp(&b.rate));
    couriers
}

fn validate_pickup_location(req: &PickupLocationRequest) -> AppResult<()> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("Pickup location name is required".to_string()));
    }
    if req.pincode.len() != 6 || !req.pincode.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation("Pincode must be 6 digits".to_string()));
    }
    let digits = req.phone.chars().filter(char::is_ascii_digit).count();
    if digits < 10 {
        return Err(AppError::Validation("Phone number must have at least 10 digits".to_string()));
    }
    if req.address.trim().len() < 10 {
        return Err(AppError::Validation("Address must be at least 10 characters".to_string()));
    }
    Ok(())
}

/// ローカル Shipment をキャンセル済みにする（Order キャンセルのトランザクション内）
pub(crate) async fn mark_cancelled(
    conn: &mut SqliteConnection,
    shipment: &Shipment,
    actor: &Actor,
    note: &str,
    now: i64,
) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE shipments SET status = ?, version = version + 1, updated_at_ms = ? WHERE shipment_id = ? AND version = ?"
    )
    .bind(ShipmentStatus::Cancelled)
    .bind(now)
    .bind(&shipment.shipment_id)
    .bind(shipment.version)
    .execute(&mut *conn)
    .await?;

    // 読み取り後に追跡同期などで進んでいた場合はキャンセルごと中止
    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Shipment"));
    }

    store::append_history(
        conn,
        HistoryTable::Shipment,
        &shipment.shipment_id,
        ShipmentStatus::Cancelled.as_str(),
        actor,
        Some(note),
        now,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn courier(id: i64, rate: f64) -> CourierOption {
        CourierOption {
            courier_id: id,
            courier_name: format!("Courier {}", id),
            rate,
            estimated_days: Some(3),
            rating: None,
        }
    }

    #[test]
    fn weight_is_clamped() {
        assert_eq!(clamp_weight(None), DEFAULT_WEIGHT_GRAMS);
        assert_eq!(clamp_weight(Some(0.0)), DEFAULT_WEIGHT_GRAMS);
        assert_eq!(clamp_weight(Some(f64::NAN)), DEFAULT_WEIGHT_GRAMS);
        assert_eq!(clamp_weight(Some(10.0)), MIN_WEIGHT_GRAMS);
        assert_eq!(clamp_weight(Some(-5.0)), MIN_WEIGHT_GRAMS);
        assert_eq!(clamp_weight(Some(1_000_000.0)), MAX_WEIGHT_GRAMS);
        assert_eq!(clamp_weight(Some(750.4)), 750);
    }

    #[test]
    fn dimensions_are_clamped() {
        assert_eq!(clamp_dimension(None), DEFAULT_DIMENSION_CM);
        assert_eq!(clamp_dimension(Some(0.2)), MIN_DIMENSION_CM);
        assert_eq!(clamp_dimension(Some(999.0)), MAX_DIMENSION_CM);
        assert_eq!(clamp_dimension(Some(35.5)), 35.5);
    }

    #[test]
    fn customer_paid_shipping_filters_expensive_couriers() {
        let couriers = vec![courier(1, 150.0), courier(2, 80.0), courier(3, 100.0)];
        let filtered = affordable_couriers(couriers.clone(), ShippingPaidBy::Customer, 100.0);
        let ids: Vec<i64> = filtered.iter().map(|c| c.courier_id).collect();
        assert_eq!(ids, vec![2, 3]);

        let all = affordable_couriers(couriers, ShippingPaidBy::Seller, 0.0);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].courier_id, 2);
    }

    #[test]
    fn pickup_location_validation() {
        let mut req = PickupLocationRequest {
            name: "Warehouse-1".to_string(),
            contact_name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            phone: "9876543210".to_string(),
            address: "12 Market Road, Sector 4".to_string(),
            address_2: None,
            city: "Pune".to_string(),
            state: "Maharashtra".to_string(),
            pincode: "411001".to_string(),
            country: "India".to_string(),
        };
        assert!(validate_pickup_location(&req).is_ok());
        req.pincode = "4110".to_string();
        assert!(validate_pickup_location(&req).is_err());
    }
}
