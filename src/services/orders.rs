//! Order State Machine
//! ステータス遷移・在庫戻し・キャンセル時返金

use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::payment::refund_id_for;
use crate::adapters::{bounded, PaymentGateway, RefundRequest};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::events::{DomainEvent, EventBus, RefundOutcome};
use crate::models::{
    Actor, Order, OrderResponse, OrderStatus, PaymentStatus, ShipOrderRequest, TrackingInfo,
};
use crate::services::shipments::{self, ShipmentService};
use crate::store::{self, HistoryTable};

pub struct OrderService {
    db: DbPool,
    payments: Arc<dyn PaymentGateway>,
    shipments: Arc<ShipmentService>,
    events: EventBus,
    adapter_timeout: Duration,
}

impl OrderService {
    pub fn new(
        db: DbPool,
        payments: Arc<dyn PaymentGateway>,
        shipments: Arc<ShipmentService>,
        events: EventBus,
        adapter_timeout: Duration,
    ) -> Self {
        Self { db, payments, shipments, events, adapter_timeout }
    }

    pub async fn get(&self, seller_id: &str, order_id: &str) -> AppResult<OrderResponse> {
        let order = store::fetch_order(&self.db, seller_id, order_id).await?;
        store::order_view(&self.db, &order).await
    }

    /// ステータス遷移。cancelled への遷移はキャンセル処理一式を行う
    pub async fn transition(
        &self,
        seller_id: &str,
        order_id: &str,
        target: OrderStatus,
        actor: &Actor,
        note: Option<&str>,
    ) -> AppResult<Order> {
        let order = store::fetch_order(&self.db, seller_id, order_id).await?;
        ensure_transition(order.status, target)?;

        if target == OrderStatus::Cancelled {
            return self.cancel(order, actor, note).await;
        }

        let now = store::now_ms();
        let mut tx = self.db.begin().await?;
        write_transition(&mut tx, &order, target, actor, note, now).await?;
        tx.commit().await?;

        info!("Order {} status: {} -> {}", order.order_id, order.status, target);
        emit_transition_events(&self.events, &order, target);

        store::fetch_order(&self.db, seller_id, order_id).await
    }

    /// 手動出荷（配送業者と追跡番号を出品者が入力）
    pub async fn ship(
        &self,
        seller_id: &str,
        order_id: &str,
        req: &ShipOrderRequest,
        actor: &Actor,
    ) -> AppResult<Order> {
        let courier_name = req.courier_name.trim();
        let tracking_number = req.tracking_number.trim();
        if courier_name.is_empty() || tracking_number.is_empty() {
            return Err(AppError::Validation(
                "courierName and trackingNumber are required".to_string(),
            ));
        }

        let order = store::fetch_order(&self.db, seller_id, order_id).await?;
        ensure_transition(order.status, OrderStatus::Shipped)?;

        let now = store::now_ms();
        let tracking = TrackingInfo {
            courier_name: courier_name.to_string(),
            tracking_number: tracking_number.to_string(),
            tracking_url: req.tracking_url.clone(),
            estimated_delivery: req.estimated_delivery.clone(),
            shipped_at_ms: now,
        };
        let note = format!("Shipped via {} ({})", tracking.courier_name, tracking.tracking_number);

        let mut tx = self.db.begin().await?;
        write_transition(&mut tx, &order, OrderStatus::Shipped, actor, Some(&note), now).await?;
        set_tracking_info(&mut tx, &order.order_id, &tracking).await?;
        tx.commit().await?;

        info!("Order {} shipped manually: {}", order.order_id, note);
        emit_transition_events(&self.events, &order, OrderStatus::Shipped);

        store::fetch_order(&self.db, seller_id, order_id).await
    }

    // ========================================
    // Cancellation
    // ========================================

    async fn cancel(&self, order: Order, actor: &Actor, note: Option<&str>) -> AppResult<Order> {
        let shipment = store::fetch_active_shipment(&self.db, &order.seller_id, &order.order_id).await?;

        // 配送業者が荷物を持っている場合はキャンセル不可
        if let Some(s) = &shipment {
            if s.status.courier_has_custody() {
                return Err(AppError::CancellationBlocked(s.status));
            }
        }

        let items = store::fetch_order_items(&self.db, &order.order_id).await?;
        let now = store::now_ms();

        // 遷移・履歴・在庫戻し・ローカル Shipment のキャンセルは 1 トランザクション
        let mut tx = self.db.begin().await?;
        write_transition(&mut tx, &order, OrderStatus::Cancelled, actor, note, now).await?;
        store::restore_stock(&mut tx, &order, &items, now).await?;
        if let Some(s) = &shipment {
            shipments::mark_cancelled(&mut tx, s, actor, "Order cancelled", now).await?;
        }
        tx.commit().await?;

        info!("Order {} cancelled by {}", order.order_id, actor.id);

        if let Some(s) = &shipment {
            self.shipments.cancel_shiprocket_order(s).await;
        }

        let refund = self.refund_cancelled(&order).await?;

        emit_transition_events(&self.events, &order, OrderStatus::Cancelled);
        self.events.emit(DomainEvent::OrderCancelled {
            seller_id: order.seller_id.clone(),
            order_id: order.order_id.clone(),
            order_number: order.order_number.clone(),
            customer_id: order.customer_id.clone(),
            refund,
        });

        store::fetch_order(&self.db, &order.seller_id, &order.order_id).await
    }

    /// キャンセル時の返金。失敗しても注文のキャンセルは取り消さず refund_pending を残す
    async fn refund_cancelled(&self, order: &Order) -> AppResult<RefundOutcome> {
        if order.payment_status != PaymentStatus::Paid {
            return Ok(RefundOutcome::NotApplicable);
        }
        let Some(gateway_order_id) = order.gateway_order_id.as_deref() else {
            warn!("Paid order {} has no gateway reference, refund skipped", order.order_id);
            return Ok(RefundOutcome::NotApplicable);
        };

        // ゲートウェイ上の金額を超えて返金しない
        let amount = match bounded(self.adapter_timeout, self.payments.get_order(gateway_order_id)).await {
            Ok(gateway_order) => order.total_amount.min(gateway_order.order_amount),
            Err(e) => {
                warn!(
                    order_id = %order.order_id,
                    "Gateway order lookup failed, refunding order total: {}", e
                );
                order.total_amount
            }
        };

        let request = RefundRequest {
            gateway_order_id: gateway_order_id.to_string(),
            amount,
            refund_id: refund_id_for("RF", &order.order_id),
            note: format!("Refund for cancelled order {}", order.order_number),
        };

        let result = bounded(self.adapter_timeout, self.payments.create_refund(&request)).await;
        let now = store::now_ms();
        let mut conn = self.db.acquire().await?;

        match result {
            Ok(receipt) => {
                store::advance_payment_status(
                    &mut conn,
                    &order.order_id,
                    PaymentStatus::Refunded,
                    Some(&receipt.refund_id),
                    now,
                )
                .await?;
                info!("Refund {} issued for order {}: {:.2}", receipt.refund_id, order.order_id, amount);
                Ok(RefundOutcome::Refunded { refund_id: receipt.refund_id, amount })
            }
            Err(e) => {
                store::advance_payment_status(
                    &mut conn,
                    &order.order_id,
                    PaymentStatus::RefundPending,
                    None,
                    now,
                )
                .await?;
                warn!(order_id = %order.order_id, "Refund failed, left as refund_pending: {}", e);
                let reason = e.to_string();
                self.events.emit(DomainEvent::RefundFailed {
                    seller_id: order.seller_id.clone(),
                    order_id: order.order_id.clone(),
                    entity_id: order.order_id.clone(),
                    reason: reason.clone(),
                });
                Ok(RefundOutcome::Pending { reason })
            }
        }
    }
}

// ========================================
// 遷移の書き込み（Shipment 側からも使う）
// ========================================

pub(crate) fn ensure_transition(from: OrderStatus, to: OrderStatus) -> AppResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            entity: "order",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// version 条件付きで status を更新し、同じトランザクションで履歴を追記する
pub(crate) async fn write_transition(
    conn: &mut SqliteConnection,
    order: &Order,
    target: OrderStatus,
    actor: &Actor,
    note: Option<&str>,
    now: i64,
) -> AppResult<()> {
    let shipped_at = match target {
        OrderStatus::Shipped => order.shipped_at.or(Some(now)),
        _ => order.shipped_at,
    };
    let delivered_at = if target == OrderStatus::Delivered { Some(now) } else { order.delivered_at };
    let cancelled_at = if target == OrderStatus::Cancelled { Some(now) } else { order.cancelled_at };

    let result = sqlx::query(r#"
        UPDATE orders SET
            status = ?,
            shipped_at = ?,
            delivered_at = ?,
            cancelled_at = ?,
            version = version + 1,
            updated_at_ms = ?
        WHERE order_id = ? AND seller_id = ? AND version = ?
    "#)
    .bind(target)
    .bind(shipped_at)
    .bind(delivered_at)
    .bind(cancelled_at)
    .bind(now)
    .bind(&order.order_id)
    .bind(&order.seller_id)
    .bind(order.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Order"));
    }

    store::append_history(conn, HistoryTable::Order, &order.order_id, target.as_str(), actor, note, now)
        .await?;
    Ok(())
}

/// 状態は変えずに version だけ進める（読み取り以降に変更されていないことの確認）
pub(crate) async fn claim_version(conn: &mut SqliteConnection, order: &Order, now: i64) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE orders SET version = version + 1, updated_at_ms = ? WHERE order_id = ? AND version = ?"
    )
    .bind(now)
    .bind(&order.order_id)
    .bind(order.version)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Order"));
    }
    Ok(())
}

pub(crate) async fn set_tracking_info(
    conn: &mut SqliteConnection,
    order_id: &str,
    tracking: &TrackingInfo,
) -> AppResult<()> {
    let json = serde_json::to_string(tracking)
        .map_err(|e| AppError::Internal(format!("tracking serialization: {}", e)))?;
    sqlx::query("UPDATE orders SET tracking_info = ? WHERE order_id = ?")
        .bind(json)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) fn emit_transition_events(events: &EventBus, order: &Order, to: OrderStatus) {
    events.emit(DomainEvent::OrderStatusChanged {
        seller_id: order.seller_id.clone(),
        order_id: order.order_id.clone(),
        order_number: order.order_number.clone(),
        customer_id: order.customer_id.clone(),
        from: order.status,
        to,
    });
    if to == OrderStatus::Delivered {
        events.emit(DomainEvent::OrderDelivered {
            seller_id: order.seller_id.clone(),
            order_id: order.order_id.clone(),
            order_number: order.order_number.clone(),
            customer_id: order.customer_id.clone(),
        });
    }
}
