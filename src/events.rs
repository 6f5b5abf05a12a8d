//! Domain Events
//! 状態遷移から発行されるイベントと、通知・アクティビティ記録を行うディスパッチャ

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::OrderStatus;

/// キャンセル時の返金結果
#[derive(Debug, Clone, PartialEq)]
pub enum RefundOutcome {
    /// 未払い、または決済参照なし
    NotApplicable,
    Refunded { refund_id: String, amount: f64 },
    /// 返金失敗。payment_status = refund_pending で手動照合待ち
    Pending { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    OrderStatusChanged {
        seller_id: String,
        order_id: String,
        order_number: String,
        customer_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderCancelled {
        seller_id: String,
        order_id: String,
        order_number: String,
        customer_id: String,
        refund: RefundOutcome,
    },
    OrderDelivered {
        seller_id: String,
        order_id: String,
        order_number: String,
        customer_id: String,
    },
    ShipmentCreated {
        seller_id: String,
        order_id: String,
        shipment_id: String,
        warning: Option<String>,
    },
    CourierAssigned {
        seller_id: String,
        order_id: String,
        shipment_id: String,
        awb_code: String,
        courier_name: String,
    },
    PickupScheduled {
        seller_id: String,
        order_id: String,
        shipment_id: String,
    },
    ReturnApproved {
        seller_id: String,
        return_id: String,
        order_id: String,
        customer_id: String,
    },
    ReturnRejected {
        seller_id: String,
        return_id: String,
        order_id: String,
        customer_id: String,
        reason: String,
    },
    ReturnRefunded {
        seller_id: String,
        return_id: String,
        order_id: String,
        customer_id: String,
        refund_id: String,
        amount: f64,
    },
    ReturnExchanged {
        seller_id: String,
        return_id: String,
        order_id: String,
        customer_id: String,
    },
    RefundFailed {
        seller_id: String,
        order_id: String,
        entity_id: String,
        reason: String,
    },
}

/// 通知 1 件分
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub user_id: String,
    pub kind: &'static str,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderStatusChanged { .. } => "order_status_changed",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::OrderDelivered { .. } => "order_delivered",
            Self::ShipmentCreated { .. } => "shipment_created",
            Self::CourierAssigned { .. } => "courier_assigned",
            Self::PickupScheduled { .. } => "pickup_scheduled",
            Self::ReturnApproved { .. } => "return_approved",
            Self::ReturnRejected { .. } => "return_rejected",
            Self::ReturnRefunded { .. } => "return_refunded",
            Self::ReturnExchanged { .. } => "return_exchanged",
            Self::RefundFailed { .. } => "refund_failed",
        }
    }

    pub fn seller_id(&self) -> &str {
        match self {
            Self::OrderStatusChanged { seller_id, .. }
            | Self::OrderCancelled { seller_id, .. }
            | Self::OrderDelivered { seller_id, .. }
            | Self::ShipmentCreated { seller_id, .. }
            | Self::CourierAssigned { seller_id, .. }
            | Self::PickupScheduled { seller_id, .. }
            | Self::ReturnApproved { seller_id, .. }
            | Self::ReturnRejected { seller_id, .. }
            | Self::ReturnRefunded { seller_id, .. }
            | Self::ReturnExchanged { seller_id, .. }
            | Self::RefundFailed { seller_id, .. } => seller_id,
        }
    }

    /// activity_log に記録する対象 ID
    pub fn entity_id(&self) -> &str {
        match self {
            Self::OrderStatusChanged { order_id, .. }
            | Self::OrderCancelled { order_id, .. }
            | Self::OrderDelivered { order_id, .. } => order_id,
            Self::ShipmentCreated { shipment_id, .. }
            | Self::CourierAssigned { shipment_id, .. }
            | Self::PickupScheduled { shipment_id, .. } => shipment_id,
            Self::ReturnApproved { return_id, .. }
            | Self::ReturnRejected { return_id, .. }
            | Self::ReturnRefunded { return_id, .. }
            | Self::ReturnExchanged { return_id, .. } => return_id,
            Self::RefundFailed { entity_id, .. } => entity_id,
        }
    }

    /// 送るべき通知（顧客向け、返金失敗は出品者向け）
    pub fn notification(&self) -> Option<Notification> {
        match self {
            Self::OrderStatusChanged { order_id, order_number, customer_id, to, .. } => {
                // delivered / cancelled は専用イベントで通知する
                if matches!(to, OrderStatus::Delivered | OrderStatus::Cancelled) {
                    return None;
                }
                Some(Notification {
                    user_id: customer_id.clone(),
                    kind: "order_update",
                    title: format!("Order {} is {}", order_number, to),
                    message: format!("Your order {} is now {}.", order_number, to),
                    link: Some(format!("/orders/{}", order_id)),
                })
            }
            Self::OrderCancelled { order_id, order_number, customer_id, refund, .. } => {
                let refund_note = match refund {
                    RefundOutcome::Refunded { amount, .. } => format!(" A refund of {:.2} has been initiated.", amount),
                    RefundOutcome::Pending { .. } => " Your refund is being processed.".to_string(),
                    RefundOutcome::NotApplicable => String::new(),
                };
                Some(Notification {
                    user_id: customer_id.clone(),
                    kind: "order_cancelled",
                    title: format!("Order {} cancelled", order_number),
                    message: format!("Your order {} has been cancelled.{}", order_number, refund_note),
                    link: Some(format!("/orders/{}", order_id)),
                })
            }
            Self::OrderDelivered { order_id, order_number, customer_id, .. } => Some(Notification {
                user_id: customer_id.clone(),
                kind: "order_delivered",
                title: format!("Order {} delivered", order_number),
                message: format!("Your order {} has been delivered.", order_number),
                link: Some(format!("/orders/{}", order_id)),
            }),
            Self::ReturnApproved { return_id, customer_id, .. } => Some(Notification {
                user_id: customer_id.clone(),
                kind: "return_update",
                title: "Return request approved".to_string(),
                message: "Your return request has been approved by the seller.".to_string(),
                link: Some(format!("/returns/{}", return_id)),
            }),
            Self::ReturnRejected { return_id, customer_id, reason, .. } => Some(Notification {
                user_id: customer_id.clone(),
                kind: "return_update",
                title: "Return request rejected".to_string(),
                message: format!("Your return request was rejected: {}", reason),
                link: Some(format!("/returns/{}", return_id)),
            }),
            Self::ReturnRefunded { return_id, customer_id, amount, .. } => Some(Notification {
                user_id: customer_id.clone(),
                kind: "return_update",
                title: "Refund initiated".to_string(),
                message: format!("A refund of {:.2} for your return has been initiated.", amount),
                link: Some(format!("/returns/{}", return_id)),
            }),
            Self::ReturnExchanged { return_id, customer_id, .. } => Some(Notification {
                user_id: customer_id.clone(),
                kind: "return_update",
                title: "Exchange completed".to_string(),
                message: "Your exchange has been processed.".to_string(),
                link: Some(format!("/returns/{}", return_id)),
            }),
            Self::RefundFailed { seller_id, order_id, reason, .. } => Some(Notification {
                user_id: seller_id.clone(),
                kind: "refund_failed",
                title: "Refund needs attention".to_string(),
                message: format!("Refund for order {} failed: {}", order_id, reason),
                link: Some(format!("/orders/{}", order_id)),
            }),
            Self::ShipmentCreated { .. } | Self::CourierAssigned { .. } | Self::PickupScheduled { .. } => None,
        }
    }
}

// ========================================
// Event Bus
// ========================================

/// イベント送信側。送信失敗で呼び出し元を失敗させない
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!("Event dropped, dispatcher is not running: {}", e.0.kind());
        }
    }
}

/// イベントを受け取り通知・アクティビティを記録するタスクを起動
pub fn spawn_dispatcher(db: DbPool, mut rx: mpsc::UnboundedReceiver<DomainEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            dispatch(&db, &event).await;
        }
        info!("Event dispatcher stopped");
    })
}

/// 1 イベント分の副作用。失敗はログのみ
pub async fn dispatch(db: &DbPool, event: &DomainEvent) {
    let now = chrono::Utc::now().timestamp_millis();

    info!(
        target: "activity",
        seller_id = %event.seller_id(),
        entity_id = %event.entity_id(),
        "{}",
        event.kind()
    );

    let detail = format!("{:?}", event);
    if let Err(e) = sqlx::query(
        "INSERT INTO activity_log (activity_id, seller_id, event, entity_id, detail, created_at_ms) VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(Uuid::new_v4().to_string())
    .bind(event.seller_id())
    .bind(event.kind())
    .bind(event.entity_id())
    .bind(&detail)
    .bind(now)
    .execute(db)
    .await
    {
        warn!("Failed to record activity {}: {}", event.kind(), e);
    }

    if let Some(n) = event.notification() {
        if let Err(e) = sqlx::query(
            "INSERT INTO notifications (notification_id, user_id, kind, title, message, link, created_at_ms) VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&n.user_id)
        .bind(n.kind)
        .bind(&n.title)
        .bind(&n.message)
        .bind(&n.link)
        .bind(now)
        .execute(db)
        .await
        {
            warn!("Failed to send notification to {}: {}", n.user_id, e);
        }
    }
}
