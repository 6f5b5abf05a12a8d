//! Return / Exchange Workflow
//! 配達後の返品・交換。受領時に返品なら返金、交換なら完了

use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::payment::refund_id_for;
use crate::adapters::{bounded, PaymentGateway, RefundRequest};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::events::{DomainEvent, EventBus};
use crate::models::{
    Actor, NewReturnRequest, Order, OrderStatus, PaymentStatus, ReturnRequest, ReturnStatus,
    ReturnType,
};
use crate::store::{self, HistoryTable};

/// 遷移時に合わせて書き込む項目
#[derive(Default)]
struct Resolution<'a> {
    refund_id: Option<&'a str>,
    rejection_reason: Option<&'a str>,
}

pub struct ReturnWorkflow {
    db: DbPool,
    payments: Arc<dyn PaymentGateway>,
    events: EventBus,
    adapter_timeout: Duration,
}

impl ReturnWorkflow {
    pub fn new(
        db: DbPool,
        payments: Arc<dyn PaymentGateway>,
        events: EventBus,
        adapter_timeout: Duration,
    ) -> Self {
        Self { db, payments, events, adapter_timeout }
    }

    pub async fn get(&self, seller_id: &str, return_id: &str) -> AppResult<ReturnRequest> {
        store::fetch_return(&self.db, seller_id, return_id).await
    }

    /// 顧客側フローから返品申請を登録する（配達済みの Order のみ）
    pub async fn open(&self, new: &NewReturnRequest) -> AppResult<ReturnRequest> {
        let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE order_id = ?")
            .bind(&new.order_id)
            .fetch_optional(&self.db)
            .await?;
        // 他の顧客の Order は存在しないものとして扱う
        let order = order
            .filter(|o| o.customer_id == new.customer_id)
            .ok_or(AppError::NotFound("Order"))?;

        if order.status != OrderStatus::Delivered {
            return Err(AppError::Validation(
                "Returns can only be requested for delivered orders".to_string(),
            ));
        }
        if !new.refund_amount.is_finite()
            || new.refund_amount < 0.0
            || new.refund_amount > order.total_amount
        {
            return Err(AppError::Validation(format!(
                "Refund amount must be between 0 and the order total ({:.2})",
                order.total_amount
            )));
        }

        let return_id = store::generate_id("RET");
        let now = store::now_ms();
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(r#"
            INSERT INTO return_requests (
                return_id, order_id, customer_id, seller_id, return_type, status,
                reason, refund_amount, version, created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#)
        .bind(&return_id)
        .bind(&order.order_id)
        .bind(&order.customer_id)
        .bind(&order.seller_id)
        .bind(new.return_type)
        .bind(ReturnStatus::Requested)
        .bind(&new.reason)
        .bind(new.refund_amount)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return Err(AppError::Validation(
                        "An active return request already exists for this order".to_string(),
                    ));
                }
            }
            return Err(e.into());
        }

        store::append_history(
            &mut tx,
            HistoryTable::Return,
            &return_id,
            ReturnStatus::Requested.as_str(),
            &Actor::customer(&order.customer_id),
            new.reason.as_deref(),
            now,
        )
        .await?;
        set_order_return_status(&mut tx, &order.order_id, ReturnStatus::Requested.as_str(), now).await?;
        tx.commit().await?;

        info!("Return request {} opened for order {}", return_id, order.order_id);
        store::fetch_return(&self.db, &order.seller_id, &return_id).await
    }

    pub async fn approve(&self, seller_id: &str, return_id: &str, actor: &Actor) -> AppResult<ReturnRequest> {
        let request = self
            .advance(seller_id, return_id, ReturnStatus::Approved, actor, None, Resolution::default())
            .await?;

        self.events.emit(DomainEvent::ReturnApproved {
            seller_id: request.seller_id.clone(),
            return_id: request.return_id.clone(),
            order_id: request.order_id.clone(),
            customer_id: request.customer_id.clone(),
        });
        Ok(request)
    }

    pub async fn reject(
        &self,
        seller_id: &str,
        return_id: &str,
        reason: Option<&str>,
        actor: &Actor,
    ) -> AppResult<ReturnRequest> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AppError::Validation("A rejection reason is required".to_string()))?;

        let request = self
            .advance(
                seller_id,
                return_id,
                ReturnStatus::Rejected,
                actor,
                Some(reason),
                Resolution { rejection_reason: Some(reason), ..Default::default() },
            )
            .await?;

        self.events.emit(DomainEvent::ReturnRejected {
            seller_id: request.seller_id.clone(),
            return_id: request.return_id.clone(),
            order_id: request.order_id.clone(),
            customer_id: request.customer_id.clone(),
            reason: reason.to_string(),
        });
        Ok(request)
    }

    /// 顧客が返送した
    pub async fn mark_shipped_back(&self, seller_id: &str, return_id: &str, actor: &Actor) -> AppResult<ReturnRequest> {
        self.advance(seller_id, return_id, ReturnStatus::ShippedBack, actor, None, Resolution::default())
            .await
    }

    /// 受領。返品は返金、交換はそのまま完了まで進める
    pub async fn mark_received(&self, seller_id: &str, return_id: &str, actor: &Actor) -> AppResult<ReturnRequest> {
        let request = self
            .advance(seller_id, return_id, ReturnStatus::Received, actor, None, Resolution::default())
            .await?;

        match request.return_type {
            ReturnType::Exchange => self.complete_exchange(request, actor).await,
            ReturnType::Return => self.refund_return(request, actor).await,
        }
    }

    /// 返金に失敗して received のまま残った返品の返金をやり直す（同じ返金IDを使う）
    pub async fn retry_refund(&self, seller_id: &str, return_id: &str, actor: &Actor) -> AppResult<ReturnRequest> {
        let request = store::fetch_return(&self.db, seller_id, return_id).await?;
        if request.return_type != ReturnType::Return {
            return Err(AppError::Validation("Only returns can be refunded, not exchanges".to_string()));
        }
        ensure_transition(request.status, ReturnStatus::Refunded)?;

        info!("Retrying refund for return {}", request.return_id);
        self.refund_return(request, actor).await
    }

    async fn complete_exchange(&self, request: ReturnRequest, actor: &Actor) -> AppResult<ReturnRequest> {
        let now = store::now_ms();
        let mut tx = self.db.begin().await?;
        write_transition(
            &mut tx,
            &request,
            ReturnStatus::Exchanged,
            actor,
            Some("Exchange completed"),
            &Resolution::default(),
            now,
        )
        .await?;
        set_order_return_status(&mut tx, &request.order_id, "completed", now).await?;
        tx.commit().await?;

        info!("Return {} exchanged", request.return_id);
        self.events.emit(DomainEvent::ReturnExchanged {
            seller_id: request.seller_id.clone(),
            return_id: request.return_id.clone(),
            order_id: request.order_id.clone(),
            customer_id: request.customer_id.clone(),
        });
        store::fetch_return(&self.db, &request.seller_id, &request.return_id).await
    }

    /// 返金に失敗しても received のまま残し、履歴に記録して出品者へ通知する
    async fn refund_return(&self, request: ReturnRequest, actor: &Actor) -> AppResult<ReturnRequest> {
        let order = store::fetch_order(&self.db, &request.seller_id, &request.order_id).await?;

        let gateway_order_id = match order.gateway_order_id.as_deref() {
            Some(id) if request.refund_amount > 0.0 => id,
            _ => {
                let reason = if request.refund_amount > 0.0 {
                    "Manual refund required: order has no gateway payment reference"
                } else {
                    "Manual refund required: refund amount is zero"
                };
                warn!(return_id = %request.return_id, "{}", reason);
                self.record_refund_problem(&request, actor, reason).await?;
                return store::fetch_return(&self.db, &request.seller_id, &request.return_id).await;
            }
        };

        let refund = RefundRequest {
            gateway_order_id: gateway_order_id.to_string(),
            amount: request.refund_amount,
            refund_id: refund_id_for("RET", &request.return_id),
            note: format!("Return {} for order {}", request.return_id, order.order_number),
        };

        match bounded(self.adapter_timeout, self.payments.create_refund(&refund)).await {
            Ok(receipt) => {
                let now = store::now_ms();
                let mut tx = self.db.begin().await?;
                write_transition(
                    &mut tx,
                    &request,
                    ReturnStatus::Refunded,
                    actor,
                    Some(&format!("Refund {} initiated", receipt.refund_id)),
                    &Resolution { refund_id: Some(&receipt.refund_id), ..Default::default() },
                    now,
                )
                .await?;
                let moved = store::advance_payment_status(
                    &mut tx,
                    &order.order_id,
                    PaymentStatus::RefundPending,
                    Some(&receipt.refund_id),
                    now,
                )
                .await?;
                if !moved {
                    info!(
                        "Order {} payment status left at '{}', refund id {} recorded",
                        order.order_id, order.payment_status.as_str(), receipt.refund_id
                    );
                }
                set_order_return_status(&mut tx, &order.order_id, ReturnStatus::Refunded.as_str(), now).await?;
                tx.commit().await?;

                info!("Return {} refunded: {} ({:.2})", request.return_id, receipt.refund_id, refund.amount);
                self.events.emit(DomainEvent::ReturnRefunded {
                    seller_id: request.seller_id.clone(),
                    return_id: request.return_id.clone(),
                    order_id: request.order_id.clone(),
                    customer_id: request.customer_id.clone(),
                    refund_id: receipt.refund_id,
                    amount: refund.amount,
                });
            }
            Err(e) => {
                warn!(return_id = %request.return_id, "Return refund failed: {}", e);
                self.record_refund_problem(&request, actor, &format!("Refund failed: {}", e))
                    .await?;
            }
        }

        store::fetch_return(&self.db, &request.seller_id, &request.return_id).await
    }

    /// received のまま履歴にメモを残し、出品者に知らせる
    async fn record_refund_problem(&self, request: &ReturnRequest, actor: &Actor, note: &str) -> AppResult<()> {
        let now = store::now_ms();
        let mut tx = self.db.begin().await?;
        append_note(&mut tx, request, actor, note, now).await?;
        tx.commit().await?;

        self.events.emit(DomainEvent::RefundFailed {
            seller_id: request.seller_id.clone(),
            order_id: request.order_id.clone(),
            entity_id: request.return_id.clone(),
            reason: note.to_string(),
        });
        Ok(())
    }

    async fn advance(
        &self,
        seller_id: &str,
        return_id: &str,
        target: ReturnStatus,
        actor: &Actor,
        note: Option<&str>,
        resolution: Resolution<'_>,
    ) -> AppResult<ReturnRequest> {
        let request = store::fetch_return(&self.db, seller_id, return_id).await?;
        let now = store::now_ms();

        let mut tx = self.db.begin().await?;
        write_transition(&mut tx, &request, target, actor, note, &resolution, now).await?;
        set_order_return_status(&mut tx, &request.order_id, target.as_str(), now).await?;
        tx.commit().await?;

        info!("Return {} status: {} -> {}", request.return_id, request.status, target);
        store::fetch_return(&self.db, seller_id, return_id).await
    }
}

fn ensure_transition(from: ReturnStatus, to: ReturnStatus) -> AppResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            entity: "return",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

async fn write_transition(
    conn: &mut SqliteConnection,
    request: &ReturnRequest,
    target: ReturnStatus,
    actor: &Actor,
    note: Option<&str>,
    resolution: &Resolution<'_>,
    now: i64,
) -> AppResult<()> {
    ensure_transition(request.status, target)?;
    let resolved_at = if target.is_terminal() { Some(now) } else { request.resolved_at };

    let result = sqlx::query(r#"
        UPDATE return_requests SET
            status = ?,
            refund_id = COALESCE(?, refund_id),
            rejection_reason = COALESCE(?, rejection_reason),
            resolved_at = ?,
            version = version + 1,
            updated_at_ms = ?
        WHERE return_id = ? AND seller_id = ? AND version = ?
    "#)
    .bind(target)
    .bind(resolution.refund_id)
    .bind(resolution.rejection_reason)
    .bind(resolved_at)
    .bind(now)
    .bind(&request.return_id)
    .bind(&request.seller_id)
    .bind(request.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Return request"));
    }

    store::append_history(conn, HistoryTable::Return, &request.return_id, target.as_str(), actor, note, now)
        .await?;
    Ok(())
}

/// 状態を変えずに履歴へメモを追記する（履歴の末尾は現在の status のまま）
async fn append_note(
    conn: &mut SqliteConnection,
    request: &ReturnRequest,
    actor: &Actor,
    note: &str,
    now: i64,
) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE return_requests SET version = version + 1, updated_at_ms = ? WHERE return_id = ? AND version = ?"
    )
    .bind(now)
    .bind(&request.return_id)
    .bind(request.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Return request"));
    }

    store::append_history(conn, HistoryTable::Return, &request.return_id, request.status.as_str(), actor, Some(note), now)
        .await?;
    Ok(())
}

async fn set_order_return_status(
    conn: &mut SqliteConnection,
    order_id: &str,
    status: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE orders SET return_status = ?, updated_at_ms = ? WHERE order_id = ?")
        .bind(status)
        .bind(now)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}
