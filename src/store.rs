//! Store
//! 出品者スコープの読み出しと、上流処理からの登録

use rand::Rng;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{
    Actor, HistoryEntry, NewOrder, Order, OrderItem, OrderResponse, PaymentStatus, Product,
    ReturnRequest, ReturnResponse, Seller, Shipment, ShipmentResponse,
};

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// ID 生成 ({PREFIX}_ + base32 8文字)
pub fn generate_id(prefix: &str) -> String {
    let random_bytes: [u8; 5] = rand::thread_rng().gen();
    let encoded = base32::encode(base32::Alphabet::Crockford, &random_bytes);
    format!("{}_{}", prefix, &encoded[..8])
}

// ========================================
// Status History
// ========================================

#[derive(Debug, Clone, Copy)]
pub enum HistoryTable {
    Order,
    Shipment,
    Return,
}

impl HistoryTable {
    fn table(&self) -> &'static str {
        match self {
            Self::Order => "order_status_history",
            Self::Shipment => "shipment_status_history",
            Self::Return => "return_status_history",
        }
    }

    fn key(&self) -> &'static str {
        match self {
            Self::Order => "order_id",
            Self::Shipment => "shipment_id",
            Self::Return => "return_id",
        }
    }
}

/// 履歴を 1 件追記（呼び出し側のトランザクション内で）
pub async fn append_history(
    conn: &mut SqliteConnection,
    table: HistoryTable,
    id: &str,
    status: &str,
    actor: &Actor,
    note: Option<&str>,
    now: i64,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} ({}, status, timestamp_ms, changed_by, changed_by_role, note) VALUES (?, ?, ?, ?, ?, ?)",
        table.table(),
        table.key()
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(status)
        .bind(now)
        .bind(&actor.id)
        .bind(actor.role)
        .bind(note)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn load_history(
    db: &DbPool,
    table: HistoryTable,
    id: &str,
) -> Result<Vec<HistoryEntry>, sqlx::Error> {
    let sql = format!(
        "SELECT status, timestamp_ms, changed_by, changed_by_role, note FROM {} WHERE {} = ? ORDER BY id ASC",
        table.table(),
        table.key()
    );
    sqlx::query_as(&sql).bind(id).fetch_all(db).await
}

// ========================================
// Orders
// ========================================

/// 出品者の Order を取得（他の出品者の Order は存在しないものとして扱う）
pub async fn fetch_order(db: &DbPool, seller_id: &str, order_id: &str) -> AppResult<Order> {
    let order: Option<Order> = sqlx::query_as(
        "SELECT * FROM orders WHERE order_id = ? AND seller_id = ?"
    )
    .bind(order_id)
    .bind(seller_id)
    .fetch_optional(db)
    .await?;

    order.ok_or(AppError::NotFound("Order"))
}

pub async fn fetch_order_items(db: &DbPool, order_id: &str) -> Result<Vec<OrderItem>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM order_items WHERE order_id = ? ORDER BY position ASC")
        .bind(order_id)
        .fetch_all(db)
        .await
}

pub async fn order_view(db: &DbPool, order: &Order) -> AppResult<OrderResponse> {
    let items = fetch_order_items(db, &order.order_id).await?;
    let history = load_history(db, HistoryTable::Order, &order.order_id).await?;
    Ok(OrderResponse::from_order(order, items, history))
}

/// 上流のチェックアウト処理から Order を登録する（初期状態の履歴を 1 件記録）
pub async fn insert_order(db: &DbPool, new: &NewOrder) -> AppResult<Order> {
    if new.items.is_empty() {
        return Err(AppError::Validation("Order must contain at least one item".to_string()));
    }
    if new.items.iter().any(|i| i.quantity <= 0) {
        return Err(AppError::Validation("Item quantity must be positive".to_string()));
    }
    if new.total_amount < 0.0 || new.shipping_cost < 0.0 {
        return Err(AppError::Validation("Amounts must not be negative".to_string()));
    }

    let now = now_ms();
    let order_id = generate_id("ORD");
    let address = serde_json::to_string(&new.shipping_address)
        .map_err(|e| AppError::Internal(format!("address serialization: {}", e)))?;

    let mut tx = db.begin().await?;

    sqlx::query(r#"
        INSERT INTO orders (
            order_id, order_number, seller_id, customer_id, customer_email, customer_phone,
            status, payment_status, total_amount, seller_amount, commission_amount,
            shipping_paid_by, shipping_cost, shipping_address, gateway_order_id,
            version, created_at_ms, updated_at_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
    "#)
    .bind(&order_id)
    .bind(&new.order_number)
    .bind(&new.seller_id)
    .bind(&new.customer_id)
    .bind(&new.customer_email)
    .bind(&new.customer_phone)
    .bind(new.status)
    .bind(new.payment_status)
    .bind(new.total_amount)
    .bind(new.seller_amount)
    .bind(new.commission_amount)
    .bind(new.shipping_paid_by)
    .bind(new.shipping_cost)
    .bind(&address)
    .bind(&new.gateway_order_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (position, item) in new.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_items (order_id, position, product_id, quantity, price, title, sku) VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&order_id)
        .bind(position as i64)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(item.price)
        .bind(&item.title)
        .bind(&item.sku)
        .execute(&mut *tx)
        .await?;
    }

    append_history(
        &mut tx,
        HistoryTable::Order,
        &order_id,
        new.status.as_str(),
        &Actor::customer(&new.customer_id),
        Some("Order placed"),
        now,
    )
    .await?;

    tx.commit().await?;

    info!("Order registered: order_id={}, number={}, seller={}", order_id, new.order_number, new.seller_id);
    fetch_order(db, &new.seller_id, &order_id).await
}

/// Order の支払いステータスを進める（paid からのみ。後退させない）
/// 返金IDは支払いステータスに関わらず最新のものを記録する。ステータスが進んだら true
pub async fn advance_payment_status(
    conn: &mut SqliteConnection,
    order_id: &str,
    to: PaymentStatus,
    refund_id: Option<&str>,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"
        UPDATE orders SET
            payment_status = ?,
            refund_id = COALESCE(?, refund_id),
            version = version + 1,
            updated_at_ms = ?
        WHERE order_id = ? AND payment_status = 'paid'
    "#)
    .bind(to)
    .bind(refund_id)
    .bind(now)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        return Ok(true);
    }

    if let Some(refund_id) = refund_id {
        sqlx::query(
            "UPDATE orders SET refund_id = ?, version = version + 1, updated_at_ms = ? WHERE order_id = ?"
        )
        .bind(refund_id)
        .bind(now)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(false)
}

// ========================================
// Products（在庫）
// ========================================

pub async fn upsert_product(db: &DbPool, product: &Product) -> Result<(), sqlx::Error> {
    sqlx::query(r#"
        INSERT INTO products (product_id, seller_id, title, stock, order_count)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(product_id) DO UPDATE SET
            title = excluded.title,
            stock = excluded.stock,
            order_count = excluded.order_count
    "#)
    .bind(&product.product_id)
    .bind(&product.seller_id)
    .bind(&product.title)
    .bind(product.stock)
    .bind(product.order_count)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn fetch_product(db: &DbPool, product_id: &str) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM products WHERE product_id = ?")
        .bind(product_id)
        .fetch_optional(db)
        .await
}

/// キャンセルされた Order の在庫を戻す。台帳に記録済みなら何もしない（再試行しても二重に戻らない）
pub async fn restore_stock(
    conn: &mut SqliteConnection,
    order: &Order,
    items: &[OrderItem],
    now: i64,
) -> Result<(), sqlx::Error> {
    // 同じ商品の明細はまとめる
    let mut quantities: BTreeMap<&str, i64> = BTreeMap::new();
    for item in items {
        *quantities.entry(item.product_id.as_str()).or_default() += item.quantity;
    }
    let undo_order_count = order.payment_status == PaymentStatus::Paid;

    for (product_id, quantity) in quantities {
        let ledger = sqlx::query(
            "INSERT OR IGNORE INTO stock_adjustments (order_id, product_id, reason, quantity, applied_at_ms) VALUES (?, ?, 'cancel_restore', ?, ?)"
        )
        .bind(&order.order_id)
        .bind(product_id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if ledger.rows_affected() == 0 {
            debug!("Stock already restored: order={}, product={}", order.order_id, product_id);
            continue;
        }

        let order_count_delta = if undo_order_count { quantity } else { 0 };
        let updated = sqlx::query(
            "UPDATE products SET stock = stock + ?, order_count = MAX(order_count - ?, 0) WHERE product_id = ?"
        )
        .bind(quantity)
        .bind(order_count_delta)
        .bind(product_id)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            warn!("Stock restore skipped, product missing: order={}, product={}", order.order_id, product_id);
        }
    }
    Ok(())
}

// ========================================
// Sellers（集荷拠点）
// ========================================

pub async fn fetch_seller(db: &DbPool, seller_id: &str) -> Result<Option<Seller>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM sellers WHERE seller_id = ?")
        .bind(seller_id)
        .fetch_optional(db)
        .await
}

pub async fn upsert_seller_pickup(
    db: &DbPool,
    seller_id: &str,
    pickup_location: &str,
    pickup_pincode: Option<&str>,
) -> Result<(), sqlx::Error> {
    let now = now_ms();
    sqlx::query(r#"
        INSERT INTO sellers (seller_id, pickup_location, pickup_pincode, created_at_ms, updated_at_ms)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(seller_id) DO UPDATE SET
            pickup_location = excluded.pickup_location,
            pickup_pincode = COALESCE(excluded.pickup_pincode, sellers.pickup_pincode),
            updated_at_ms = excluded.updated_at_ms
    "#)
    .bind(seller_id)
    .bind(pickup_location)
    .bind(pickup_pincode)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(())
}

// ========================================
// Shipments
// ========================================

/// キャンセルされていない Shipment（1 Order に最大 1 件）
pub async fn fetch_active_shipment(
    db: &DbPool,
    seller_id: &str,
    order_id: &str,
) -> Result<Option<Shipment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM shipments WHERE order_id = ? AND seller_id = ? AND status != 'cancelled'"
    )
    .bind(order_id)
    .bind(seller_id)
    .fetch_optional(db)
    .await
}

/// 有効な Shipment を優先し、無ければ最新のキャンセル済みを返す
pub async fn fetch_latest_shipment(
    db: &DbPool,
    seller_id: &str,
    order_id: &str,
) -> Result<Option<Shipment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM shipments WHERE order_id = ? AND seller_id = ? ORDER BY (status = 'cancelled') ASC, created_at_ms DESC LIMIT 1"
    )
    .bind(order_id)
    .bind(seller_id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_shipment(db: &DbPool, shipment_id: &str) -> Result<Option<Shipment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM shipments WHERE shipment_id = ?")
        .bind(shipment_id)
        .fetch_optional(db)
        .await
}

pub async fn shipment_view(db: &DbPool, shipment: &Shipment) -> AppResult<ShipmentResponse> {
    let history = load_history(db, HistoryTable::Shipment, &shipment.shipment_id).await?;
    Ok(ShipmentResponse::from_shipment(shipment, history))
}

// ========================================
// Return Requests
// ========================================

pub async fn fetch_return(db: &DbPool, seller_id: &str, return_id: &str) -> AppResult<ReturnRequest> {
    let request: Option<ReturnRequest> = sqlx::query_as(
        "SELECT * FROM return_requests WHERE return_id = ? AND seller_id = ?"
    )
    .bind(return_id)
    .bind(seller_id)
    .fetch_optional(db)
    .await?;

    request.ok_or(AppError::NotFound("Return request"))
}

pub async fn return_view(db: &DbPool, request: &ReturnRequest) -> AppResult<ReturnResponse> {
    let history = load_history(db, HistoryTable::Return, &request.return_id).await?;
    Ok(ReturnResponse::from_request(request, history))
}
