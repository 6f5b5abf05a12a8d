//! Database Module
//! SQLite を使用した orders/shipments/return_requests の管理

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use anyhow::Result;
use tracing::info;

/// データベース接続プール
pub type DbPool = Pool<Sqlite>;

/// データベースを初期化
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    // SQLite接続文字列
    let db_url = format!("sqlite:{}?mode=rwc", db_path);

    info!("Initializing database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // スキーマ作成
    create_schema(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// スキーマ作成
async fn create_schema(pool: &DbPool) -> Result<()> {
    // sellers テーブル（集荷拠点の登録情報）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS sellers (
            seller_id TEXT PRIMARY KEY,
            pickup_location TEXT,
            pickup_pincode TEXT,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // products テーブル（在庫と注文数）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS products (
            product_id TEXT PRIMARY KEY,
            seller_id TEXT NOT NULL,
            title TEXT NOT NULL,
            stock INTEGER NOT NULL DEFAULT 0,
            order_count INTEGER NOT NULL DEFAULT 0
        )
    "#)
    .execute(pool)
    .await?;

    // orders テーブル（version は楽観的排他制御用）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL UNIQUE,
            seller_id TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            customer_email TEXT,
            customer_phone TEXT,
            status TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            total_amount REAL NOT NULL,
            seller_amount REAL NOT NULL,
            commission_amount REAL NOT NULL DEFAULT 0,
            shipping_paid_by TEXT NOT NULL,
            shipping_cost REAL NOT NULL DEFAULT 0,
            actual_shipping_cost REAL,
            shipping_address TEXT NOT NULL,
            tracking_info TEXT,
            gateway_order_id TEXT,
            return_status TEXT,
            refund_id TEXT,
            shipped_at INTEGER,
            delivered_at INTEGER,
            cancelled_at INTEGER,
            version INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // order_items テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS order_items (
            order_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            price REAL NOT NULL,
            title TEXT NOT NULL,
            sku TEXT,
            PRIMARY KEY (order_id, position),
            FOREIGN KEY (order_id) REFERENCES orders(order_id)
        )
    "#)
    .execute(pool)
    .await?;

    // order_status_history テーブル（追記のみ）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS order_status_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL,
            status TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            changed_by TEXT NOT NULL,
            changed_by_role TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY (order_id) REFERENCES orders(order_id)
        )
    "#)
    .execute(pool)
    .await?;

    // shipments テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS shipments (
            shipment_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            seller_id TEXT NOT NULL,
            shiprocket_order_id TEXT,
            shiprocket_shipment_id TEXT,
            awb_code TEXT,
            courier_id INTEGER,
            courier_name TEXT,
            pickup_location TEXT,
            weight_grams INTEGER NOT NULL,
            length_cm REAL NOT NULL,
            width_cm REAL NOT NULL,
            height_cm REAL NOT NULL,
            shipping_charge REAL,
            status TEXT NOT NULL,
            label_url TEXT,
            pickup_scheduled_at INTEGER,
            version INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            FOREIGN KEY (order_id) REFERENCES orders(order_id)
        )
    "#)
    .execute(pool)
    .await?;

    // 1 Order につき有効な Shipment は 1 件まで
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_shipments_active_order ON shipments(order_id) WHERE status != 'cancelled'"
    )
    .execute(pool)
    .await?;

    // shipment_status_history テーブル（追記のみ）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS shipment_status_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            shipment_id TEXT NOT NULL,
            status TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            changed_by TEXT NOT NULL,
            changed_by_role TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY (shipment_id) REFERENCES shipments(shipment_id)
        )
    "#)
    .execute(pool)
    .await?;

    // return_requests テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS return_requests (
            return_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            seller_id TEXT NOT NULL,
            return_type TEXT NOT NULL,
            status TEXT NOT NULL,
            reason TEXT,
            refund_amount REAL NOT NULL DEFAULT 0,
            refund_id TEXT,
            rejection_reason TEXT,
            resolved_at INTEGER,
            version INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            FOREIGN KEY (order_id) REFERENCES orders(order_id)
        )
    "#)
    .execute(pool)
    .await?;

    // 1 Order につき進行中の返品は 1 件まで
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_returns_active_order ON return_requests(order_id) WHERE status NOT IN ('rejected', 'refunded', 'exchanged')"
    )
    .execute(pool)
    .await?;

    // return_status_history テーブル（追記のみ）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS return_status_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            return_id TEXT NOT NULL,
            status TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            changed_by TEXT NOT NULL,
            changed_by_role TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY (return_id) REFERENCES return_requests(return_id)
        )
    "#)
    .execute(pool)
    .await?;

    // stock_adjustments テーブル（在庫戻しの適用済み台帳）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS stock_adjustments (
            order_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            applied_at_ms INTEGER NOT NULL,
            UNIQUE(order_id, product_id, reason)
        )
    "#)
    .execute(pool)
    .await?;

    // notifications テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS notifications (
            notification_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            link TEXT,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // activity_log テーブル
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS activity_log (
            activity_id TEXT PRIMARY KEY,
            seller_id TEXT NOT NULL,
            event TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            detail TEXT,
            created_at_ms INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // インデックス作成
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_seller ON orders(seller_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_order_history_order ON order_status_history(order_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_shipments_seller ON shipments(seller_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_shipment_history_shipment ON shipment_status_history(shipment_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_returns_seller ON return_requests(seller_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_return_history_return ON return_status_history(return_id)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id)")
        .execute(pool).await?;

    Ok(())
}
