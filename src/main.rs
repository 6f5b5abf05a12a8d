use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use seller_portal_api::adapters::{Cashfree, Shiprocket};
use seller_portal_api::config::AppConfig;
use seller_portal_api::events::{spawn_dispatcher, EventBus};
use seller_portal_api::{build_router, db, AppState};

// ========================================
// メイン
// ========================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    // データベース初期化
    let pool = db::init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    // 外部プロバイダ
    let shipping = Arc::new(
        Shiprocket::new(&config.shiprocket, config.adapter_timeout)
            .context("Failed to build Shiprocket client")?,
    );
    let payments = Arc::new(
        Cashfree::new(&config.cashfree, config.adapter_timeout)
            .context("Failed to build Cashfree client")?,
    );

    // 通知・アクティビティはバックグラウンドで処理
    let (events, rx) = EventBus::new();
    spawn_dispatcher(pool.clone(), rx);

    let state = Arc::new(AppState::new(pool, shipping, payments, events, &config));
    let app = build_router(state);

    info!("🚀 Seller Portal API listening on {}", config.bind_addr);
    info!("📦 Database: {}", config.database_path);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
