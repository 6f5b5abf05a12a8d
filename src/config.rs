//! Configuration
//! 環境変数から読み込むアプリケーション設定

use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ShiprocketConfig {
    pub base_url: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct CashfreeConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub bind_addr: String,
    pub shiprocket: ShiprocketConfig,
    pub cashfree: CashfreeConfig,
    /// 外部API呼び出しのタイムアウト
    pub adapter_timeout: Duration,
    /// shipment_id 再取得前の待ち時間（プロバイダ側の反映待ち）
    pub shipment_id_recovery_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "/data/seller-portal/portal.db".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            shiprocket: ShiprocketConfig {
                base_url: "https://apiv2.shiprocket.in".to_string(),
                email: String::new(),
                password: String::new(),
            },
            cashfree: CashfreeConfig {
                base_url: "https://sandbox.cashfree.com/pg".to_string(),
                client_id: String::new(),
                client_secret: String::new(),
                api_version: "2023-08-01".to_string(),
            },
            adapter_timeout: Duration::from_secs(15),
            shipment_id_recovery_delay: Duration::from_millis(2000),
        }
    }
}

impl AppConfig {
    /// 既定値に環境変数を上書きして設定を構築
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env("DATABASE_PATH") { config.database_path = v; }
        if let Some(v) = env("BIND_ADDR") { config.bind_addr = v; }

        if let Some(v) = env("SHIPROCKET_BASE_URL") { config.shiprocket.base_url = v; }
        if let Some(v) = env("SHIPROCKET_EMAIL") { config.shiprocket.email = v; }
        if let Some(v) = env("SHIPROCKET_PASSWORD") { config.shiprocket.password = v; }

        if let Some(v) = env("CASHFREE_BASE_URL") { config.cashfree.base_url = v; }
        if let Some(v) = env("CASHFREE_CLIENT_ID") { config.cashfree.client_id = v; }
        if let Some(v) = env("CASHFREE_CLIENT_SECRET") { config.cashfree.client_secret = v; }
        if let Some(v) = env("CASHFREE_API_VERSION") { config.cashfree.api_version = v; }

        if let Some(v) = env("ADAPTER_TIMEOUT_SECS") {
            let secs: u64 = v.parse().context("ADAPTER_TIMEOUT_SECS must be an integer")?;
            config.adapter_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env("SHIPMENT_ID_RECOVERY_DELAY_MS") {
            let ms: u64 = v
                .parse()
                .context("SHIPMENT_ID_RECOVERY_DELAY_MS must be an integer")?;
            config.shipment_id_recovery_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
