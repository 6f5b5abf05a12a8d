//! Seller Identity
//! x-seller-id ヘッダから出品者を識別する（認証自体は上流のゲートウェイで済んでいる前提）

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::models::Actor;

pub const SELLER_HEADER: &str = "x-seller-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerIdentity(pub String);

impl SellerIdentity {
    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn actor(&self) -> Actor {
        Actor::seller(self.0.clone())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SellerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let seller_id = parts
            .headers
            .get(SELLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AppError::Unauthorized)?;

        Ok(SellerIdentity(seller_id.to_string()))
    }
}
