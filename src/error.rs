//! Error Handling
//! API 共通のエラー型とレスポンス変換

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, warn};

use crate::adapters::AdapterError;
use crate::models::{PaymentStatus, Shipment, ShipmentStatus};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid {entity} status transition from '{from}' to '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Cannot cancel order: shipment is already '{0}' and the courier has the package")]
    CancellationBlocked(ShipmentStatus),

    #[error("Shipment already created for this order")]
    AlreadyShipped(Box<Shipment>),

    #[error("Order is not paid (payment status: '{}')", .0.as_str())]
    NotPaid(PaymentStatus),

    #[error("Shipment has no provider shipment id yet, courier actions are unavailable until it is recovered")]
    MissingShipmentId,

    #[error("No pickup location registered or available with the shipping provider")]
    NoPickupLocation,

    #[error("Pickup location '{0}' is not phone-verified with the shipping provider")]
    PickupUnverified(String),

    #[error("{0} was modified by another request, please retry")]
    Conflict(&'static str),

    #[error("Shipping/payment provider error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// 機械可読なエラーコード
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::CancellationBlocked(_) => "CANCELLATION_BLOCKED",
            Self::AlreadyShipped(_) => "ALREADY_SHIPPED",
            Self::NotPaid(_) => "ORDER_NOT_PAID",
            Self::MissingShipmentId => "MISSING_SHIPMENT_ID",
            Self::NoPickupLocation => "NO_PICKUP_LOCATION",
            Self::PickupUnverified(_) => "PICKUP_UNVERIFIED",
            Self::Conflict(_) => "CONCURRENT_MODIFICATION",
            Self::Adapter(_) => "ADAPTER_FAILURE",
            Self::Persistence(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidTransition { .. }
            | Self::CancellationBlocked(_)
            | Self::AlreadyShipped(_)
            | Self::NotPaid(_)
            | Self::MissingShipmentId
            | Self::NoPickupLocation
            | Self::PickupUnverified(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Adapter(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipment: Option<Shipment>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // 内部エラーは詳細をログにのみ残す
        let message = match &self {
            Self::Persistence(e) => {
                error!(target: "database", error = %e, "Database error occurred");
                "Internal server error".to_string()
            }
            Self::Internal(msg) => {
                error!(target: "internal", error = %msg, "Internal error occurred");
                "Internal server error".to_string()
            }
            other => {
                warn!("API Error: {} ({})", other, code);
                other.to_string()
            }
        };

        let shipment = match self {
            Self::AlreadyShipped(existing) => Some(*existing),
            _ => None,
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                code,
                error: message,
                shipment,
            }),
        )
            .into_response()
    }
}
