// src/error.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::api::hupijiao_client::GatewayError;
use crate::api::xui_client::PanelError;

/// Ошибки уровня приложения. Каждая ветка знает свой HTTP-статус
/// и можно ли клиенту повторить запрос.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("callback signature invalid")]
    SignatureInvalid,

    #[error("{service} unavailable: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
        timeout: bool,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// `true` для временных сбоев: клиент может повторить операцию целиком,
    /// она идемпотентна по номеру заказа.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ExternalService { .. } | AppError::Database(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) | AppError::SignatureInvalid => StatusCode::BAD_REQUEST,
            AppError::ExternalService { timeout: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // детали БД наружу не отдаём
        let message = match self {
            AppError::Database(_) => "database error".to_string(),
            AppError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": message,
            "retryable": self.is_retryable(),
        }))
    }
}

impl From<GatewayError> for AppError {
    fn from(value: GatewayError) -> Self {
        let timeout = value.is_timeout();
        AppError::ExternalService {
            service: "payment gateway",
            message: value.to_string(),
            timeout,
        }
    }
}

impl From<PanelError> for AppError {
    fn from(value: PanelError) -> Self {
        let timeout = value.is_timeout();
        AppError::ExternalService {
            service: "vpn panel",
            message: value.to_string(),
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_transient_failures() {
        let external = AppError::ExternalService {
            service: "payment gateway",
            message: "timed out".into(),
            timeout: true,
        };
        assert!(external.is_retryable());
        assert_eq!(external.status_code(), StatusCode::GATEWAY_TIMEOUT);

        assert!(!AppError::SignatureInvalid.is_retryable());
        assert!(!AppError::Conflict("order is paid".into()).is_retryable());
        assert!(!AppError::Unauthorized("invalid token").is_retryable());
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::NotFound("order").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::SignatureInvalid.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Unauthorized("missing token").status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
