use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::ledger::models::Currency;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Payout(#[from] PayoutError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,
}

/// Payout queue errors. Every public queue operation fails with one of these.
#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Invalid payout request: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {current}, expected: {expected}")]
    InvalidState { current: String, expected: String },

    #[error("Already approved by {approver}")]
    DuplicateApproval { approver: String },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Payout queue for {0} is already being processed")]
    QueueBusy(Currency),

    #[error("Ledger call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by an external ledger client
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Ledger rejected submission: {0}")]
    Rejected(String),

    #[error("Ledger transport error: {0}")]
    Transport(String),

    #[error("No ledger client registered for {0}")]
    UnsupportedCurrency(Currency),

    #[error("Insufficient treasury balance for {currency}: required {required}, available {available}")]
    InsufficientTreasury {
        currency: Currency,
        required: String,
        available: String,
    },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_code, details) = match &self {
            AppError::Payout(PayoutError::Validation(errors)) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                Some(serde_json::json!({ "violations": errors })),
            ),
            AppError::Payout(PayoutError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", None)
            }
            AppError::Payout(PayoutError::InvalidState { current, expected }) => (
                StatusCode::CONFLICT,
                "INVALID_STATE",
                Some(serde_json::json!({
                    "current": current,
                    "expected": expected,
                })),
            ),
            AppError::Payout(PayoutError::DuplicateApproval { approver }) => (
                StatusCode::CONFLICT,
                "DUPLICATE_APPROVAL",
                Some(serde_json::json!({ "approver": approver })),
            ),
            AppError::Payout(PayoutError::Precondition(_)) => {
                (StatusCode::CONFLICT, "PRECONDITION_FAILED", None)
            }
            AppError::Payout(PayoutError::QueueBusy(currency)) => (
                StatusCode::LOCKED,
                "QUEUE_BUSY",
                Some(serde_json::json!({ "currency": currency })),
            ),
            AppError::Payout(PayoutError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "LEDGER_TIMEOUT", None)
            }
            AppError::Ledger(_) => (StatusCode::BAD_GATEWAY, "LEDGER_ERROR", None),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),
            AppError::Database(_) => {
                return error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    None,
                )
            }
            AppError::Config(_) | AppError::Internal(_) => {
                return error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        error_body(status, error_code, message, details)
    }
}

fn error_body(
    status: StatusCode,
    error_code: &str,
    message: String,
    details: Option<serde_json::Value>,
) -> Response {
    let body = Json(ErrorResponse {
        error: message,
        error_code: error_code.to_string(),
        details,
    });

    (status, body).into_response()
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(error: reqwest::Error) -> Self {
        LedgerError::Transport(format!("HTTP request error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_violation() {
        let err = PayoutError::Validation(vec![
            "Amount must be positive".to_string(),
            "Invalid recipient address".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid payout request: Amount must be positive, Invalid recipient address"
        );
    }

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (AppError::from(PayoutError::NotFound("x".into())), StatusCode::NOT_FOUND),
            (
                AppError::from(PayoutError::QueueBusy(Currency::Gtt)),
                StatusCode::LOCKED,
            ),
            (
                AppError::from(PayoutError::DuplicateApproval { approver: "a".into() }),
                StatusCode::CONFLICT,
            ),
            (
                AppError::from(PayoutError::Timeout(Duration::from_secs(1))),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                AppError::from(LedgerError::Rejected("nope".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
