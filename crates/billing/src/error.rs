//! Billing error types
//!
//! All gateway failures are classified at the client boundary so
//! callers can distinguish "gateway down" from "invalid input" from
//! "not found". Cache errors never appear here at all: the cache layer
//! swallows and logs them.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Input rejected before any I/O (bad email, bad upgrade target).
    #[error("validation error: {0}")]
    Validation(String),

    /// A specific entity was expected and is missing.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Gateway rejected the request as malformed (HTTP 400).
    #[error("invalid gateway request: {0}")]
    InvalidRequest(String),

    /// Gateway rejected our credentials (HTTP 401).
    #[error("gateway authentication failed: {0}")]
    GatewayAuth(String),

    /// Any other gateway failure, with the code from the gateway's
    /// error envelope when one was present.
    #[error("gateway error [{code}]: {message}")]
    Gateway { code: String, message: String },

    /// Webhook payload failed HMAC verification.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Stable machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "VALIDATION_ERROR",
            BillingError::NotFound(_) => "NOT_FOUND",
            BillingError::UserNotFound(_) => "USER_NOT_FOUND",
            BillingError::InvalidRequest(_) => "INVALID_REQUEST",
            BillingError::GatewayAuth(_) => "GATEWAY_AUTH_FAILED",
            BillingError::Gateway { .. } => "GATEWAY_ERROR",
            BillingError::WebhookSignatureInvalid => "WEBHOOK_SIGNATURE_INVALID",
            BillingError::Database(_) => "DATABASE_ERROR",
            BillingError::Config(_) => "CONFIG_ERROR",
            BillingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for failures originating at the payment gateway. Mutating
    /// operations treat these as non-blocking: local state is the
    /// durable record of intent.
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidRequest(_)
                | BillingError::GatewayAuth(_)
                | BillingError::Gateway { .. }
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}
