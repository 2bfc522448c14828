use cartpilot_core::{ProductId, RuleId};
use cartpilot_rules::RuleError;
use thiserror::Error;

/// Failures reported by the order placement service.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Not enough stock to fill the order. Distinguished so the user can adjust quantity.
    #[error("Insufficient stock: {message}")]
    InsufficientStock {
        product_id: Option<ProductId>,
        message: String,
    },

    /// The service answered with a non-success status (validation, auth, ...).
    #[error("Order rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Order request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Unreadable order response: {0}")]
    Parse(String),
}

/// A cart or catalog sink refused the mutation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Why a dispatch did not complete. In every case the rule is left as it was.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Sign in to let this rule place orders")]
    NotAuthenticated,

    #[error("This rule has no consent to place orders on your behalf")]
    ConsentMissing,

    #[error("Choose a delivery address for this rule")]
    AddressMissing,

    /// The rule was removed between evaluation and dispatch.
    #[error("Rule not found: {id}")]
    RuleNotFound { id: RuleId },

    /// The rule was paused after the event was produced.
    #[error("Rule is paused: {id}")]
    RulePaused { id: RuleId },

    #[error("Order placement failed: {0}")]
    OrderPlacementFailed(#[from] OrderError),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

impl DispatchError {
    /// Short error code string for hosts to map onto user-facing messages.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotAuthenticated => "NOT_AUTHENTICATED",
            DispatchError::ConsentMissing => "CONSENT_MISSING",
            DispatchError::AddressMissing => "ADDRESS_MISSING",
            DispatchError::RuleNotFound { .. } => "RULE_NOT_FOUND",
            DispatchError::RulePaused { .. } => "RULE_PAUSED",
            DispatchError::OrderPlacementFailed(OrderError::InsufficientStock { .. }) => {
                "INSUFFICIENT_STOCK"
            }
            DispatchError::OrderPlacementFailed(_) => "ORDER_PLACEMENT_FAILED",
            DispatchError::Dispatch(_) => "DISPATCH_ERROR",
        }
    }

    /// Precondition failures the user fixes on the rule or session before retrying.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DispatchError::NotAuthenticated
                | DispatchError::ConsentMissing
                | DispatchError::AddressMissing
        )
    }
}

impl From<SinkError> for DispatchError {
    fn from(e: SinkError) -> Self {
        DispatchError::Dispatch(e.0)
    }
}

impl From<RuleError> for DispatchError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::NotFound { id } => DispatchError::RuleNotFound { id },
            other => DispatchError::Dispatch(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
