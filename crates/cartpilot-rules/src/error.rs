use cartpilot_core::RuleId;
use thiserror::Error;

/// Errors raised while creating, changing or persisting rules.
///
/// Evaluation never produces these: a rule that cannot be evaluated is a
/// non-match carrying a [`crate::SkipReason`].
#[derive(Debug, Error)]
pub enum RuleError {
    /// The rule definition breaks an invariant (e.g. AutoOrder without consent).
    #[error("Invalid rule: {0}")]
    Invalid(String),

    #[error("Rule not found: {id}")]
    NotFound { id: RuleId },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuleError {
    pub fn code(&self) -> &'static str {
        match self {
            RuleError::Invalid(_) => "INVALID_RULE",
            RuleError::NotFound { .. } => "RULE_NOT_FOUND",
            RuleError::Database(_) => "DATABASE_ERROR",
            RuleError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
