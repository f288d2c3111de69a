// =============================================================================
// Error taxonomy for the scoring / decision core
// =============================================================================
//
// None of these escape the decision path as a crash. They are recorded on the
// per-symbol state and on the decision audit record as the reason an
// evaluation ended in NONE, WAITING_FOR_PACKAGE or HOLD.

use serde::Serialize;
use thiserror::Error;

/// Individual rule checked by the validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationRule {
    Confidence,
    Direction,
    Session,
    Cooldown,
    PositionLimit,
    Risk,
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confidence => write!(f, "confidence"),
            Self::Direction => write!(f, "direction"),
            Self::Session => write!(f, "session"),
            Self::Cooldown => write!(f, "cooldown"),
            Self::PositionLimit => write!(f, "position-limit"),
            Self::Risk => write!(f, "risk"),
        }
    }
}

/// Failure modes of one evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("decision engine not initialized")]
    NotInitialized,

    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("invalid package: {0}")]
    InvalidPackage(String),

    #[error("stale package: age {age_secs}s exceeds {max_age_secs}s")]
    StalePackage { age_secs: i64, max_age_secs: i64 },

    #[error("{rule} check failed: {reason}")]
    Validation { rule: ValidationRule, reason: String },

    #[error("execution failed: {0}")]
    ExecutionFailure(String),
}

impl PipelineError {
    pub fn validation(rule: ValidationRule, reason: impl Into<String>) -> Self {
        Self::Validation {
            rule,
            reason: reason.into(),
        }
    }

    /// The validation rule behind this error, if it is a validation failure.
    pub fn rule(&self) -> Option<ValidationRule> {
        match self {
            Self::Validation { rule, .. } => Some(*rule),
            _ => None,
        }
    }
}

/// Why an analyzer module produced no signal this cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("module not ready")]
    NotReady,

    #[error("no data available for '{0}'")]
    NoData(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_message_names_rule() {
        let err = PipelineError::validation(ValidationRule::Cooldown, "12s remaining");
        assert_eq!(err.to_string(), "cooldown check failed: 12s remaining");
        assert_eq!(err.rule(), Some(ValidationRule::Cooldown));
    }

    #[test]
    fn stale_package_message() {
        let err = PipelineError::StalePackage {
            age_secs: 400,
            max_age_secs: 300,
        };
        assert!(err.to_string().contains("400s"));
        assert_eq!(err.rule(), None);
    }
}
