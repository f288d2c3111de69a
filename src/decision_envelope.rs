// =============================================================================
// Decision Envelope: auditable record of every evaluation
// =============================================================================
//
// Each processed package leaves one envelope behind: what the state machine
// wanted to do, what was finally done, and which rule (if any) stood in the
// way. Envelopes are kept in a bounded ring in application state and served
// by the diagnostics API.
// =============================================================================

use serde::Serialize;

use crate::decision::state::{DecisionAction, DecisionOutcome, PositionState};
use crate::error::PipelineError;
use crate::types::Direction;

#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    /// UUID v4.
    pub id: String,
    pub symbol: String,
    pub tentative_action: DecisionAction,
    pub final_action: DecisionAction,
    pub direction: Direction,
    pub confidence: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_state: Option<PositionState>,

    pub executed: bool,

    /// Rule or stage that withheld or downgraded the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_rule: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// ISO 8601.
    pub created_at: String,
}

impl DecisionEnvelope {
    pub fn from_outcome(outcome: &DecisionOutcome) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: outcome.symbol.clone(),
            tentative_action: outcome.tentative,
            final_action: outcome.action,
            direction: outcome.direction,
            confidence: outcome.confidence,
            position_state: outcome.position_state,
            executed: outcome.executed,
            blocking_rule: outcome.error.as_ref().map(blocking_label),
            reason: outcome.error.as_ref().map(ToString::to_string),
            created_at: outcome.at.to_rfc3339(),
        }
    }
}

fn blocking_label(error: &PipelineError) -> String {
    match error {
        PipelineError::NotInitialized => "not-initialized".to_string(),
        PipelineError::UnknownSymbol(_) => "unknown-symbol".to_string(),
        PipelineError::InvalidPackage(_) => "invalid-package".to_string(),
        PipelineError::StalePackage { .. } => "stale-package".to_string(),
        PipelineError::Validation { rule, .. } => rule.to_string(),
        PipelineError::ExecutionFailure(_) => "execution".to_string(),
    }
}
