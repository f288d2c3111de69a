// =============================================================================
// Decision Module
// =============================================================================
//
// Per-symbol decision state machine:
// - Threshold state machine with profit-aware close thresholds
// - Cooldown / position-limit gates and the validation pass
// - Execution through injected ports, running decision metrics

pub mod engine;
pub mod state;
pub mod validation;

pub use engine::DecisionEngine;
pub use state::{DecisionAction, DecisionOutcome, SymbolSnapshot};
