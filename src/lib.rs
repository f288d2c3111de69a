// =============================================================================
// Confluence Engine
// =============================================================================
//
// Confidence aggregation, per-symbol decision state machine and confidence
// trend tracking behind injected execution ports. The binary in `main.rs`
// runs the pipeline against the in-memory paper book.
// =============================================================================

pub mod api;
pub mod app_state;
pub mod decision;
pub mod decision_envelope;
pub mod decision_package;
pub mod error;
pub mod execution;
pub mod position_engine;
pub mod risk;
pub mod runtime_config;
pub mod scheduler;
pub mod signals;
pub mod types;
