// =============================================================================
// Diagnostics API
// =============================================================================

pub mod rest;
