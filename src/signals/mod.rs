// =============================================================================
// Signals Module
// =============================================================================
//
// Signal side of the confluence engine:
// - Analyzer module records and the uniform module trait
// - Weighted per-direction confluence scoring
// - Confidence aggregation into decision packages (with caching)
// - Confidence history ring and trend tracking

pub mod aggregator;
pub mod component;
pub mod confidence_history;
pub mod feed;
pub mod trend_tracker;
pub mod weighted_score;

pub use aggregator::{AggregatorStats, ConfidenceAggregator};
pub use component::{AnalyzerModule, ComponentSignal, ModuleKind};
#[cfg(test)]
pub use feed::ScriptedAnalyzer;
pub use feed::WaveAnalyzer;
pub use trend_tracker::{ConfidenceTrendTracker, PredictionMethod, TrendAnnotation};
