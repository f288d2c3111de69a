// =============================================================================
// Analyzer Components: module-specific records and the uniform trait
// =============================================================================
//
// Each analyzer module reports its own record type. The aggregator never
// looks inside those records; it asks every module for a `ModuleSignal` and
// normalises it into the common `ComponentSignal` shape.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AnalyzerError;
use crate::types::Direction;

/// Identifies one of the six analyzer modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    MultiTimeframe,
    PointOfInterest,
    Volume,
    Rsi,
    Macd,
    Pattern,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 6] = [
        ModuleKind::MultiTimeframe,
        ModuleKind::PointOfInterest,
        ModuleKind::Volume,
        ModuleKind::Rsi,
        ModuleKind::Macd,
        ModuleKind::Pattern,
    ];
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MultiTimeframe => write!(f, "MTF"),
            Self::PointOfInterest => write!(f, "POI"),
            Self::Volume => write!(f, "VOLUME"),
            Self::Rsi => write!(f, "RSI"),
            Self::Macd => write!(f, "MACD"),
            Self::Pattern => write!(f, "PATTERN"),
        }
    }
}

// =============================================================================
// Module-specific records
// =============================================================================

/// Multi-timeframe trend alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtfScore {
    pub direction: Direction,
    pub score: f64,
    pub confidence: f64,
    pub aligned_timeframes: u32,
    pub total_timeframes: u32,
    /// ADX-derived strength of the dominant timeframe.
    pub trend_strength: f64,
}

/// Supply / demand zone proximity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiSignal {
    pub direction: Direction,
    pub score: f64,
    pub confidence: f64,
    /// "demand", "supply", "order_block", ...
    pub zone_type: String,
    pub inside_zone: bool,
    pub distance_to_zone: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    pub direction: Direction,
    pub score: f64,
    pub confidence: f64,
    /// Current volume over its moving average.
    pub volume_ratio: f64,
    pub spike: bool,
    pub climax: bool,
    pub divergence: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiBias {
    pub direction: Direction,
    pub score: f64,
    pub confidence: f64,
    pub rsi: f64,
    /// Signed bias in [-1, 1].
    pub bias_score: f64,
    pub failure_swing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdSignal {
    pub direction: Direction,
    pub score: f64,
    pub confidence: f64,
    pub histogram: f64,
    pub crossover: bool,
}

/// Candlestick pattern recognition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSignal {
    pub direction: Direction,
    pub score: f64,
    pub confidence: f64,
    pub pattern: String,
    pub bars_since: u32,
}

/// The record returned by one analyzer, one variant per module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum ModuleSignal {
    MultiTimeframe(MtfScore),
    PointOfInterest(PoiSignal),
    Volume(VolumeAnalysis),
    Rsi(RsiBias),
    Macd(MacdSignal),
    Pattern(PatternSignal),
}

impl ModuleSignal {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::MultiTimeframe(_) => ModuleKind::MultiTimeframe,
            Self::PointOfInterest(_) => ModuleKind::PointOfInterest,
            Self::Volume(_) => ModuleKind::Volume,
            Self::Rsi(_) => ModuleKind::Rsi,
            Self::Macd(_) => ModuleKind::Macd,
            Self::Pattern(_) => ModuleKind::Pattern,
        }
    }

    /// Normalise into the common shape. Score and confidence are clamped to
    /// 0..=100; non-finite values become 0.
    pub fn normalize(&self) -> ComponentSignal {
        let (direction, score, confidence, details) = match self {
            Self::MultiTimeframe(m) => (
                m.direction,
                m.score,
                m.confidence,
                json!({
                    "aligned_timeframes": m.aligned_timeframes,
                    "total_timeframes": m.total_timeframes,
                    "trend_strength": m.trend_strength,
                }),
            ),
            Self::PointOfInterest(p) => (
                p.direction,
                p.score,
                p.confidence,
                json!({
                    "zone_type": p.zone_type,
                    "inside_zone": p.inside_zone,
                    "distance_to_zone": p.distance_to_zone,
                }),
            ),
            Self::Volume(v) => (
                v.direction,
                v.score,
                v.confidence,
                json!({
                    "volume_ratio": v.volume_ratio,
                    "spike": v.spike,
                    "climax": v.climax,
                    "divergence": v.divergence,
                }),
            ),
            Self::Rsi(r) => (
                r.direction,
                r.score,
                r.confidence,
                json!({
                    "rsi": r.rsi,
                    "bias_score": r.bias_score,
                    "failure_swing": r.failure_swing,
                }),
            ),
            Self::Macd(m) => (
                m.direction,
                m.score,
                m.confidence,
                json!({
                    "histogram": m.histogram,
                    "crossover": m.crossover,
                }),
            ),
            Self::Pattern(p) => (
                p.direction,
                p.score,
                p.confidence,
                json!({
                    "pattern": p.pattern,
                    "bars_since": p.bars_since,
                }),
            ),
        };

        ComponentSignal {
            module: self.kind(),
            direction,
            score: clamp_pct(score),
            confidence: clamp_pct(confidence),
            details,
        }
    }
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

// =============================================================================
// ComponentSignal
// =============================================================================

/// One analyzer's opinion for one evaluation cycle, in the common shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSignal {
    pub module: ModuleKind,
    pub direction: Direction,
    /// 0..=100
    pub score: f64,
    /// 0..=100
    pub confidence: f64,
    /// Module-specific fields, carried for display and audit only.
    #[serde(default)]
    pub details: serde_json::Value,
}

// =============================================================================
// AnalyzerModule
// =============================================================================

/// A market-analysis module polled once per evaluation cycle.
pub trait AnalyzerModule: Send + Sync {
    fn kind(&self) -> ModuleKind;

    /// Analyse `symbol`. A failure skips the module for this cycle only.
    fn analyze(&mut self, symbol: &str) -> Result<ModuleSignal, AnalyzerError>;
}
