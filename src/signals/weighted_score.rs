// =============================================================================
// Weighted Confluence Scorer: per-direction confidence aggregation
// =============================================================================
//
// Each reporting module adds `confidence × weight / 100` to the accumulator of
// its direction. The three accumulators are then normalised to percentages
// summing to 100. The weighted overall score is re-scaled over the weights of
// the modules that actually reported, so a missing module does not drag the
// score towards zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::signals::component::{ComponentSignal, ModuleKind};
use crate::types::Direction;

/// Bullish and bearish shares at or above this are contradictory evidence.
pub const CONFLICT_THRESHOLD: f64 = 40.0;

// =============================================================================
// ComponentWeights
// =============================================================================

/// Module weights in percent, normalised to sum to 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentWeights {
    weights: BTreeMap<ModuleKind, f64>,
}

impl ComponentWeights {
    /// Normalise raw weights. Negative or non-finite weights count as zero;
    /// if nothing positive remains every module gets an equal share.
    pub fn normalized(raw: &BTreeMap<ModuleKind, f64>) -> Self {
        let cleaned: BTreeMap<ModuleKind, f64> = raw
            .iter()
            .map(|(k, w)| (*k, if w.is_finite() && *w > 0.0 { *w } else { 0.0 }))
            .collect();
        let total: f64 = cleaned.values().sum();

        let weights = if total > f64::EPSILON {
            cleaned
                .into_iter()
                .map(|(k, w)| (k, w / total * 100.0))
                .collect()
        } else if cleaned.is_empty() {
            BTreeMap::new()
        } else {
            let share = 100.0 / cleaned.len() as f64;
            cleaned.into_keys().map(|k| (k, share)).collect()
        };

        Self { weights }
    }

    pub fn weight(&self, kind: ModuleKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(0.0)
    }

    pub fn modules(&self) -> impl Iterator<Item = ModuleKind> + '_ {
        self.weights.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<ModuleKind, f64> {
        &self.weights
    }
}

// =============================================================================
// Scoring output
// =============================================================================

/// The contribution of a single module to the final score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalContribution {
    pub module: ModuleKind,
    pub weight: f64,
    pub direction: Direction,
    pub confidence: f64,
    /// `confidence × weight / 100`, added to the direction's accumulator.
    pub weighted_confidence: f64,
}

/// Result of scoring one cycle's component signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResult {
    pub bullish_pct: f64,
    pub bearish_pct: f64,
    pub neutral_pct: f64,
    pub dominant: Direction,
    /// Normalised share of the dominant direction.
    pub overall_confidence: f64,
    /// Module scores averaged over the weights of reporting modules.
    pub weighted_score: f64,
    pub has_conflict: bool,
    /// Sum of the weights of reporting modules.
    pub reporting_weight: f64,
    pub contributions: Vec<SignalContribution>,
}

// =============================================================================
// WeightedScorer
// =============================================================================

pub struct WeightedScorer {
    weights: ComponentWeights,
}

impl WeightedScorer {
    pub fn new(weights: ComponentWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ComponentWeights {
        &self.weights
    }

    /// Score the signals collected this cycle. Signals from modules without a
    /// configured weight contribute nothing.
    pub fn score(&self, signals: &[ComponentSignal]) -> ScoringResult {
        let mut contributions = Vec::with_capacity(signals.len());
        let mut bullish = 0.0;
        let mut bearish = 0.0;
        let mut neutral = 0.0;
        let mut score_sum = 0.0;
        let mut reporting_weight = 0.0;

        for signal in signals {
            let weight = self.weights.weight(signal.module);
            let weighted_confidence = signal.confidence * (weight / 100.0);

            match signal.direction {
                Direction::Bullish => bullish += weighted_confidence,
                Direction::Bearish => bearish += weighted_confidence,
                Direction::Neutral => neutral += weighted_confidence,
            }

            score_sum += signal.score * weight;
            reporting_weight += weight;

            contributions.push(SignalContribution {
                module: signal.module,
                weight,
                direction: signal.direction,
                confidence: signal.confidence,
                weighted_confidence,
            });
        }

        let (bullish_pct, bearish_pct, neutral_pct) = normalize_shares(bullish, bearish, neutral);
        let dominant = dominant_direction(bullish_pct, bearish_pct, neutral_pct);
        let overall_confidence = match dominant {
            Direction::Bullish => bullish_pct,
            Direction::Bearish => bearish_pct,
            Direction::Neutral => neutral_pct,
        };
        let weighted_score = if reporting_weight > f64::EPSILON {
            score_sum / reporting_weight
        } else {
            0.0
        };

        ScoringResult {
            bullish_pct,
            bearish_pct,
            neutral_pct,
            dominant,
            overall_confidence,
            weighted_score,
            has_conflict: bullish_pct >= CONFLICT_THRESHOLD && bearish_pct >= CONFLICT_THRESHOLD,
            reporting_weight,
            contributions,
        }
    }
}

/// Scale the three accumulators to percentages summing to 100. With nothing
/// accumulated the whole share is neutral.
pub fn normalize_shares(bullish: f64, bearish: f64, neutral: f64) -> (f64, f64, f64) {
    let total = bullish + bearish + neutral;
    if total <= f64::EPSILON {
        return (0.0, 0.0, 100.0);
    }
    (
        bullish / total * 100.0,
        bearish / total * 100.0,
        neutral / total * 100.0,
    )
}

/// The strictly greatest share wins; any tie resolves to neutral.
pub fn dominant_direction(bullish: f64, bearish: f64, neutral: f64) -> Direction {
    if bullish > bearish && bullish > neutral {
        Direction::Bullish
    } else if bearish > bullish && bearish > neutral {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(module: ModuleKind, direction: Direction, score: f64, confidence: f64) -> ComponentSignal {
        ComponentSignal {
            module,
            direction,
            score,
            confidence,
            details: serde_json::Value::Null,
        }
    }

    fn default_weights() -> ComponentWeights {
        ComponentWeights::normalized(&crate::runtime_config::AggregatorSettings::default().weights)
    }

    #[test]
    fn weights_normalise_to_hundred() {
        let mut raw = BTreeMap::new();
        raw.insert(ModuleKind::Rsi, 1.0);
        raw.insert(ModuleKind::Macd, 3.0);
        let w = ComponentWeights::normalized(&raw);
        assert!((w.weight(ModuleKind::Rsi) - 25.0).abs() < 1e-9);
        assert!((w.weight(ModuleKind::Macd) - 75.0).abs() < 1e-9);
        assert!(w.weight(ModuleKind::Volume).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_weights_fall_back_to_equal_shares() {
        let mut raw = BTreeMap::new();
        raw.insert(ModuleKind::Rsi, 0.0);
        raw.insert(ModuleKind::Macd, -5.0);
        let w = ComponentWeights::normalized(&raw);
        assert!((w.weight(ModuleKind::Rsi) - 50.0).abs() < 1e-9);
        assert!((w.weight(ModuleKind::Macd) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn shares_sum_to_hundred() {
        let scorer = WeightedScorer::new(default_weights());
        let result = scorer.score(&[
            signal(ModuleKind::MultiTimeframe, Direction::Bullish, 80.0, 90.0),
            signal(ModuleKind::Rsi, Direction::Bearish, 40.0, 60.0),
            signal(ModuleKind::Pattern, Direction::Neutral, 50.0, 30.0),
        ]);
        let sum = result.bullish_pct + result.bearish_pct + result.neutral_pct;
        assert!((sum - 100.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&result.overall_confidence));
        assert_eq!(result.dominant, Direction::Bullish);
    }

    #[test]
    fn tie_resolves_to_neutral() {
        assert_eq!(dominant_direction(45.0, 45.0, 10.0), Direction::Neutral);
        assert_eq!(dominant_direction(50.0, 25.0, 25.0), Direction::Bullish);
    }

    #[test]
    fn conflict_when_both_sides_strong() {
        let mut raw = BTreeMap::new();
        raw.insert(ModuleKind::Rsi, 50.0);
        raw.insert(ModuleKind::Macd, 50.0);
        let scorer = WeightedScorer::new(ComponentWeights::normalized(&raw));
        let result = scorer.score(&[
            signal(ModuleKind::Rsi, Direction::Bullish, 60.0, 80.0),
            signal(ModuleKind::Macd, Direction::Bearish, 40.0, 80.0),
        ]);
        assert!(result.has_conflict);
        assert_eq!(result.dominant, Direction::Neutral);
    }

    #[test]
    fn weighted_score_uses_reporting_weights_only() {
        let scorer = WeightedScorer::new(default_weights());
        // MTF (25) and POI (20) report; the other four are absent.
        let result = scorer.score(&[
            signal(ModuleKind::MultiTimeframe, Direction::Bullish, 80.0, 70.0),
            signal(ModuleKind::PointOfInterest, Direction::Bullish, 60.0, 70.0),
        ]);
        let expected = (80.0 * 25.0 + 60.0 * 20.0) / 45.0;
        assert!((result.weighted_score - expected).abs() < 1e-9);
        assert!((result.reporting_weight - 45.0).abs() < 1e-9);
        assert!((result.bullish_pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn no_signals_is_fully_neutral() {
        let scorer = WeightedScorer::new(default_weights());
        let result = scorer.score(&[]);
        assert_eq!(result.dominant, Direction::Neutral);
        assert!((result.neutral_pct - 100.0).abs() < f64::EPSILON);
        assert!(result.weighted_score.abs() < f64::EPSILON);
    }
}
