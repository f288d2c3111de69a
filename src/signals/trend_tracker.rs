// =============================================================================
// Confidence Trend Tracker: slope, volatility, degradation and momentum
// =============================================================================
//
// Works on the 0..1 confidence stream recorded in a `ConfidenceHistory`.
//
//   trend       OLS slope of score against chronological sample index over
//               the newest `lookback` samples. Volatility (population stdev
//               of the same window) above the threshold overrides the slope.
//   degradation (long_avg - short_avg) / long_avg >= threshold
//   momentum    short_avg × {UP 1.1, DOWN 0.9, VOLATILE 0.8, FLAT 1.0}
//   stability   1 - min(2·stdev, 1)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime_config::TrendSettings;
use crate::signals::confidence_history::ConfidenceHistory;
use crate::types::TrendDirection;

/// Slope magnitude below which the trend is FLAT.
const SLOPE_EPSILON: f64 = 0.01;
/// Smoothing factor of the exponential predictor.
const EMA_ALPHA: f64 = 0.33;
/// Fewer samples than this cannot support a regression.
const MIN_REGRESSION_POINTS: usize = 3;
/// Stability reported when the window is too small to judge.
const NEUTRAL_STABILITY: f64 = 0.5;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    /// Change in score per sample, oldest to newest.
    pub slope: f64,
    pub intercept: f64,
    pub volatility: f64,
    pub points: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationReport {
    pub degrading: bool,
    pub short_avg: f64,
    pub long_avg: f64,
    /// Relative drop of the short average against the long average.
    pub relative_drop: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionMethod {
    /// Latest simple moving average.
    SimpleAverage,
    /// Exponential smoothing seeded by the first simple average.
    Exponential,
    /// One step beyond the trend regression.
    Linear,
}

impl TryFrom<u8> for PredictionMethod {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::SimpleAverage),
            1 => Ok(Self::Exponential),
            2 => Ok(Self::Linear),
            other => Err(other),
        }
    }
}

/// Summary attached to decision packages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnnotation {
    pub trend: TrendDirection,
    pub slope: f64,
    pub volatility: f64,
    /// 0..1
    pub momentum_adjusted: f64,
    /// 0..1
    pub stability: f64,
    pub degrading: bool,
    pub samples: usize,
}

// =============================================================================
// ConfidenceTrendTracker
// =============================================================================

#[derive(Debug, Clone)]
pub struct ConfidenceTrendTracker {
    history: ConfidenceHistory,
    settings: TrendSettings,
}

impl ConfidenceTrendTracker {
    pub fn new(settings: TrendSettings) -> Self {
        Self {
            history: ConfidenceHistory::new(settings.capacity),
            settings,
        }
    }

    pub fn history(&self) -> &ConfidenceHistory {
        &self.history
    }

    pub fn settings(&self) -> &TrendSettings {
        &self.settings
    }

    pub fn record_sample(&mut self, score: f64, source: &str, weight: f64) -> bool {
        self.history.record(score, source, weight)
    }

    pub fn record_sample_at(
        &mut self,
        score: f64,
        source: &str,
        weight: f64,
        at: DateTime<Utc>,
    ) -> bool {
        self.history.record_at(score, source, weight, at)
    }

    pub fn moving_average(&self, periods: usize, weighted: bool) -> f64 {
        self.history.moving_average(periods, weighted)
    }

    /// Classify the newest `lookback` samples.
    pub fn trend(&self, lookback: usize) -> TrendAnalysis {
        let scores = self.history.recent_scores(lookback);
        let volatility = population_std(&scores);

        if scores.len() < MIN_REGRESSION_POINTS {
            return TrendAnalysis {
                direction: TrendDirection::Flat,
                slope: 0.0,
                intercept: scores.first().copied().unwrap_or(0.0),
                volatility,
                points: scores.len(),
            };
        }

        let (slope, intercept) = regression(&scores);
        let direction = if volatility > self.settings.volatility_threshold {
            TrendDirection::Volatile
        } else if slope > SLOPE_EPSILON {
            TrendDirection::Up
        } else if slope < -SLOPE_EPSILON {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        };

        TrendAnalysis {
            direction,
            slope,
            intercept,
            volatility,
            points: scores.len(),
        }
    }

    /// Trend over the configured lookback.
    pub fn current_trend(&self) -> TrendAnalysis {
        self.trend(self.settings.trend_lookback)
    }

    /// Compare the short-horizon average against the long-horizon one.
    /// Needs at least `long_periods` samples.
    pub fn detect_degradation(&self, short_periods: usize, long_periods: usize) -> DegradationReport {
        let short_avg = self.history.moving_average(short_periods, false);
        let long_avg = self.history.moving_average(long_periods, false);

        if self.history.len() < long_periods || long_avg <= f64::EPSILON {
            return DegradationReport {
                degrading: false,
                short_avg,
                long_avg,
                relative_drop: 0.0,
            };
        }

        let relative_drop = (long_avg - short_avg) / long_avg;
        let degrading = relative_drop >= self.settings.degradation_threshold;
        if degrading {
            debug!(
                short_avg,
                long_avg,
                relative_drop = format!("{:.3}", relative_drop),
                "confidence degradation detected"
            );
        }

        DegradationReport {
            degrading,
            short_avg,
            long_avg,
            relative_drop,
        }
    }

    pub fn is_degrading(&self) -> bool {
        self.detect_degradation(self.settings.short_periods, self.settings.long_periods)
            .degrading
    }

    /// Short average scaled by the current trend, clamped to [0, 1].
    pub fn momentum_adjusted(&self) -> f64 {
        let short_avg = self.history.moving_average(self.settings.short_periods, false);
        let multiplier = match self.current_trend().direction {
            TrendDirection::Up => 1.1,
            TrendDirection::Down => 0.9,
            TrendDirection::Volatile => 0.8,
            TrendDirection::Flat => 1.0,
        };
        (short_avg * multiplier).clamp(0.0, 1.0)
    }

    /// 1.0 for a perfectly steady stream, falling to 0 as the standard
    /// deviation reaches 0.5.
    pub fn stability_score(&self, periods: usize) -> f64 {
        let scores = self.history.recent_scores(periods);
        if scores.len() < MIN_REGRESSION_POINTS {
            return NEUTRAL_STABILITY;
        }
        let std = population_std(&scores);
        (1.0 - (2.0 * std).min(1.0)).max(0.0)
    }

    /// Predict the next confidence score. Returns 0 with no history.
    pub fn predict_next(&self, method: PredictionMethod) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let prediction = match method {
            PredictionMethod::SimpleAverage => {
                self.history.moving_average(self.settings.short_periods, false)
            }
            PredictionMethod::Exponential => self.exponential_estimate(),
            PredictionMethod::Linear => {
                let analysis = self.current_trend();
                if analysis.points < MIN_REGRESSION_POINTS {
                    self.history.moving_average(self.settings.short_periods, false)
                } else {
                    analysis.intercept + analysis.slope * analysis.points as f64
                }
            }
        };
        prediction.clamp(0.0, 1.0)
    }

    fn exponential_estimate(&self) -> f64 {
        let mut chronological = self.history.recent_scores(self.settings.trend_lookback);
        if chronological.is_empty() {
            return self.history.moving_average(self.settings.short_periods, false);
        }
        chronological.reverse();

        let seed_len = self.settings.short_periods.clamp(1, chronological.len());
        let seed = chronological[..seed_len].iter().sum::<f64>() / seed_len as f64;

        chronological[seed_len..]
            .iter()
            .fold(seed, |ema, x| EMA_ALPHA * x + (1.0 - EMA_ALPHA) * ema)
    }

    pub fn annotation(&self) -> TrendAnnotation {
        let trend = self.current_trend();
        TrendAnnotation {
            trend: trend.direction,
            slope: trend.slope,
            volatility: trend.volatility,
            momentum_adjusted: self.momentum_adjusted(),
            stability: self.stability_score(self.settings.trend_lookback),
            degrading: self.is_degrading(),
            samples: self.history.len(),
        }
    }
}

impl Default for ConfidenceTrendTracker {
    fn default() -> Self {
        Self::new(TrendSettings::default())
    }
}

// =============================================================================
// Statistics helpers
// =============================================================================

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// OLS fit of `newest_first` against chronological index (0 = oldest).
/// Returns `(slope, intercept)`.
fn regression(newest_first: &[f64]) -> (f64, f64) {
    let n = newest_first.len();
    let points: Vec<(f64, f64)> = newest_first
        .iter()
        .enumerate()
        .map(|(i, y)| ((n - 1 - i) as f64, *y))
        .collect();

    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n as f64;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n as f64;

    let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        (sxy + (x - mean_x) * (y - mean_y), sxx + (x - mean_x).powi(2))
    });

    let slope = if sxx > f64::EPSILON { sxy / sxx } else { 0.0 };
    (slope, mean_y - slope * mean_x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(scores: &[f64]) -> ConfidenceTrendTracker {
        let mut t = ConfidenceTrendTracker::default();
        for s in scores {
            t.record_sample(*s, "test", 1.0);
        }
        t
    }

    fn ramp(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn increasing_sequence_is_up() {
        let t = tracker_with(&ramp(0.50, 0.02, 10));
        let analysis = t.trend(10);
        assert_eq!(analysis.direction, TrendDirection::Up);
        assert!((analysis.slope - 0.02).abs() < 1e-9);
    }

    #[test]
    fn decreasing_sequence_is_down() {
        let t = tracker_with(&ramp(0.80, -0.03, 10));
        assert_eq!(t.trend(10).direction, TrendDirection::Down);
    }

    #[test]
    fn alternating_sequence_is_volatile() {
        let scores: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.3 } else { 0.7 }).collect();
        let t = tracker_with(&scores);
        let analysis = t.trend(10);
        assert_eq!(analysis.direction, TrendDirection::Volatile);
        assert!((analysis.volatility - 0.2).abs() < 1e-9);
    }

    #[test]
    fn too_few_points_is_flat() {
        let t = tracker_with(&[0.2, 0.9]);
        assert_eq!(t.trend(10).direction, TrendDirection::Flat);
    }

    #[test]
    fn constant_sequence_is_flat() {
        let t = tracker_with(&[0.6; 12]);
        let analysis = t.trend(10);
        assert_eq!(analysis.direction, TrendDirection::Flat);
        assert!(analysis.volatility.abs() < 1e-12);
    }

    #[test]
    fn twenty_percent_drop_is_degradation() {
        let mut scores = vec![0.8; 15];
        scores.extend([0.6; 5]);
        let t = tracker_with(&scores);
        let report = t.detect_degradation(5, 20);
        assert!((report.long_avg - 0.75).abs() < 1e-9);
        assert!((report.short_avg - 0.6).abs() < 1e-9);
        assert!((report.relative_drop - 0.2).abs() < 1e-9);
        assert!(report.degrading);
        assert!(t.is_degrading());
    }

    #[test]
    fn degradation_needs_long_window() {
        let t = tracker_with(&[0.9, 0.9, 0.1]);
        assert!(!t.detect_degradation(1, 20).degrading);
    }

    #[test]
    fn small_drop_is_not_degradation() {
        let mut scores = vec![0.8; 15];
        scores.extend([0.75; 5]);
        let t = tracker_with(&scores);
        assert!(!t.detect_degradation(5, 20).degrading);
    }

    #[test]
    fn momentum_boosts_rising_confidence() {
        let t = tracker_with(&ramp(0.50, 0.02, 10));
        let short_avg = t.moving_average(5, false);
        assert!((t.momentum_adjusted() - short_avg * 1.1).abs() < 1e-9);
    }

    #[test]
    fn momentum_is_clamped_to_one() {
        let t = tracker_with(&ramp(0.90, 0.011, 10));
        assert!(t.momentum_adjusted() <= 1.0);
    }

    #[test]
    fn momentum_penalises_volatile_confidence() {
        let scores: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.3 } else { 0.7 }).collect();
        let t = tracker_with(&scores);
        let short_avg = t.moving_average(5, false);
        assert!((t.momentum_adjusted() - short_avg * 0.8).abs() < 1e-9);
    }

    #[test]
    fn stability_of_steady_stream_is_one() {
        let t = tracker_with(&[0.7; 10]);
        assert!((t.stability_score(10) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stability_without_data_is_neutral() {
        let t = tracker_with(&[0.7]);
        assert!((t.stability_score(10) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn stability_of_wild_stream_is_zero() {
        let scores: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.0 } else { 1.0 }).collect();
        let t = tracker_with(&scores);
        assert!(t.stability_score(10).abs() < 1e-12);
    }

    #[test]
    fn linear_prediction_extends_ramp() {
        let t = tracker_with(&ramp(0.50, 0.02, 10));
        let next = t.predict_next(PredictionMethod::Linear);
        assert!((next - 0.70).abs() < 1e-9);
    }

    #[test]
    fn simple_prediction_is_short_average() {
        let t = tracker_with(&ramp(0.50, 0.02, 10));
        let expected = t.moving_average(5, false);
        assert!((t.predict_next(PredictionMethod::SimpleAverage) - expected).abs() < 1e-12);
    }

    #[test]
    fn exponential_prediction_of_constant_is_constant() {
        let t = tracker_with(&[0.42; 10]);
        assert!((t.predict_next(PredictionMethod::Exponential) - 0.42).abs() < 1e-12);
    }

    #[test]
    fn exponential_prediction_lags_rising_series() {
        let t = tracker_with(&ramp(0.50, 0.02, 10));
        let ema = t.predict_next(PredictionMethod::Exponential);
        assert!(ema > 0.54 && ema < 0.68);
    }

    #[test]
    fn exponential_prediction_with_empty_lookback_uses_average() {
        let settings = TrendSettings {
            trend_lookback: 0,
            ..TrendSettings::default()
        };
        let mut t = ConfidenceTrendTracker::new(settings);
        t.record_sample(0.6, "test", 1.0);
        let p = t.predict_next(PredictionMethod::Exponential);
        assert!((p - 0.6).abs() < 1e-12);
    }

    #[test]
    fn prediction_without_history_is_zero() {
        let t = ConfidenceTrendTracker::default();
        assert!(t.predict_next(PredictionMethod::Linear).abs() < f64::EPSILON);
    }

    #[test]
    fn method_codes_map_to_variants() {
        assert_eq!(PredictionMethod::try_from(1), Ok(PredictionMethod::Exponential));
        assert_eq!(PredictionMethod::try_from(7), Err(7));
    }

    #[test]
    fn annotation_reflects_tracker_state() {
        let t = tracker_with(&ramp(0.50, 0.02, 10));
        let a = t.annotation();
        assert_eq!(a.trend, TrendDirection::Up);
        assert_eq!(a.samples, 10);
        assert!(!a.degrading);
    }
}
