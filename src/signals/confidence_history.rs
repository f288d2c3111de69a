// =============================================================================
// Confidence History: fixed-capacity, most-recent-first sample ring
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MIN_SAMPLE_WEIGHT: f64 = 0.1;
pub const MAX_SAMPLE_WEIGHT: f64 = 2.0;

/// One recorded confidence score on a 0..1 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceSample {
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub weight: f64,
}

/// Ring of confidence samples. Index 0 is the newest sample; when full the
/// oldest sample is discarded.
#[derive(Debug, Clone)]
pub struct ConfidenceHistory {
    samples: VecDeque<ConfidenceSample>,
    capacity: usize,
}

impl ConfidenceHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sample stamped with the current time.
    pub fn record(&mut self, score: f64, source: &str, weight: f64) -> bool {
        self.record_at(score, source, weight, Utc::now())
    }

    /// Record a sample. Score is clamped to [0, 1] and weight to [0.1, 2.0];
    /// a NaN score is rejected and `false` returned.
    pub fn record_at(&mut self, score: f64, source: &str, weight: f64, at: DateTime<Utc>) -> bool {
        if score.is_nan() {
            debug!(source, "rejecting NaN confidence sample");
            return false;
        }
        let weight = if weight.is_nan() { 1.0 } else { weight };

        self.samples.push_front(ConfidenceSample {
            score: score.clamp(0.0, 1.0),
            timestamp: at,
            source: source.to_string(),
            weight: weight.clamp(MIN_SAMPLE_WEIGHT, MAX_SAMPLE_WEIGHT),
        });
        self.samples.truncate(self.capacity);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&ConfidenceSample> {
        self.samples.front()
    }

    /// Newest-first iterator over all samples.
    pub fn iter(&self) -> impl Iterator<Item = &ConfidenceSample> {
        self.samples.iter()
    }

    /// Scores of the newest `count` samples, newest first.
    pub fn recent_scores(&self, count: usize) -> Vec<f64> {
        self.samples.iter().take(count).map(|s| s.score).collect()
    }

    /// Average over the newest `periods` samples, optionally weight-normalised.
    /// Returns 0 when there is nothing to average.
    pub fn moving_average(&self, periods: usize, weighted: bool) -> f64 {
        let window = self.samples.iter().take(periods);
        let (sum, norm) = if weighted {
            window.fold((0.0, 0.0), |(s, w), x| (s + x.score * x.weight, w + x.weight))
        } else {
            window.fold((0.0, 0.0), |(s, n), x| (s + x.score, n + 1.0))
        };
        if norm > 0.0 {
            sum / norm
        } else {
            0.0
        }
    }
}

impl Default for ConfidenceHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
