// =============================================================================
// Decision Package: the aggregated unit handed to the decision engine
// =============================================================================
//
// One package per symbol per aggregation cycle. It carries the component
// signals actually collected, the normalised weights they were scored with,
// the per-direction shares and the validity verdict. Callers must check
// `is_valid`; an invalid package is a value, not an error.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::signals::trend_tracker::TrendAnnotation;
use crate::signals::weighted_score::ScoringResult;
use crate::signals::{ComponentSignal, ModuleKind};
use crate::types::Direction;

/// Entry, stop and target prices proposed alongside a package.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeSetup {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl TradeSetup {
    /// Reward over risk. 0 when the stop sits on the entry.
    pub fn risk_reward(&self) -> f64 {
        let risk = (self.entry - self.stop_loss).abs();
        if risk <= f64::EPSILON {
            return 0.0;
        }
        (self.take_profit - self.entry).abs() / risk
    }

    /// Prices are positive and the stop and target lie on opposite sides of
    /// the entry.
    pub fn is_valid(&self) -> bool {
        let prices = [self.entry, self.stop_loss, self.take_profit];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        (self.stop_loss < self.entry && self.take_profit > self.entry)
            || (self.stop_loss > self.entry && self.take_profit < self.entry)
    }

    /// Distance from entry to stop in price units.
    pub fn stop_distance(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    /// Setup entered at `mark` in the package direction, with the stop
    /// `stop_fraction` of the mark away and the target `reward_multiple`
    /// stop distances away. `None` for a neutral direction.
    pub fn from_mark(
        mark: f64,
        direction: Direction,
        stop_fraction: f64,
        reward_multiple: f64,
    ) -> Option<Self> {
        let sign = match direction {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
            Direction::Neutral => return None,
        };
        let distance = mark * stop_fraction;
        let setup = Self {
            entry: mark,
            stop_loss: mark - sign * distance,
            take_profit: mark + sign * distance * reward_multiple,
        };
        setup.is_valid().then_some(setup)
    }
}

/// Size multiplier for a confidence percentage.
pub fn confidence_size_multiplier(confidence: f64) -> f64 {
    match confidence {
        c if c < 60.0 => 0.5,
        c if c < 70.0 => 0.75,
        c if c < 85.0 => 1.0,
        _ => 1.25,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPackage {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub components: Vec<ComponentSignal>,
    /// Weight per configured module in percent; sums to 100.
    pub weights: BTreeMap<ModuleKind, f64>,
    pub weighted_score: f64,
    /// Share of the dominant direction, 0..=100.
    pub confidence: f64,
    pub direction: Direction,
    pub bullish_pct: f64,
    pub bearish_pct: f64,
    pub neutral_pct: f64,
    pub has_conflict: bool,
    pub is_valid: bool,
    pub validation_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<TradeSetup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendAnnotation>,
}

impl DecisionPackage {
    /// A package that must not be acted upon.
    pub fn invalid(symbol: impl Into<String>, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp: at,
            components: Vec::new(),
            weights: BTreeMap::new(),
            weighted_score: 0.0,
            confidence: 0.0,
            direction: Direction::Neutral,
            bullish_pct: 0.0,
            bearish_pct: 0.0,
            neutral_pct: 100.0,
            has_conflict: false,
            is_valid: false,
            validation_message: reason.into(),
            setup: None,
            trend: None,
        }
    }

    /// Build from a scoring pass. Validity is decided by [`Self::validate`].
    pub fn from_scoring(
        symbol: impl Into<String>,
        at: DateTime<Utc>,
        components: Vec<ComponentSignal>,
        weights: BTreeMap<ModuleKind, f64>,
        result: &ScoringResult,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp: at,
            components,
            weights,
            weighted_score: result.weighted_score,
            confidence: result.overall_confidence,
            direction: result.dominant,
            bullish_pct: result.bullish_pct,
            bearish_pct: result.bearish_pct,
            neutral_pct: result.neutral_pct,
            has_conflict: result.has_conflict,
            is_valid: false,
            validation_message: String::from("not validated"),
            setup: None,
            trend: None,
        }
    }

    /// A valid package with a given verdict, for packages produced outside
    /// the aggregator. The share not taken by `direction` goes to neutral.
    pub fn manual(
        symbol: impl Into<String>,
        direction: Direction,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 100.0);
        let (bullish_pct, bearish_pct) = match direction {
            Direction::Bullish => (confidence, 0.0),
            Direction::Bearish => (0.0, confidence),
            Direction::Neutral => (0.0, 0.0),
        };
        Self {
            symbol: symbol.into(),
            timestamp: at,
            components: Vec::new(),
            weights: BTreeMap::new(),
            weighted_score: confidence,
            confidence,
            direction,
            bullish_pct,
            bearish_pct,
            neutral_pct: 100.0 - bullish_pct - bearish_pct,
            has_conflict: false,
            is_valid: true,
            validation_message: String::from("manual"),
            setup: None,
            trend: None,
        }
    }

    pub fn with_setup(mut self, setup: TradeSetup) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Apply the validity rules: enough components and a confident verdict.
    pub fn validate(&mut self, min_components: usize, min_confidence: f64) -> bool {
        let reported = self.components.len();
        if reported < min_components {
            self.is_valid = false;
            self.validation_message =
                format!("insufficient components: {reported}/{min_components} reported");
        } else if self.confidence < min_confidence {
            self.is_valid = false;
            self.validation_message = format!(
                "confidence {:.1}% below floor {:.1}%",
                self.confidence, min_confidence
            );
        } else {
            self.is_valid = true;
            self.validation_message = String::from("OK");
        }
        self.is_valid
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }

    /// Strictly older than `max_age_secs`, to the millisecond.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        now - self.timestamp > Duration::seconds(max_age_secs)
    }

    /// +1 for bullish, -1 for bearish, 0 otherwise.
    pub fn trade_decision(&self) -> i8 {
        match self.direction {
            Direction::Bullish => 1,
            Direction::Bearish => -1,
            Direction::Neutral => 0,
        }
    }

    pub fn confidence_decimal(&self) -> f64 {
        self.confidence / 100.0
    }

    /// Lot multiplier by confidence tier; 0 for an invalid package.
    pub fn position_size_multiplier(&self) -> f64 {
        if !self.is_valid {
            return 0.0;
        }
        confidence_size_multiplier(self.confidence)
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} {} {:.1}% (bull {:.1} / bear {:.1} / neutral {:.1}) score {:.1}, {} components, {}",
            self.symbol,
            self.direction,
            self.confidence,
            self.bullish_pct,
            self.bearish_pct,
            self.neutral_pct,
            self.weighted_score,
            self.components.len(),
            if self.is_valid { "valid" } else { "invalid" },
        );
        if self.has_conflict {
            line.push_str(", CONFLICT");
        }
        if !self.is_valid {
            line.push_str(": ");
            line.push_str(&self.validation_message);
        }
        if let Some(trend) = &self.trend {
            line.push_str(&format!(", trend {}", trend.trend));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn component(module: ModuleKind) -> ComponentSignal {
        ComponentSignal {
            module,
            direction: Direction::Bullish,
            score: 70.0,
            confidence: 70.0,
            details: serde_json::Value::Null,
        }
    }

    #[test]
    fn invalid_package_is_fully_neutral() {
        let p = DecisionPackage::invalid("EURUSD", "no modules", Utc::now());
        assert!(!p.is_valid);
        assert_eq!(p.direction, Direction::Neutral);
        assert!((p.bullish_pct + p.bearish_pct + p.neutral_pct - 100.0).abs() < 1e-9);
        assert!(p.position_size_multiplier().abs() < f64::EPSILON);
    }

    #[test]
    fn validate_requires_enough_components() {
        let mut p = DecisionPackage::manual("EURUSD", Direction::Bullish, 90.0, Utc::now());
        p.components = vec![component(ModuleKind::Rsi), component(ModuleKind::Macd)];
        assert!(!p.validate(3, 50.0));
        assert!(p.validation_message.contains("2/3"));
    }

    #[test]
    fn validate_requires_confidence_floor() {
        let mut p = DecisionPackage::manual("EURUSD", Direction::Bullish, 45.0, Utc::now());
        p.components = vec![component(ModuleKind::Rsi); 3];
        assert!(!p.validate(3, 50.0));
        p.confidence = 55.0;
        assert!(p.validate(3, 50.0));
        assert_eq!(p.validation_message, "OK");
    }

    #[test]
    fn manual_package_shares_sum_to_hundred() {
        let p = DecisionPackage::manual("XAUUSD", Direction::Bearish, 70.0, Utc::now());
        assert!((p.bearish_pct - 70.0).abs() < f64::EPSILON);
        assert!((p.bullish_pct + p.bearish_pct + p.neutral_pct - 100.0).abs() < 1e-9);
        assert_eq!(p.trade_decision(), -1);
        assert!((p.confidence_decimal() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn size_multiplier_tiers() {
        let at = Utc::now();
        let tier = |c| DecisionPackage::manual("X", Direction::Bullish, c, at).position_size_multiplier();
        assert!((tier(55.0) - 0.5).abs() < f64::EPSILON);
        assert!((tier(65.0) - 0.75).abs() < f64::EPSILON);
        assert!((tier(80.0) - 1.0).abs() < f64::EPSILON);
        assert!((tier(85.0) - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn trade_setup_reward_risk() {
        let long = TradeSetup {
            entry: 1.1000,
            stop_loss: 1.0950,
            take_profit: 1.1100,
        };
        assert!(long.is_valid());
        assert!((long.risk_reward() - 2.0).abs() < 1e-6);

        let crossed = TradeSetup {
            entry: 1.1000,
            stop_loss: 1.0950,
            take_profit: 1.0900,
        };
        assert!(!crossed.is_valid());
    }

    #[test]
    fn setup_from_mark_follows_direction() {
        let long = TradeSetup::from_mark(1.2000, Direction::Bullish, 0.005, 2.0).unwrap();
        assert!(long.stop_loss < long.entry && long.take_profit > long.entry);
        assert!((long.risk_reward() - 2.0).abs() < 1e-9);
        assert!((long.stop_distance() - 0.006).abs() < 1e-12);

        let short = TradeSetup::from_mark(1.2000, Direction::Bearish, 0.005, 2.0).unwrap();
        assert!(short.stop_loss > short.entry && short.take_profit < short.entry);

        assert!(TradeSetup::from_mark(1.2000, Direction::Neutral, 0.005, 2.0).is_none());
        assert!(TradeSetup::from_mark(1.2000, Direction::Bullish, 0.0, 2.0).is_none());
    }

    #[test]
    fn age_counts_whole_seconds() {
        let now = Utc::now();
        let p = DecisionPackage::manual("EURUSD", Direction::Bullish, 80.0, now - Duration::seconds(90));
        assert_eq!(p.age_secs(now), 90);
    }

    #[test]
    fn staleness_counts_fractions_of_a_second() {
        let now = Utc::now();
        let at_limit = DecisionPackage::manual("EURUSD", Direction::Bullish, 80.0, now - Duration::seconds(300));
        assert!(!at_limit.is_stale(now, 300));
        let past = DecisionPackage::manual(
            "EURUSD",
            Direction::Bullish,
            80.0,
            now - Duration::seconds(300) - Duration::milliseconds(1),
        );
        assert_eq!(past.age_secs(now), 300);
        assert!(past.is_stale(now, 300));
    }

    #[test]
    fn summary_mentions_invalid_reason() {
        let p = DecisionPackage::invalid("GBPUSD", "insufficient components: 1/3 reported", Utc::now());
        let s = p.summary();
        assert!(s.starts_with("GBPUSD NEUTRAL"));
        assert!(s.contains("1/3"));
    }
}
