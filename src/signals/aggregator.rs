// =============================================================================
// Confidence Aggregator: polls analyzer modules and builds decision packages
// =============================================================================
//
// Once per cycle every configured module is asked for its opinion. Failed
// modules are skipped for the cycle; the package is still built from whatever
// reported. Packages are cached per symbol and reused until the update
// interval elapses, a new bar forms, or the caller forces a rebuild.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::decision_package::DecisionPackage;
use crate::runtime_config::AggregatorSettings;
use crate::signals::component::{AnalyzerModule, ModuleKind};
use crate::signals::weighted_score::{ComponentWeights, WeightedScorer};

/// Reason carried by packages from an aggregator without modules.
pub const NOT_INITIALIZED_REASON: &str = "aggregator not initialized: no analyzer modules configured";

/// Success / failure counters of one module.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModuleStats {
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatorStats {
    /// Calls to `evaluate`, cached or not.
    pub evaluations: u64,
    pub cache_hits: u64,
    /// Full polling passes.
    pub aggregations: u64,
    pub avg_processing_us: f64,
    pub modules: BTreeMap<ModuleKind, ModuleStats>,
}

#[derive(Debug, Default)]
struct SymbolCache {
    package: Option<DecisionPackage>,
    built_at: Option<DateTime<Utc>>,
    last_bar_time: Option<DateTime<Utc>>,
    bar_pending: bool,
}

pub struct ConfidenceAggregator {
    modules: Vec<Box<dyn AnalyzerModule>>,
    scorer: WeightedScorer,
    settings: AggregatorSettings,
    cache: HashMap<String, SymbolCache>,
    stats: AggregatorStats,
}

impl ConfidenceAggregator {
    /// Weights are taken from `settings` for the modules supplied and
    /// normalised over those modules only.
    pub fn new(settings: AggregatorSettings, modules: Vec<Box<dyn AnalyzerModule>>) -> Self {
        let configured: BTreeMap<ModuleKind, f64> = modules
            .iter()
            .map(|m| {
                let kind = m.kind();
                (kind, settings.weights.get(&kind).copied().unwrap_or(0.0))
            })
            .collect();
        let weights = ComponentWeights::normalized(&configured);

        let stats = AggregatorStats {
            modules: configured
                .keys()
                .map(|k| (*k, ModuleStats::default()))
                .collect(),
            ..AggregatorStats::default()
        };

        if !modules.is_empty() {
            info!(
                modules = modules.len(),
                min_components = settings.min_components,
                min_confidence = settings.min_confidence,
                "confidence aggregator initialised"
            );
        }

        Self {
            modules,
            scorer: WeightedScorer::new(weights),
            settings,
            cache: HashMap::new(),
            stats,
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.modules.is_empty()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn weights(&self) -> &ComponentWeights {
        self.scorer.weights()
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    pub fn set_min_confidence(&mut self, threshold: f64) {
        self.settings.min_confidence = threshold.clamp(0.0, 100.0);
    }

    pub fn last_package(&self, symbol: &str) -> Option<&DecisionPackage> {
        self.cache.get(symbol).and_then(|c| c.package.as_ref())
    }

    /// Note a bar-open notification. Only a strictly newer bar time counts;
    /// returns whether the symbol was marked for re-aggregation.
    pub fn on_new_bar(&mut self, symbol: &str, bar_time: DateTime<Utc>) -> bool {
        let entry = self.cache.entry(symbol.to_string()).or_default();
        match entry.last_bar_time {
            Some(last) if bar_time <= last => false,
            _ => {
                entry.last_bar_time = Some(bar_time);
                entry.bar_pending = true;
                debug!(symbol, %bar_time, "new bar");
                true
            }
        }
    }

    pub fn evaluate(&mut self, symbol: &str, force_update: bool) -> DecisionPackage {
        self.evaluate_at(symbol, force_update, Utc::now())
    }

    /// Return the cached package for `symbol` unless a rebuild is due.
    pub fn evaluate_at(
        &mut self,
        symbol: &str,
        force_update: bool,
        now: DateTime<Utc>,
    ) -> DecisionPackage {
        self.stats.evaluations += 1;

        if !self.is_initialized() {
            return DecisionPackage::invalid(symbol, NOT_INITIALIZED_REASON, now);
        }

        if !force_update {
            if let Some(cached) = self.cached(symbol, now) {
                self.stats.cache_hits += 1;
                return cached;
            }
        }

        let started = Instant::now();
        let package = self.aggregate(symbol, now);
        self.record_processing_time(started.elapsed().as_micros() as f64);

        let entry = self.cache.entry(symbol.to_string()).or_default();
        entry.package = Some(package.clone());
        entry.built_at = Some(now);
        entry.bar_pending = false;

        package
    }

    fn cached(&self, symbol: &str, now: DateTime<Utc>) -> Option<DecisionPackage> {
        let entry = self.cache.get(symbol)?;
        if entry.bar_pending {
            return None;
        }
        let built_at = entry.built_at?;
        if now - built_at >= Duration::seconds(self.settings.min_update_interval_secs) {
            return None;
        }
        entry.package.clone()
    }

    fn aggregate(&mut self, symbol: &str, now: DateTime<Utc>) -> DecisionPackage {
        let mut components = Vec::with_capacity(self.modules.len());

        for module in self.modules.iter_mut() {
            let kind = module.kind();
            let stats = self.stats.modules.entry(kind).or_default();

            match module.analyze(symbol) {
                Ok(signal) if signal.kind() == kind => {
                    stats.successes += 1;
                    components.push(signal.normalize());
                }
                Ok(signal) => {
                    stats.failures += 1;
                    stats.last_error = Some(format!("reported a {} record", signal.kind()));
                    warn!(symbol, module = %kind, reported = %signal.kind(), "module returned foreign record, skipping");
                }
                Err(e) => {
                    stats.failures += 1;
                    stats.last_error = Some(e.to_string());
                    debug!(symbol, module = %kind, error = %e, "module skipped this cycle");
                }
            }
        }

        let weights = self.scorer.weights().as_map().clone();
        let min_components = self.settings.min_components;

        if components.len() < min_components {
            let reason = format!(
                "insufficient components: {}/{} reported",
                components.len(),
                min_components
            );
            debug!(symbol, %reason, "package invalid");
            let mut package = DecisionPackage::invalid(symbol, reason, now);
            package.components = components;
            package.weights = weights;
            return package;
        }

        let result = self.scorer.score(&components);
        let mut package = DecisionPackage::from_scoring(symbol, now, components, weights, &result);
        package.validate(min_components, self.settings.min_confidence);

        debug!(
            symbol,
            direction = %package.direction,
            confidence = format!("{:.1}", package.confidence),
            conflict = package.has_conflict,
            valid = package.is_valid,
            "package aggregated"
        );

        package
    }

    fn record_processing_time(&mut self, micros: f64) {
        self.stats.aggregations += 1;
        let n = self.stats.aggregations as f64;
        self.stats.avg_processing_us += (micros - self.stats.avg_processing_us) / n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyzerError;
    use crate::signals::feed::ScriptedAnalyzer;
    use crate::types::Direction;

    fn constant(kind: ModuleKind, direction: Direction, confidence: f64) -> Box<dyn AnalyzerModule> {
        Box::new(ScriptedAnalyzer::constant(kind, direction, confidence, confidence))
    }

    fn failing(kind: ModuleKind) -> Box<dyn AnalyzerModule> {
        Box::new(ScriptedAnalyzer::failing(kind, AnalyzerError::NotReady))
    }

    fn all_bullish() -> Vec<Box<dyn AnalyzerModule>> {
        ModuleKind::ALL
            .iter()
            .map(|k| constant(*k, Direction::Bullish, 80.0))
            .collect()
    }

    #[test]
    fn no_modules_yields_fixed_invalid_package() {
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), Vec::new());
        let p = agg.evaluate("EURUSD", true);
        assert!(!p.is_valid);
        assert_eq!(p.validation_message, NOT_INITIALIZED_REASON);
    }

    #[test]
    fn unanimous_modules_give_valid_bullish_package() {
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), all_bullish());
        let p = agg.evaluate("EURUSD", true);
        assert!(p.is_valid);
        assert_eq!(p.direction, Direction::Bullish);
        assert!((p.confidence - 100.0).abs() < 1e-9);
        assert_eq!(p.components.len(), 6);
        let weight_sum: f64 = p.weights.values().sum();
        assert!((weight_sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn two_failures_out_of_six_still_valid() {
        let modules = vec![
            constant(ModuleKind::MultiTimeframe, Direction::Bullish, 80.0),
            constant(ModuleKind::PointOfInterest, Direction::Bullish, 70.0),
            failing(ModuleKind::Volume),
            constant(ModuleKind::Rsi, Direction::Bullish, 60.0),
            failing(ModuleKind::Macd),
            constant(ModuleKind::Pattern, Direction::Bearish, 50.0),
        ];
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), modules);
        let p = agg.evaluate("EURUSD", true);

        assert!(p.is_valid, "{}", p.validation_message);
        assert_eq!(p.components.len(), 4);
        // Score averaged over MTF 25, POI 20, RSI 15, PATTERN 10.
        let expected = (80.0 * 25.0 + 70.0 * 20.0 + 60.0 * 15.0 + 50.0 * 10.0) / 70.0;
        assert!((p.weighted_score - expected).abs() < 1e-9);
        assert_eq!(p.direction, Direction::Bullish);

        let stats = agg.stats();
        assert_eq!(stats.modules[&ModuleKind::Volume].failures, 1);
        assert_eq!(stats.modules[&ModuleKind::Rsi].successes, 1);
        assert_eq!(
            stats.modules[&ModuleKind::Macd].last_error.as_deref(),
            Some("module not ready")
        );
    }

    #[test]
    fn too_few_components_is_invalid() {
        let modules = vec![
            constant(ModuleKind::Rsi, Direction::Bullish, 90.0),
            failing(ModuleKind::Macd),
            failing(ModuleKind::Volume),
        ];
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), modules);
        let p = agg.evaluate("EURUSD", true);
        assert!(!p.is_valid);
        assert!(p.validation_message.contains("1/3"));
        assert_eq!(p.direction, Direction::Neutral);
    }

    #[test]
    fn low_confidence_package_is_invalid() {
        let modules = vec![
            constant(ModuleKind::Rsi, Direction::Bullish, 80.0),
            constant(ModuleKind::Macd, Direction::Bearish, 80.0),
            constant(ModuleKind::Volume, Direction::Neutral, 10.0),
        ];
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), modules);
        let p = agg.evaluate("EURUSD", true);
        assert!(p.has_conflict);
        assert!(!p.is_valid);
    }

    #[test]
    fn package_is_cached_within_interval() {
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), all_bullish());
        let t0 = Utc::now();
        let first = agg.evaluate_at("EURUSD", false, t0);
        let second = agg.evaluate_at("EURUSD", false, t0 + Duration::seconds(30));
        assert_eq!(first.timestamp, second.timestamp);
        assert_eq!(agg.stats().cache_hits, 1);
        assert_eq!(agg.stats().aggregations, 1);

        let third = agg.evaluate_at("EURUSD", false, t0 + Duration::seconds(61));
        assert!(third.timestamp > first.timestamp);
        assert_eq!(agg.stats().aggregations, 2);
    }

    #[test]
    fn force_bypasses_cache() {
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), all_bullish());
        let t0 = Utc::now();
        agg.evaluate_at("EURUSD", false, t0);
        agg.evaluate_at("EURUSD", true, t0 + Duration::seconds(1));
        assert_eq!(agg.stats().aggregations, 2);
    }

    #[test]
    fn new_bar_triggers_rebuild_once() {
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), all_bullish());
        let t0 = Utc::now();
        let bar = t0 - Duration::seconds(5);
        agg.evaluate_at("EURUSD", false, t0);

        assert!(agg.on_new_bar("EURUSD", bar));
        assert!(!agg.on_new_bar("EURUSD", bar));
        agg.evaluate_at("EURUSD", false, t0 + Duration::seconds(2));
        assert_eq!(agg.stats().aggregations, 2);

        agg.evaluate_at("EURUSD", false, t0 + Duration::seconds(3));
        assert_eq!(agg.stats().aggregations, 2);
        assert!(!agg.on_new_bar("EURUSD", bar - Duration::seconds(60)));
    }

    #[test]
    fn cache_is_per_symbol() {
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), all_bullish());
        let t0 = Utc::now();
        agg.evaluate_at("EURUSD", false, t0);
        agg.evaluate_at("GBPUSD", false, t0);
        assert_eq!(agg.stats().aggregations, 2);
        assert_eq!(agg.last_package("GBPUSD").map(|p| p.symbol.as_str()), Some("GBPUSD"));
    }

    #[test]
    fn min_confidence_is_adjustable() {
        let modules = vec![
            constant(ModuleKind::Rsi, Direction::Bullish, 60.0),
            constant(ModuleKind::Macd, Direction::Bearish, 40.0),
            constant(ModuleKind::Volume, Direction::Bullish, 30.0),
        ];
        let mut agg = ConfidenceAggregator::new(AggregatorSettings::default(), modules);
        agg.set_min_confidence(95.0);
        assert!(!agg.evaluate("EURUSD", true).is_valid);
        agg.set_min_confidence(10.0);
        assert!(agg.evaluate("EURUSD", true).is_valid);
    }

    #[test]
    fn weights_cover_configured_modules_only() {
        let modules = vec![
            constant(ModuleKind::Rsi, Direction::Bullish, 60.0),
            constant(ModuleKind::Macd, Direction::Bullish, 60.0),
        ];
        let agg = ConfidenceAggregator::new(AggregatorSettings::default(), modules);
        assert_eq!(agg.weights().len(), 2);
        assert!((agg.weights().weight(ModuleKind::Rsi) - 50.0).abs() < 1e-9);
    }
}
