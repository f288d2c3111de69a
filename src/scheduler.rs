// =============================================================================
// Scheduler: event dispatch for the evaluation pipeline
// =============================================================================
//
// Event flow for one symbol:
//   Tick / NewBar  ->  aggregator package  ->  trade setup at the mark
//                  ->  trend annotation    ->  decision engine
//                  ->  audit envelope
//   Timer          ->  forced re-evaluation of every registered symbol
//   TradeCompleted ->  decision accuracy + account risk counters
//
// Trades closed by the paper book during an evaluation are drained right
// after it and handled as TradeCompleted events, so outcomes are booked on
// the same pass that closed them.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::decision::DecisionOutcome;
use crate::decision_envelope::DecisionEnvelope;
use crate::decision_package::TradeSetup;
use crate::error::PipelineError;
use crate::signals::ConfidenceTrendTracker;

/// Source tag of samples fed to the trend trackers.
const TREND_SOURCE: &str = "aggregator";

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Regular evaluation; the aggregator may answer from its cache.
    Tick { symbol: String },
    /// A bar closed; the next evaluation rebuilds the package.
    NewBar { symbol: String, bar_time: DateTime<Utc> },
    /// Periodic full refresh of every registered symbol.
    Timer,
    /// A position was closed with the given realised profit.
    TradeCompleted { symbol: String, profit: f64 },
}

#[derive(Clone)]
pub struct Pipeline {
    state: Arc<AppState>,
}

impl Pipeline {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn handle(&self, event: EngineEvent) -> Vec<DecisionOutcome> {
        self.handle_at(event, Utc::now())
    }

    /// Dispatch one event; returns the decision outcomes it produced.
    pub fn handle_at(&self, event: EngineEvent, now: DateTime<Utc>) -> Vec<DecisionOutcome> {
        let outcomes = match event {
            EngineEvent::Tick { symbol } => vec![self.evaluate(&symbol, false, now)],
            EngineEvent::NewBar { symbol, bar_time } => {
                self.state.aggregator.write().on_new_bar(&symbol, bar_time);
                vec![self.evaluate(&symbol, false, now)]
            }
            EngineEvent::Timer => {
                let symbols = self.state.engine.read().symbols();
                debug!(symbols = symbols.len(), "timer refresh");
                symbols
                    .iter()
                    .map(|symbol| self.evaluate(symbol, true, now))
                    .collect()
            }
            EngineEvent::TradeCompleted { symbol, profit } => {
                self.book_trade(&symbol, profit);
                Vec::new()
            }
        };

        for trade in self.state.position_manager.take_completed() {
            self.book_trade(&trade.symbol, trade.profit);
        }

        outcomes
    }

    fn evaluate(&self, symbol: &str, force: bool, now: DateTime<Utc>) -> DecisionOutcome {
        let mut package = self.state.aggregator.write().evaluate_at(symbol, force, now);

        if package.is_valid {
            let (trend_settings, risk_settings) = {
                let config = self.state.runtime_config.read();
                (config.trend.clone(), config.risk.clone())
            };
            let setup = self.state.position_manager.mark_price(symbol).and_then(|mark| {
                TradeSetup::from_mark(
                    mark,
                    package.direction,
                    risk_settings.setup_stop_fraction,
                    risk_settings.setup_reward_multiple,
                )
            });
            if let Some(setup) = setup {
                package = package.with_setup(setup);
            }

            let mut trackers = self.state.trend_trackers.write();
            let tracker = trackers
                .entry(symbol.to_string())
                .or_insert_with(|| ConfidenceTrendTracker::new(trend_settings));

            let is_new = tracker
                .history()
                .latest()
                .map_or(true, |s| package.timestamp > s.timestamp);
            if is_new {
                tracker.record_sample_at(package.confidence / 100.0, TREND_SOURCE, 1.0, package.timestamp);
            }
            package.trend = Some(tracker.annotation());
        }

        let outcome = self.state.engine.write().evaluate_package_at(&package, now);

        if let Some(PipelineError::ExecutionFailure(msg)) = &outcome.error {
            warn!(symbol, action = %outcome.action, error = %msg, "execution failed");
            self.state
                .push_error_with_code(format!("{symbol}: {msg}"), Some("execution".to_string()));
        }
        self.state.push_decision(DecisionEnvelope::from_outcome(&outcome));

        outcome
    }

    fn book_trade(&self, symbol: &str, profit: f64) {
        self.state.engine.write().record_outcome(symbol, profit);
        self.state.risk_manager.record_closed_trade(profit);
        info!(symbol, profit, "trade outcome booked");
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state_version", &self.state.current_state_version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionAction;
    use crate::error::ValidationRule;
    use crate::execution::ExecutionPort;
    use crate::runtime_config::RuntimeConfig;
    use crate::signals::{AnalyzerModule, ModuleKind, ScriptedAnalyzer};
    use crate::types::{CloseTarget, Direction};
    use chrono::Duration;

    fn pipeline(direction: Direction) -> Pipeline {
        let config = RuntimeConfig {
            symbols: vec!["EURUSD".to_string(), "GBPUSD".to_string()],
            ..RuntimeConfig::default()
        };
        pipeline_with(config, direction)
    }

    fn pipeline_with(config: RuntimeConfig, direction: Direction) -> Pipeline {
        let modules: Vec<Box<dyn AnalyzerModule>> = ModuleKind::ALL
            .iter()
            .map(|k| {
                Box::new(ScriptedAnalyzer::constant(*k, direction, 70.0, 80.0))
                    as Box<dyn AnalyzerModule>
            })
            .collect();
        Pipeline::new(Arc::new(AppState::new(config, modules)))
    }

    fn tick(symbol: &str) -> EngineEvent {
        EngineEvent::Tick {
            symbol: symbol.to_string(),
        }
    }

    #[test]
    fn tick_opens_and_annotates() {
        let p = pipeline(Direction::Bullish);
        p.state().position_manager.update_price("EURUSD", 1.1000);
        let now = Utc::now();

        let out = p.handle_at(tick("EURUSD"), now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action, DecisionAction::OpenBuy);
        assert!(out[0].executed);

        let state = p.state();
        assert_eq!(state.position_manager.open_positions().len(), 1);
        assert_eq!(state.recent_decisions.read().len(), 1);
        let engine = state.engine.read();
        let last = engine.last_package("EURUSD").unwrap();
        assert_eq!(last.trend.as_ref().unwrap().samples, 1);
    }

    #[test]
    fn setup_is_attached_at_the_mark() {
        let p = pipeline(Direction::Bearish);
        p.state().position_manager.update_price("EURUSD", 1.2000);
        p.handle_at(tick("EURUSD"), Utc::now());

        let engine = p.state().engine.read();
        let setup = engine.last_package("EURUSD").unwrap().setup.unwrap();
        assert!((setup.entry - 1.2000).abs() < 1e-12);
        assert!(setup.stop_loss > setup.entry);
        assert!((setup.risk_reward() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn poor_reward_risk_holds_the_open() {
        let mut config = RuntimeConfig {
            symbols: vec!["EURUSD".to_string()],
            ..RuntimeConfig::default()
        };
        config.risk.setup_reward_multiple = 1.0;
        let p = pipeline_with(config, Direction::Bullish);
        p.state().position_manager.update_price("EURUSD", 1.1000);

        let out = p.handle_at(tick("EURUSD"), Utc::now());
        assert_eq!(out[0].tentative, DecisionAction::OpenBuy);
        assert_eq!(out[0].action, DecisionAction::Hold);
        assert!(matches!(
            &out[0].error,
            Some(PipelineError::Validation { rule: ValidationRule::Risk, .. })
        ));
        assert!(p.state().position_manager.open_positions().is_empty());
    }

    #[test]
    fn cached_package_is_sampled_once() {
        let p = pipeline(Direction::Bullish);
        let now = Utc::now();
        p.handle_at(tick("EURUSD"), now);
        p.handle_at(tick("EURUSD"), now + Duration::seconds(5));

        let trackers = p.state().trend_trackers.read();
        assert_eq!(trackers["EURUSD"].history().len(), 1);
        assert_eq!(p.state().aggregator.read().stats().cache_hits, 1);
    }

    #[test]
    fn execution_failure_is_logged() {
        let p = pipeline(Direction::Bullish);
        let out = p.handle_at(tick("EURUSD"), Utc::now());
        assert_eq!(out[0].action, DecisionAction::OpenBuy);
        assert!(!out[0].executed);

        let errors = p.state().recent_errors.read();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code.as_deref(), Some("execution"));
    }

    #[test]
    fn timer_refreshes_every_symbol() {
        let p = pipeline(Direction::Bearish);
        let out = p.handle_at(EngineEvent::Timer, Utc::now());
        assert_eq!(out.len(), 2);
        assert_eq!(p.state().aggregator.read().stats().aggregations, 2);
    }

    #[test]
    fn new_bar_forces_rebuild() {
        let p = pipeline(Direction::Bullish);
        let now = Utc::now();
        p.handle_at(tick("EURUSD"), now);
        p.handle_at(
            EngineEvent::NewBar {
                symbol: "EURUSD".to_string(),
                bar_time: now + Duration::seconds(10),
            },
            now + Duration::seconds(10),
        );
        assert_eq!(p.state().aggregator.read().stats().aggregations, 2);
        assert_eq!(p.state().trend_trackers.read()["EURUSD"].history().len(), 2);
    }

    #[test]
    fn trade_completed_books_accuracy_and_risk() {
        let p = pipeline(Direction::Bullish);
        p.handle_at(
            EngineEvent::TradeCompleted {
                symbol: "EURUSD".to_string(),
                profit: 25.0,
            },
            Utc::now(),
        );
        let state = p.state();
        assert_eq!(state.engine.read().metrics().profitable_decisions, 1);
        let risk = state.risk_manager.snapshot();
        assert_eq!(risk.daily_trades, 1);
        assert!((risk.daily_pnl - 25.0).abs() < 1e-9);
    }

    #[test]
    fn closes_from_the_book_are_booked() {
        let p = pipeline(Direction::Bullish);
        let state = p.state();
        state.position_manager.update_price("EURUSD", 1.1000);
        p.handle_at(tick("EURUSD"), Utc::now());
        state.position_manager.update_price("EURUSD", 1.1050);

        let id = state.engine.read().execution_id_of("EURUSD").unwrap();
        state.position_manager.close("EURUSD", id, CloseTarget::All);

        p.handle_at(EngineEvent::Timer, Utc::now());
        assert_eq!(state.risk_manager.snapshot().daily_wins, 1);
        assert_eq!(state.engine.read().metrics().profitable_decisions, 1);
    }
}
