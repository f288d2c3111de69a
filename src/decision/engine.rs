// =============================================================================
// Decision Engine: turns decision packages into trading actions
// =============================================================================
//
// Per package:
//   1. engine not initialised            -> NONE
//   2. unknown symbol                    -> auto-register with defaults
//   3. remember the package
//   4. invalid package                   -> NONE
//   5. package older than the max age    -> WAITING_FOR_PACKAGE
//   6. query positions, classify
//   7. tentative action from the threshold state machine
//   8. cooldown gate        (opens only)
//   9. position-limit gate  (opens only)
//  10. validation pass      (failure downgrades to HOLD)
//  11. execute; success stamps the cooldown, failure resets it
//
// Every outcome is a value. Nothing on this path returns an error to the
// caller; the reason a package did not lead to an action is kept on the
// symbol state and in the returned `DecisionOutcome`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::decision::state::{
    DecisionAction, DecisionMetrics, DecisionOutcome, PositionState, SymbolSnapshot, SymbolState,
};
use crate::decision::validation::{
    check_cooldown, check_position_limit, close_threshold, open_threshold, DecisionValidator,
    ValidationContext,
};
use crate::decision_package::DecisionPackage;
use crate::error::PipelineError;
use crate::execution::{OpenOrder, Ports, PositionSnapshot};
use crate::risk::RiskManager;
use crate::runtime_config::{DecisionParams, EngineSettings, MIN_PACKAGE_AGE_SECS};
use crate::types::{CloseTarget, Direction, Side};

/// Confidence multiple of the larger open threshold needed to add to an
/// existing position.
const ADD_POSITION_FACTOR: f64 = 1.2;
/// Range of the per-symbol execution id offset.
const EXECUTION_ID_SPREAD: u32 = 10_000;

/// Execution identifier for `symbol`: the base plus a stable hash offset.
pub fn execution_id(base: u64, symbol: &str) -> u64 {
    let digest = Sha256::digest(symbol.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    base + u64::from(prefix % EXECUTION_ID_SPREAD)
}

/// The threshold state machine (step 7).
pub fn tentative_action(
    package: &DecisionPackage,
    params: &DecisionParams,
    positions: &PositionSnapshot,
) -> DecisionAction {
    let confidence = package.confidence;
    if confidence < params.close_all_threshold {
        return DecisionAction::CloseAll;
    }

    let state = PositionState::classify(positions);
    let incoming = Side::for_direction(package.direction);

    if state == PositionState::NoPosition {
        return match incoming {
            Some(side) if confidence >= open_threshold(params, side) => DecisionAction::open_for(side),
            _ => DecisionAction::Hold,
        };
    }

    let add_threshold = ADD_POSITION_FACTOR * params.buy_threshold.max(params.sell_threshold);
    if confidence >= add_threshold {
        if let Some(side) = incoming.filter(|s| state.holds(*s)) {
            return DecisionAction::open_for(side);
        }
    }

    if confidence < close_threshold(params.close_threshold, positions.total_profit) {
        return DecisionAction::Hold;
    }

    match (state, package.direction) {
        (PositionState::HasBuy | PositionState::HasBoth, Direction::Bearish) => DecisionAction::CloseBuy,
        (PositionState::HasSell | PositionState::HasBoth, Direction::Bullish) => DecisionAction::CloseSell,
        _ => DecisionAction::Hold,
    }
}

pub struct DecisionEngine {
    settings: EngineSettings,
    default_params: DecisionParams,
    symbols: HashMap<String, SymbolState>,
    ports: Option<Ports>,
    risk: Option<Arc<RiskManager>>,
    metrics: DecisionMetrics,
}

impl DecisionEngine {
    pub fn new(mut settings: EngineSettings, default_params: DecisionParams) -> Self {
        settings.max_package_age_secs = settings.max_package_age_secs.max(MIN_PACKAGE_AGE_SECS);
        Self {
            settings,
            default_params,
            symbols: HashMap::new(),
            ports: None,
            risk: None,
            metrics: DecisionMetrics::new(Utc::now()),
        }
    }

    /// Consult `risk` in the validation pass when risk management is on.
    pub fn with_risk_manager(mut self, risk: Arc<RiskManager>) -> Self {
        self.risk = Some(risk);
        self
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn initialize(&mut self, ports: Ports) -> bool {
        if self.ports.is_some() {
            warn!("decision engine re-initialised, replacing ports");
        }
        self.ports = Some(ports);
        self.metrics = DecisionMetrics::new(Utc::now());
        info!(
            allow_multiple_positions = self.settings.allow_multiple_positions,
            enforce_cooldown = self.settings.enforce_cooldown,
            use_risk_management = self.settings.use_risk_management,
            max_package_age_secs = self.settings.max_package_age_secs,
            "decision engine initialised"
        );
        true
    }

    pub fn deinitialize(&mut self) {
        self.ports = None;
        info!(symbols = self.symbols.len(), "decision engine deinitialised");
    }

    pub fn is_initialized(&self) -> bool {
        self.ports.is_some()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // -------------------------------------------------------------------------
    // Symbol registry
    // -------------------------------------------------------------------------

    /// Register `symbol`. Returns `false` if it was already registered, in
    /// which case its state is left untouched.
    pub fn register_symbol(&mut self, symbol: &str, params: DecisionParams) -> bool {
        if self.symbols.contains_key(symbol) {
            return false;
        }
        let id = execution_id(self.settings.execution_id_base, symbol);
        self.symbols
            .insert(symbol.to_string(), SymbolState::new(symbol, params, id, Utc::now()));
        info!(symbol, execution_id = id, "symbol registered");
        true
    }

    pub fn quick_register(
        &mut self,
        symbol: &str,
        buy_threshold: f64,
        sell_threshold: f64,
        risk_percent: f64,
        cooldown_minutes: u32,
        max_positions: u32,
    ) -> bool {
        let params = DecisionParams {
            buy_threshold,
            sell_threshold,
            risk_percent,
            cooldown_minutes,
            max_positions,
            ..self.default_params.clone()
        };
        self.register_symbol(symbol, params)
    }

    pub fn unregister_symbol(&mut self, symbol: &str) -> bool {
        let removed = self.symbols.remove(symbol).is_some();
        if removed {
            info!(symbol, "symbol unregistered");
        }
        removed
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Registered symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.symbols.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn symbol_params(&self, symbol: &str) -> Option<&DecisionParams> {
        self.symbols.get(symbol).map(|s| &s.params)
    }

    pub fn update_symbol_params(&mut self, symbol: &str, params: DecisionParams) -> Result<(), PipelineError> {
        let state = self
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| PipelineError::UnknownSymbol(symbol.to_string()))?;
        state.params = params;
        info!(symbol, "symbol parameters updated");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn last_package(&self, symbol: &str) -> Option<&DecisionPackage> {
        self.symbols.get(symbol).and_then(|s| s.last_package.as_ref())
    }

    pub fn last_decision(&self, symbol: &str) -> Option<DecisionAction> {
        self.symbols.get(symbol).map(|s| s.last_decision)
    }

    pub fn execution_id_of(&self, symbol: &str) -> Option<u64> {
        self.symbols.get(symbol).map(|s| s.execution_id)
    }

    pub fn metrics(&self) -> &DecisionMetrics {
        &self.metrics
    }

    pub fn symbol_metrics(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.symbols.get(symbol).map(SymbolState::snapshot)
    }

    pub fn snapshots(&self) -> Vec<SymbolSnapshot> {
        let mut all: Vec<SymbolSnapshot> = self.symbols.values().map(SymbolState::snapshot).collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub fn decision_accuracy(&self) -> f64 {
        self.metrics.accuracy_rate
    }

    pub fn reset_statistics(&mut self) {
        let now = Utc::now();
        self.metrics = DecisionMetrics::new(now);
        for state in self.symbols.values_mut() {
            state.metrics = DecisionMetrics::new(now);
        }
        info!("decision statistics reset");
    }

    /// Feed a completed trade into the accuracy figures.
    pub fn record_outcome(&mut self, symbol: &str, profit: f64) {
        self.metrics.record_outcome(profit);
        if let Some(state) = self.symbols.get_mut(symbol) {
            state.metrics.record_outcome(profit);
        }
        debug!(symbol, profit, accuracy = self.metrics.accuracy_rate, "trade outcome recorded");
    }

    pub fn status(&self) -> String {
        format!(
            "initialized: {}, symbols: {}, decisions: {}, accuracy: {:.1}%, avg confidence: {:.1}%",
            if self.is_initialized() { "yes" } else { "no" },
            self.symbols.len(),
            self.metrics.total_decisions,
            self.metrics.accuracy_rate,
            self.metrics.average_confidence,
        )
    }

    // -------------------------------------------------------------------------
    // Processing
    // -------------------------------------------------------------------------

    pub fn process_package(&mut self, package: &DecisionPackage) -> DecisionAction {
        self.process_package_at(package, Utc::now())
    }

    pub fn process_package_at(&mut self, package: &DecisionPackage, now: DateTime<Utc>) -> DecisionAction {
        self.evaluate_package_at(package, now).action
    }

    /// Process each package independently; returns how many ended in an
    /// actionable decision.
    pub fn process_multiple_packages(&mut self, packages: &[DecisionPackage]) -> usize {
        self.process_multiple_packages_at(packages, Utc::now())
    }

    pub fn process_multiple_packages_at(&mut self, packages: &[DecisionPackage], now: DateTime<Utc>) -> usize {
        packages
            .iter()
            .filter(|p| self.process_package_at(p, now).is_actionable())
            .count()
    }

    /// Run the full decision path for one package.
    pub fn evaluate_package_at(&mut self, package: &DecisionPackage, now: DateTime<Utc>) -> DecisionOutcome {
        let symbol = package.symbol.as_str();
        let outcome = DecisionOutcome::new(symbol, package, now);

        let Some(ports) = self.ports.clone() else {
            debug!(symbol, "package ignored, engine not initialised");
            return outcome.finish(DecisionAction::None, Some(PipelineError::NotInitialized));
        };

        if !self.symbols.contains_key(symbol) {
            info!(symbol, "auto-registering unknown symbol with default parameters");
            self.register_symbol(symbol, self.default_params.clone());
        }

        let Self {
            settings,
            symbols,
            risk,
            metrics,
            ..
        } = self;
        let Some(state) = symbols.get_mut(symbol) else {
            return outcome.finish(
                DecisionAction::None,
                Some(PipelineError::UnknownSymbol(symbol.to_string())),
            );
        };

        state.last_package = Some(package.clone());
        state.last_package_at = Some(now);

        let (mut outcome, action, error) = if !package.is_valid {
            debug!(symbol, reason = %package.validation_message, "invalid package");
            let err = PipelineError::InvalidPackage(package.validation_message.clone());
            (outcome, DecisionAction::None, Some(err))
        } else if package.is_stale(now, settings.max_package_age_secs) {
            let age_secs = package.age_secs(now);
            debug!(symbol, age_secs, "stale package, waiting for a fresh one");
            let err = PipelineError::StalePackage {
                age_secs,
                max_age_secs: settings.max_package_age_secs,
            };
            (outcome, DecisionAction::WaitingForPackage, Some(err))
        } else {
            let positions = ports.inventory.query_positions(symbol, state.execution_id);
            let mut outcome = outcome;
            outcome.position_state = Some(PositionState::classify(&positions));
            outcome.tentative = tentative_action(package, &state.params, &positions);

            let mut action = outcome.tentative;
            let mut error = None;

            if let (true, Some(side)) = (action.is_open(), action.side()) {
                let gated = check_cooldown(&state.cooldown, side, &state.params, settings, now)
                    .and_then(|_| check_position_limit(&positions, side, &state.params, settings));
                if let Err(e) = gated {
                    debug!(symbol, tentative = %action, error = %e, "gate rejected action");
                    action = DecisionAction::Hold;
                    error = Some(e);
                }
            }

            if action.is_actionable() {
                let session_open = !action.is_open() || ports.session.is_trading_session(symbol);
                let ctx = ValidationContext {
                    package,
                    params: &state.params,
                    settings,
                    positions: &positions,
                    cooldown: &state.cooldown,
                    session_open,
                    risk: risk.as_deref(),
                    now,
                };
                if let Err(e) = DecisionValidator::validate(action, &ctx) {
                    action = DecisionAction::Hold;
                    error = Some(e);
                }
            }

            if action.is_actionable() {
                outcome.executed = execute(&ports, action, package, state);
                if outcome.executed {
                    state.cooldown.record_action(action, now);
                    info!(
                        symbol,
                        %action,
                        confidence = format!("{:.1}", package.confidence),
                        direction = %package.direction,
                        "decision executed"
                    );
                } else {
                    state.cooldown.reset();
                    warn!(symbol, %action, "execution failed, cooldown reset");
                    error = Some(PipelineError::ExecutionFailure(format!(
                        "{action} rejected by executor"
                    )));
                }
                state.metrics.record_decision(package.confidence);
                metrics.record_decision(package.confidence);
            }

            (outcome, action, error)
        };

        state.last_decision = action;
        state.last_decision_at = Some(now);
        state.last_reason = error.as_ref().map(ToString::to_string);

        outcome.action = action;
        outcome.error = error;
        outcome
    }
}

fn execute(ports: &Ports, action: DecisionAction, package: &DecisionPackage, state: &SymbolState) -> bool {
    let symbol = state.symbol.as_str();
    let id = state.execution_id;
    match action {
        DecisionAction::OpenBuy | DecisionAction::OpenSell => {
            let Some(side) = action.side() else {
                return false;
            };
            ports.execution.open(&OpenOrder {
                symbol,
                side,
                package,
                execution_id: id,
                risk_percent: state.params.risk_percent,
            })
        }
        DecisionAction::CloseBuy => ports.execution.close(symbol, id, CloseTarget::Side(Side::Buy)),
        DecisionAction::CloseSell => ports.execution.close(symbol, id, CloseTarget::Side(Side::Sell)),
        DecisionAction::CloseAll => ports.execution.close(symbol, id, CloseTarget::All),
        DecisionAction::None | DecisionAction::Hold | DecisionAction::WaitingForPackage => false,
    }
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("initialized", &self.is_initialized())
            .field("symbols", &self.symbols.len())
            .field("total_decisions", &self.metrics.total_decisions)
            .finish()
    }
}
