// =============================================================================
// Decision state: actions, per-symbol records, cooldowns and metrics
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decision_package::DecisionPackage;
use crate::error::PipelineError;
use crate::execution::PositionSnapshot;
use crate::runtime_config::DecisionParams;
use crate::types::{Direction, Side};

// =============================================================================
// DecisionAction
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    #[default]
    None,
    OpenBuy,
    OpenSell,
    CloseBuy,
    CloseSell,
    CloseAll,
    Hold,
    WaitingForPackage,
}

impl DecisionAction {
    /// Whether the action requires an execution request.
    pub fn is_actionable(self) -> bool {
        !matches!(self, Self::None | Self::Hold | Self::WaitingForPackage)
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::OpenBuy | Self::OpenSell)
    }

    /// The side an open or single-side close acts on.
    pub fn side(self) -> Option<Side> {
        match self {
            Self::OpenBuy | Self::CloseBuy => Some(Side::Buy),
            Self::OpenSell | Self::CloseSell => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn open_for(side: Side) -> Self {
        match side {
            Side::Buy => Self::OpenBuy,
            Side::Sell => Self::OpenSell,
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::None => "NONE",
            Self::OpenBuy => "OPEN_BUY",
            Self::OpenSell => "OPEN_SELL",
            Self::CloseBuy => "CLOSE_BUY",
            Self::CloseSell => "CLOSE_SELL",
            Self::CloseAll => "CLOSE_ALL",
            Self::Hold => "HOLD",
            Self::WaitingForPackage => "WAITING_FOR_PACKAGE",
        };
        f.write_str(label)
    }
}

// =============================================================================
// PositionState
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    NoPosition,
    HasBuy,
    HasSell,
    HasBoth,
}

impl PositionState {
    pub fn classify(snapshot: &PositionSnapshot) -> Self {
        match (snapshot.buy_count > 0, snapshot.sell_count > 0) {
            (false, false) => Self::NoPosition,
            (true, false) => Self::HasBuy,
            (false, true) => Self::HasSell,
            (true, true) => Self::HasBoth,
        }
    }

    pub fn holds(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Self::HasBuy | Self::HasBoth, Side::Buy) | (Self::HasSell | Self::HasBoth, Side::Sell)
        )
    }
}

// =============================================================================
// CooldownRecord
// =============================================================================

/// Last action time and action count per side.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CooldownRecord {
    pub last_buy: Option<DateTime<Utc>>,
    pub last_sell: Option<DateTime<Utc>>,
    pub buy_count: u32,
    pub sell_count: u32,
}

impl CooldownRecord {
    pub fn last_for(&self, side: Side) -> Option<DateTime<Utc>> {
        match side {
            Side::Buy => self.last_buy,
            Side::Sell => self.last_sell,
        }
    }

    /// Seconds until `side` may act again; 0 when clear.
    pub fn remaining_secs(&self, side: Side, cooldown_secs: i64, now: DateTime<Utc>) -> i64 {
        match self.last_for(side) {
            Some(last) => (cooldown_secs - (now - last).num_seconds()).max(0),
            None => 0,
        }
    }

    pub fn record(&mut self, side: Side, at: DateTime<Utc>) {
        match side {
            Side::Buy => {
                self.last_buy = Some(at);
                self.buy_count += 1;
            }
            Side::Sell => {
                self.last_sell = Some(at);
                self.sell_count += 1;
            }
        }
    }

    /// Record the buckets touched by an executed action. CLOSE_ALL touches
    /// both sides.
    pub fn record_action(&mut self, action: DecisionAction, at: DateTime<Utc>) {
        match action {
            DecisionAction::CloseAll => {
                self.record(Side::Buy, at);
                self.record(Side::Sell, at);
            }
            other => {
                if let Some(side) = other.side() {
                    self.record(side, at);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// DecisionMetrics
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DecisionMetrics {
    pub total_decisions: u64,
    pub profitable_decisions: u64,
    /// profitable / total × 100
    pub accuracy_rate: f64,
    pub average_confidence: f64,
    pub started_at: DateTime<Utc>,
}

impl DecisionMetrics {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            total_decisions: 0,
            profitable_decisions: 0,
            accuracy_rate: 0.0,
            average_confidence: 0.0,
            started_at,
        }
    }

    pub fn record_decision(&mut self, confidence: f64) {
        self.total_decisions += 1;
        let n = self.total_decisions as f64;
        self.average_confidence += (confidence - self.average_confidence) / n;
        self.refresh_accuracy();
    }

    /// Count a completed trade; only a positive profit is a win.
    pub fn record_outcome(&mut self, profit: f64) {
        if profit > 0.0 {
            self.profitable_decisions += 1;
        }
        self.refresh_accuracy();
    }

    fn refresh_accuracy(&mut self) {
        self.accuracy_rate = if self.total_decisions == 0 {
            0.0
        } else {
            (self.profitable_decisions as f64 / self.total_decisions as f64 * 100.0).min(100.0)
        };
    }
}

impl Default for DecisionMetrics {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

// =============================================================================
// SymbolState
// =============================================================================

/// Everything the engine keeps for one registered symbol.
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,
    pub params: DecisionParams,
    pub cooldown: CooldownRecord,
    pub last_package: Option<DecisionPackage>,
    pub last_package_at: Option<DateTime<Utc>>,
    pub last_decision: DecisionAction,
    pub last_decision_at: Option<DateTime<Utc>>,
    pub last_reason: Option<String>,
    pub execution_id: u64,
    pub metrics: DecisionMetrics,
}

impl SymbolState {
    pub fn new(symbol: &str, params: DecisionParams, execution_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            params,
            cooldown: CooldownRecord::default(),
            last_package: None,
            last_package_at: None,
            last_decision: DecisionAction::None,
            last_decision_at: None,
            last_reason: None,
            execution_id,
            metrics: DecisionMetrics::new(now),
        }
    }

    pub fn snapshot(&self) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: self.symbol.clone(),
            execution_id: self.execution_id,
            params: self.params.clone(),
            cooldown: self.cooldown.clone(),
            last_decision: self.last_decision,
            last_decision_at: self.last_decision_at,
            last_reason: self.last_reason.clone(),
            last_confidence: self.last_package.as_ref().map(|p| p.confidence),
            last_direction: self.last_package.as_ref().map(|p| p.direction),
            metrics: self.metrics.clone(),
        }
    }
}

/// Serializable per-symbol view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub execution_id: u64,
    pub params: DecisionParams,
    pub cooldown: CooldownRecord,
    pub last_decision: DecisionAction,
    pub last_decision_at: Option<DateTime<Utc>>,
    pub last_reason: Option<String>,
    pub last_confidence: Option<f64>,
    pub last_direction: Option<Direction>,
    pub metrics: DecisionMetrics,
}

// =============================================================================
// DecisionOutcome
// =============================================================================

/// Full result of processing one package.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub symbol: String,
    /// Action chosen by the state machine before gating and validation.
    pub tentative: DecisionAction,
    pub action: DecisionAction,
    pub confidence: f64,
    pub direction: Direction,
    pub position_state: Option<PositionState>,
    pub executed: bool,
    /// Why the action was withheld, downgraded or failed.
    pub error: Option<PipelineError>,
    pub at: DateTime<Utc>,
}

impl DecisionOutcome {
    pub fn new(symbol: &str, package: &DecisionPackage, at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            tentative: DecisionAction::None,
            action: DecisionAction::None,
            confidence: package.confidence,
            direction: package.direction,
            position_state: None,
            executed: false,
            error: None,
            at,
        }
    }

    pub fn finish(mut self, action: DecisionAction, error: Option<PipelineError>) -> Self {
        self.action = action;
        self.error = error;
        self
    }
}
