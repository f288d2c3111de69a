// =============================================================================
// Central Application State: Confluence Engine
// =============================================================================
//
// Ties the pipeline together: the confluence aggregator produces packages,
// the per-symbol trend trackers annotate them, and the decision engine acts
// on them through the paper book. AppState also keeps the audit rings and
// builds the snapshot served by the diagnostics API.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock around every mutable component.
//   - Arc wrappers for the book and risk manager, which are shared with the
//     decision engine through its ports.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::decision::state::DecisionMetrics;
use crate::decision::{DecisionEngine, SymbolSnapshot};
use crate::decision_envelope::DecisionEnvelope;
use crate::execution::{Ports, StaticSession};
use crate::position_engine::{PaperPosition, PositionManager};
use crate::risk::{RiskManager, RiskSnapshot};
use crate::runtime_config::RuntimeConfig;
use crate::signals::{
    AggregatorStats, AnalyzerModule, ConfidenceAggregator, ConfidenceTrendTracker, TrendAnnotation,
};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the diagnostics error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Optional machine-readable code (`execution`, `config`, ...).
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every recorded
    /// decision or error.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Pipeline ────────────────────────────────────────────────────────
    pub aggregator: RwLock<ConfidenceAggregator>,
    pub trend_trackers: RwLock<HashMap<String, ConfidenceTrendTracker>>,
    pub engine: RwLock<DecisionEngine>,

    // ── Book / Risk ─────────────────────────────────────────────────────
    pub position_manager: Arc<PositionManager>,
    pub risk_manager: Arc<RiskManager>,

    // ── Audit Trail ─────────────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<DecisionEnvelope>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build the full pipeline from `config` and the analyzer modules that
    /// feed the aggregator. The decision engine is initialised against the
    /// paper book and every configured symbol is registered with the
    /// default parameters.
    pub fn new(config: RuntimeConfig, modules: Vec<Box<dyn AnalyzerModule>>) -> Self {
        let risk_manager = Arc::new(RiskManager::new(&config.risk));
        let position_manager = Arc::new(PositionManager::new(Arc::clone(&risk_manager)));

        let aggregator = ConfidenceAggregator::new(config.aggregator.clone(), modules);
        if !aggregator.is_initialized() {
            warn!("no analyzer modules supplied, every package will be invalid");
        }

        let mut engine = DecisionEngine::new(config.engine.clone(), config.default_params.clone())
            .with_risk_manager(Arc::clone(&risk_manager));
        engine.initialize(Ports {
            inventory: position_manager.clone(),
            execution: position_manager.clone(),
            session: Arc::new(StaticSession::new(&config.session)),
        });

        let mut trend_trackers = HashMap::new();
        for symbol in &config.symbols {
            engine.register_symbol(symbol, config.default_params.clone());
            trend_trackers.insert(symbol.clone(), ConfidenceTrendTracker::new(config.trend.clone()));
        }

        info!(
            symbols = ?config.symbols,
            modules = aggregator.module_count(),
            "application state initialised"
        );

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            aggregator: RwLock::new(aggregator),
            trend_trackers: RwLock::new(trend_trackers),
            engine: RwLock::new(engine),
            position_manager,
            risk_manager,
            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error with an optional machine-readable code. The ring is
    /// capped at [`MAX_RECENT_ERRORS`]; oldest entries are evicted first.
    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Decision Audit ──────────────────────────────────────────────────

    /// Record a decision envelope, capped at [`MAX_RECENT_DECISIONS`].
    pub fn push_decision(&self, envelope: DecisionEnvelope) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(envelope);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }
        drop(decisions);

        self.increment_version();
    }

    /// The newest `limit` envelopes, newest first, optionally for one symbol.
    pub fn recent_decisions_for(&self, symbol: Option<&str>, limit: usize) -> Vec<DecisionEnvelope> {
        self.recent_decisions
            .read()
            .iter()
            .rev()
            .filter(|d| symbol.map_or(true, |s| d.symbol == s))
            .take(limit)
            .cloned()
            .collect()
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the engine state. This is
    /// the payload of `GET /api/v1/state`.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = Utc::now();
        let symbols = self.runtime_config.read().symbols.clone();

        let (engine_status, symbol_snapshots, metrics) = {
            let engine = self.engine.read();
            (engine.status(), engine.snapshots(), engine.metrics().clone())
        };

        let trends: BTreeMap<String, TrendAnnotation> = self
            .trend_trackers
            .read()
            .iter()
            .filter(|(_, t)| !t.history().is_empty())
            .map(|(s, t)| (s.clone(), t.annotation()))
            .collect();

        let recent_errors = self.recent_errors.read().clone();

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: now.timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            configured_symbols: symbols,
            engine_status,
            symbols: symbol_snapshots,
            metrics,
            aggregator: self.aggregator.read().stats().clone(),
            trends,
            positions: self.position_manager.open_positions(),
            risk: self.risk_manager.snapshot(),
            recent_decisions: self.recent_decisions.read().clone(),
            recent_errors: if recent_errors.is_empty() {
                None
            } else {
                Some(recent_errors)
            },
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full engine state snapshot served by the diagnostics API.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub configured_symbols: Vec<String>,
    pub engine_status: String,
    pub symbols: Vec<SymbolSnapshot>,
    pub metrics: DecisionMetrics,
    pub aggregator: AggregatorStats,
    pub trends: BTreeMap<String, TrendAnnotation>,
    pub positions: Vec<PaperPosition>,
    pub risk: RiskSnapshot,
    pub recent_decisions: Vec<DecisionEnvelope>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_errors: Option<Vec<ErrorRecord>>,
}
