// =============================================================================
// Position Engine: in-memory paper book behind the execution ports
// =============================================================================
//
// Life-cycle:
//   open (at the current mark)  ->  marked to market  ->  closed
//
// Positions are tagged with the execution identifier of the engine instance
// that opened them; queries and closes only ever see matching positions.
// Every close realises profit and queues a trade-completed notification for
// the scheduler. The risk manager is only read here, for the sizing balance.
//
// Thread-safety: all mutable state is behind `parking_lot` locks.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::execution::{ExecutionPort, OpenOrder, PositionInventory, PositionSnapshot};
use crate::risk::RiskManager;
use crate::types::{CloseTarget, Side};

/// Stop distance assumed when a package carries no trade setup, as a
/// fraction of the entry price.
const DEFAULT_STOP_FRACTION: f64 = 0.005;
/// Closed positions kept for inspection; the oldest are dropped first.
pub const MAX_CLOSED_POSITIONS: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct PaperPosition {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub execution_id: u64,
    pub entry_price: f64,
    pub volume: f64,
    pub current_price: f64,
    /// Floating profit while open, realised profit once closed.
    pub profit: f64,
    pub confidence: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PaperPosition {
    fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.profit = self.side.sign() * (price - self.entry_price) * self.volume;
    }
}

/// Realised result of one closed position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedTrade {
    pub symbol: String,
    pub profit: f64,
}

pub struct PositionManager {
    open: RwLock<Vec<PaperPosition>>,
    closed: RwLock<Vec<PaperPosition>>,
    marks: RwLock<HashMap<String, f64>>,
    completed: Mutex<Vec<CompletedTrade>>,
    risk: Arc<RiskManager>,
}

impl PositionManager {
    pub fn new(risk: Arc<RiskManager>) -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
            marks: RwLock::new(HashMap::new()),
            completed: Mutex::new(Vec::new()),
            risk,
        }
    }

    // -------------------------------------------------------------------------
    // Prices
    // -------------------------------------------------------------------------

    /// Set the mark for `symbol` and revalue its open positions.
    pub fn update_price(&self, symbol: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            warn!(symbol, price, "ignoring invalid mark price");
            return;
        }
        self.marks.write().insert(symbol.to_string(), price);
        for pos in self.open.write().iter_mut().filter(|p| p.symbol == symbol) {
            pos.mark(price);
        }
    }

    pub fn mark_price(&self, symbol: &str) -> Option<f64> {
        self.marks.read().get(symbol).copied()
    }

    // -------------------------------------------------------------------------
    // Open / close
    // -------------------------------------------------------------------------

    fn open_position(&self, order: &OpenOrder<'_>) -> Option<String> {
        let Some(price) = self.mark_price(order.symbol) else {
            warn!(symbol = order.symbol, "no mark price, cannot open");
            return None;
        };

        let stop_distance = order
            .package
            .setup
            .filter(|s| s.is_valid())
            .map(|s| s.stop_distance())
            .unwrap_or(price * DEFAULT_STOP_FRACTION);
        let volume = RiskManager::position_size_with_confidence(
            self.risk.balance(),
            order.risk_percent,
            order.package.confidence,
            stop_distance,
        );
        if volume <= 0.0 {
            warn!(symbol = order.symbol, stop_distance, "sized volume is zero, not opening");
            return None;
        }

        let id = Uuid::new_v4().to_string();
        let pos = PaperPosition {
            id: id.clone(),
            symbol: order.symbol.to_string(),
            side: order.side,
            execution_id: order.execution_id,
            entry_price: price,
            volume,
            current_price: price,
            profit: 0.0,
            confidence: order.package.confidence,
            opened_at: Utc::now(),
            closed_at: None,
        };

        info!(
            id = %id,
            symbol = order.symbol,
            side = %order.side,
            price,
            volume,
            execution_id = order.execution_id,
            "paper position opened"
        );

        self.open.write().push(pos);
        Some(id)
    }

    fn close_matching(&self, symbol: &str, execution_id: u64, target: CloseTarget) -> usize {
        let mut open = self.open.write();
        let (to_close, keep): (Vec<PaperPosition>, Vec<PaperPosition>) =
            open.drain(..).partition(|p| {
                p.symbol == symbol
                    && p.execution_id == execution_id
                    && match target {
                        CloseTarget::All => true,
                        CloseTarget::Side(side) => p.side == side,
                    }
            });
        *open = keep;
        drop(open);

        let now = Utc::now();
        let count = to_close.len();
        let mut closed = self.closed.write();
        for mut pos in to_close {
            pos.closed_at = Some(now);
            info!(id = %pos.id, symbol, side = %pos.side, profit = pos.profit, "paper position closed");
            self.completed.lock().push(CompletedTrade {
                symbol: pos.symbol.clone(),
                profit: pos.profit,
            });
            closed.push(pos);
        }
        if closed.len() > MAX_CLOSED_POSITIONS {
            let excess = closed.len() - MAX_CLOSED_POSITIONS;
            closed.drain(..excess);
        }
        count
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn open_positions(&self) -> Vec<PaperPosition> {
        self.open.read().clone()
    }

    /// The most recent `count` closed positions, newest first.
    pub fn closed_positions(&self, count: usize) -> Vec<PaperPosition> {
        self.closed.read().iter().rev().take(count).cloned().collect()
    }

    /// Drain trades closed since the last call.
    pub fn take_completed(&self) -> Vec<CompletedTrade> {
        std::mem::take(&mut *self.completed.lock())
    }
}

impl PositionInventory for PositionManager {
    fn query_positions(&self, symbol: &str, execution_id: u64) -> PositionSnapshot {
        self.open
            .read()
            .iter()
            .filter(|p| p.symbol == symbol && p.execution_id == execution_id)
            .fold(PositionSnapshot::default(), |mut snap, p| {
                match p.side {
                    Side::Buy => {
                        snap.buy_count += 1;
                        snap.buy_profit += p.profit;
                        snap.buy_volume += p.volume;
                    }
                    Side::Sell => {
                        snap.sell_count += 1;
                        snap.sell_profit += p.profit;
                        snap.sell_volume += p.volume;
                    }
                }
                snap.total_profit += p.profit;
                snap.total_volume += p.volume;
                snap
            })
    }
}

impl ExecutionPort for PositionManager {
    fn open(&self, order: &OpenOrder<'_>) -> bool {
        self.open_position(order).is_some()
    }

    /// Closing when nothing matches succeeds.
    fn close(&self, symbol: &str, execution_id: u64, target: CloseTarget) -> bool {
        let closed = self.close_matching(symbol, execution_id, target);
        if closed == 0 {
            info!(symbol, %target, "close requested with no matching positions");
        }
        true
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("open_positions", &self.open.read().len())
            .field("closed_positions", &self.closed.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_package::DecisionPackage;
    use crate::runtime_config::RiskSettings;
    use crate::types::Direction;

    fn book() -> PositionManager {
        PositionManager::new(Arc::new(RiskManager::new(&RiskSettings::default())))
    }

    fn open(book: &PositionManager, symbol: &str, side: Side, execution_id: u64) -> bool {
        let package = DecisionPackage::manual(symbol, Direction::Bullish, 80.0, Utc::now());
        book.open(&OpenOrder {
            symbol,
            side,
            package: &package,
            execution_id,
            risk_percent: 1.0,
        })
    }

    #[test]
    fn open_requires_a_mark() {
        let b = book();
        assert!(!open(&b, "EURUSD", Side::Buy, 1));
        b.update_price("EURUSD", 1.1000);
        assert!(open(&b, "EURUSD", Side::Buy, 1));
        assert_eq!(b.open_positions().len(), 1);
    }

    #[test]
    fn snapshot_only_sees_own_execution_id() {
        let b = book();
        b.update_price("EURUSD", 1.1000);
        open(&b, "EURUSD", Side::Buy, 1);
        open(&b, "EURUSD", Side::Sell, 1);
        open(&b, "EURUSD", Side::Buy, 2);

        let snap = b.query_positions("EURUSD", 1);
        assert_eq!(snap.buy_count, 1);
        assert_eq!(snap.sell_count, 1);
        assert_eq!(b.query_positions("GBPUSD", 1), PositionSnapshot::default());
    }

    #[test]
    fn marks_revalue_profit() {
        let b = book();
        b.update_price("EURUSD", 1.1000);
        open(&b, "EURUSD", Side::Buy, 1);
        b.update_price("EURUSD", 1.1010);
        let snap = b.query_positions("EURUSD", 1);
        assert!(snap.buy_profit > 0.0);
        assert!((snap.total_profit - snap.buy_profit).abs() < 1e-9);
    }

    #[test]
    fn close_side_realises_and_queues_completion() {
        let b = book();
        b.update_price("EURUSD", 1.1000);
        open(&b, "EURUSD", Side::Buy, 1);
        open(&b, "EURUSD", Side::Sell, 1);
        b.update_price("EURUSD", 1.0990);

        assert!(b.close("EURUSD", 1, CloseTarget::Side(Side::Buy)));
        let snap = b.query_positions("EURUSD", 1);
        assert_eq!(snap.buy_count, 0);
        assert_eq!(snap.sell_count, 1);

        let done = b.take_completed();
        assert_eq!(done.len(), 1);
        assert!(done[0].profit < 0.0);
        assert!(b.take_completed().is_empty());
        assert_eq!(b.closed_positions(10).len(), 1);
    }

    #[test]
    fn closed_history_is_capped() {
        let b = book();
        b.update_price("EURUSD", 1.1000);
        for _ in 0..MAX_CLOSED_POSITIONS + 3 {
            open(&b, "EURUSD", Side::Buy, 1);
            b.close("EURUSD", 1, CloseTarget::All);
        }
        assert_eq!(b.closed_positions(usize::MAX).len(), MAX_CLOSED_POSITIONS);
        assert_eq!(b.take_completed().len(), MAX_CLOSED_POSITIONS + 3);
    }

    #[test]
    fn close_all_leaves_other_ids_alone() {
        let b = book();
        b.update_price("EURUSD", 1.1000);
        open(&b, "EURUSD", Side::Buy, 1);
        open(&b, "EURUSD", Side::Buy, 2);
        assert!(b.close("EURUSD", 1, CloseTarget::All));
        assert_eq!(b.open_positions().len(), 1);
        assert_eq!(b.open_positions()[0].execution_id, 2);
    }
}
