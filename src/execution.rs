// =============================================================================
// Execution ports: position inventory, order execution and session gate
// =============================================================================
//
// The decision engine never talks to a terminal directly. It is handed three
// narrow collaborators at initialisation and calls them synchronously; every
// call returns a plain value (snapshot or success flag).

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::decision_package::DecisionPackage;
use crate::runtime_config::SessionSettings;
use crate::types::{CloseTarget, Side};

// ---------------------------------------------------------------------------
// Position inventory
// ---------------------------------------------------------------------------

/// Aggregate of one symbol's open positions tagged with an execution id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub buy_count: u32,
    pub sell_count: u32,
    pub buy_profit: f64,
    pub sell_profit: f64,
    pub total_profit: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub total_volume: f64,
}

impl PositionSnapshot {
    pub fn count(&self, side: Side) -> u32 {
        match side {
            Side::Buy => self.buy_count,
            Side::Sell => self.sell_count,
        }
    }

    pub fn total_count(&self) -> u32 {
        self.buy_count + self.sell_count
    }
}

pub trait PositionInventory: Send + Sync {
    fn query_positions(&self, symbol: &str, execution_id: u64) -> PositionSnapshot;
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// An open request as issued by the decision engine.
#[derive(Debug, Clone, Copy)]
pub struct OpenOrder<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub package: &'a DecisionPackage,
    pub execution_id: u64,
    /// Account percentage the executor may risk on this order.
    pub risk_percent: f64,
}

pub trait ExecutionPort: Send + Sync {
    fn open(&self, order: &OpenOrder<'_>) -> bool;

    fn close(&self, symbol: &str, execution_id: u64, target: CloseTarget) -> bool;
}

// ---------------------------------------------------------------------------
// Trading session
// ---------------------------------------------------------------------------

pub trait TradingSession: Send + Sync {
    fn is_trading_session(&self, symbol: &str) -> bool;
}

/// Fixed UTC trading hours, the same for every symbol. A window whose start
/// is after its end wraps midnight.
#[derive(Debug, Clone)]
pub struct StaticSession {
    start_hour: u32,
    end_hour: u32,
}

impl StaticSession {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            start_hour: settings.start_hour_utc.min(24),
            end_hour: settings.end_hour_utc.min(24),
        }
    }

    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour();
        if self.start_hour == self.end_hour {
            return false;
        }
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl TradingSession for StaticSession {
    fn is_trading_session(&self, _symbol: &str) -> bool {
        self.is_open_at(Utc::now())
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// The collaborators handed to the decision engine on initialisation.
#[derive(Clone)]
pub struct Ports {
    pub inventory: Arc<dyn PositionInventory>,
    pub execution: Arc<dyn ExecutionPort>,
    pub session: Arc<dyn TradingSession>,
}

impl std::fmt::Debug for Ports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ports")
            .field("inventory", &"<PositionInventory>")
            .field("execution", &"<ExecutionPort>")
            .field("session", &"<TradingSession>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 30, 0).unwrap()
    }

    #[test]
    fn daytime_session_window() {
        let s = StaticSession::new(&SessionSettings {
            start_hour_utc: 7,
            end_hour_utc: 17,
        });
        assert!(!s.is_open_at(at_hour(6)));
        assert!(s.is_open_at(at_hour(7)));
        assert!(s.is_open_at(at_hour(16)));
        assert!(!s.is_open_at(at_hour(17)));
    }

    #[test]
    fn overnight_session_wraps_midnight() {
        let s = StaticSession::new(&SessionSettings {
            start_hour_utc: 22,
            end_hour_utc: 6,
        });
        assert!(s.is_open_at(at_hour(23)));
        assert!(s.is_open_at(at_hour(2)));
        assert!(!s.is_open_at(at_hour(12)));
    }

    #[test]
    fn snapshot_counts_by_side() {
        let snap = PositionSnapshot {
            buy_count: 2,
            sell_count: 1,
            ..PositionSnapshot::default()
        };
        assert_eq!(snap.count(Side::Buy), 2);
        assert_eq!(snap.total_count(), 3);
    }
}
