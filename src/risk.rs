// =============================================================================
// Risk Manager: account-level limits and confidence-scaled sizing
// =============================================================================
//
// Limits:
//   1. Daily Loss : realised loss today as a percentage of the balance at
//                    the start of the day.
//   2. Drawdown   : fall of equity from its running peak, in percent.
//
// Daily counters reset automatically when the UTC date rolls over. All
// mutable state sits behind a `parking_lot::RwLock` so the API can read a
// snapshot while the evaluation loop records results.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::decision_package::{confidence_size_multiplier, TradeSetup};
use crate::runtime_config::RiskSettings;

/// Serialisable view of the risk manager.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSnapshot {
    pub balance: f64,
    pub peak_balance: f64,
    pub daily_pnl: f64,
    pub daily_loss_pct: f64,
    pub drawdown_pct: f64,
    pub daily_trades: u32,
    pub daily_wins: u32,
    pub daily_losses: u32,
    pub can_trade: bool,
    pub blocked_reason: Option<String>,
    pub current_date: String,
}

struct Inner {
    balance: f64,
    peak_balance: f64,
    day_start_balance: f64,
    daily_pnl: f64,
    daily_trades: u32,
    daily_wins: u32,
    daily_losses: u32,
    current_date: String,
}

pub struct RiskManager {
    state: RwLock<Inner>,
    max_daily_loss_pct: f64,
    max_drawdown_pct: f64,
}

impl RiskManager {
    pub fn new(settings: &RiskSettings) -> Self {
        let balance = settings.account_balance.max(0.0);
        info!(
            balance,
            max_daily_loss_pct = settings.max_daily_loss_pct,
            max_drawdown_pct = settings.max_drawdown_pct,
            "risk manager initialised"
        );
        Self {
            state: RwLock::new(Inner {
                balance,
                peak_balance: balance,
                day_start_balance: balance,
                daily_pnl: 0.0,
                daily_trades: 0,
                daily_wins: 0,
                daily_losses: 0,
                current_date: today(),
            }),
            max_daily_loss_pct: settings.max_daily_loss_pct,
            max_drawdown_pct: settings.max_drawdown_pct,
        }
    }

    pub fn balance(&self) -> f64 {
        self.state.read().balance
    }

    /// Book the realised profit of a closed trade.
    pub fn record_closed_trade(&self, pnl: f64) {
        self.maybe_reset_daily();
        let mut s = self.state.write();

        s.balance += pnl;
        s.daily_pnl += pnl;
        s.daily_trades += 1;
        if pnl >= 0.0 {
            s.daily_wins += 1;
        } else {
            s.daily_losses += 1;
        }
        if s.balance > s.peak_balance {
            s.peak_balance = s.balance;
        }

        debug!(
            pnl,
            balance = s.balance,
            daily_pnl = s.daily_pnl,
            drawdown_pct = drawdown_pct(&s),
            "closed trade booked"
        );
    }

    /// `Err(reason)` when a limit forbids opening new exposure.
    pub fn can_open_trade(&self) -> Result<(), String> {
        self.maybe_reset_daily();
        let s = self.state.read();

        let loss_pct = daily_loss_pct(&s);
        if loss_pct >= self.max_daily_loss_pct {
            let msg = format!(
                "daily loss {:.2}% reached limit {:.2}%",
                loss_pct, self.max_daily_loss_pct
            );
            warn!("{}", msg);
            return Err(msg);
        }

        let dd = drawdown_pct(&s);
        if dd >= self.max_drawdown_pct {
            let msg = format!("drawdown {:.2}% reached limit {:.2}%", dd, self.max_drawdown_pct);
            warn!("{}", msg);
            return Err(msg);
        }

        Ok(())
    }

    /// Whether `setup` pays at least `min_risk_reward` per unit risked.
    pub fn risk_reward_ok(setup: &TradeSetup, min_risk_reward: f64) -> bool {
        setup.is_valid() && setup.risk_reward() >= min_risk_reward
    }

    /// Volume risking `risk_percent` of `balance` over `stop_distance`,
    /// scaled by the confidence tier. 0 for a non-positive stop distance.
    pub fn position_size_with_confidence(
        balance: f64,
        risk_percent: f64,
        confidence: f64,
        stop_distance: f64,
    ) -> f64 {
        if stop_distance <= 0.0 || !stop_distance.is_finite() || balance <= 0.0 {
            return 0.0;
        }
        let risk_amount = balance * risk_percent.max(0.0) / 100.0;
        risk_amount / stop_distance * confidence_size_multiplier(confidence)
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        let blocked_reason = self.can_open_trade().err();
        let s = self.state.read();
        RiskSnapshot {
            balance: s.balance,
            peak_balance: s.peak_balance,
            daily_pnl: s.daily_pnl,
            daily_loss_pct: daily_loss_pct(&s),
            drawdown_pct: drawdown_pct(&s),
            daily_trades: s.daily_trades,
            daily_wins: s.daily_wins,
            daily_losses: s.daily_losses,
            can_trade: blocked_reason.is_none(),
            blocked_reason,
            current_date: s.current_date.clone(),
        }
    }

    fn maybe_reset_daily(&self) {
        let date = today();
        if self.state.read().current_date == date {
            return;
        }
        let mut s = self.state.write();
        if s.current_date != date {
            info!(old_date = %s.current_date, new_date = %date, "date rolled, resetting daily risk counters");
            Self::do_reset(&mut s, &date);
        }
    }

    fn do_reset(s: &mut Inner, date: &str) {
        s.day_start_balance = s.balance;
        s.daily_pnl = 0.0;
        s.daily_trades = 0;
        s.daily_wins = 0;
        s.daily_losses = 0;
        s.current_date = date.to_string();
    }
}

impl std::fmt::Debug for RiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskManager")
            .field("balance", &self.balance())
            .field("max_daily_loss_pct", &self.max_daily_loss_pct)
            .field("max_drawdown_pct", &self.max_drawdown_pct)
            .finish()
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn daily_loss_pct(s: &Inner) -> f64 {
    if s.day_start_balance <= 0.0 {
        return 0.0;
    }
    (-s.daily_pnl / s.day_start_balance * 100.0).max(0.0)
}

fn drawdown_pct(s: &Inner) -> f64 {
    if s.peak_balance <= 0.0 {
        return 0.0;
    }
    ((s.peak_balance - s.balance) / s.peak_balance * 100.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RiskManager {
        RiskManager::new(&RiskSettings {
            account_balance: 10_000.0,
            max_daily_loss_pct: 5.0,
            max_drawdown_pct: 10.0,
            ..RiskSettings::default()
        })
    }

    #[test]
    fn fresh_manager_allows_trading() {
        assert!(manager().can_open_trade().is_ok());
    }

    #[test]
    fn daily_loss_limit_blocks() {
        let rm = manager();
        rm.record_closed_trade(-300.0);
        assert!(rm.can_open_trade().is_ok());
        rm.record_closed_trade(-250.0);
        let err = rm.can_open_trade().unwrap_err();
        assert!(err.contains("daily loss"));
        let snap = rm.snapshot();
        assert!(!snap.can_trade);
        assert_eq!(snap.daily_losses, 2);
    }

    #[test]
    fn drawdown_measured_from_peak() {
        let rm = RiskManager::new(&RiskSettings {
            account_balance: 10_000.0,
            max_daily_loss_pct: 50.0,
            max_drawdown_pct: 10.0,
            ..RiskSettings::default()
        });
        rm.record_closed_trade(2_000.0);
        rm.record_closed_trade(-1_300.0);
        // peak 12000, balance 10700: 10.8 %
        assert!(rm.can_open_trade().unwrap_err().contains("drawdown"));
    }

    #[test]
    fn risk_reward_gate() {
        let setup = TradeSetup {
            entry: 100.0,
            stop_loss: 99.0,
            take_profit: 101.2,
        };
        assert!(!RiskManager::risk_reward_ok(&setup, 1.5));
        assert!(RiskManager::risk_reward_ok(&setup, 1.2));
    }

    #[test]
    fn size_scales_with_confidence() {
        let base = RiskManager::position_size_with_confidence(10_000.0, 1.0, 75.0, 0.005);
        assert!((base - 20_000.0).abs() < 1e-6);
        let high = RiskManager::position_size_with_confidence(10_000.0, 1.0, 90.0, 0.005);
        assert!((high - 25_000.0).abs() < 1e-6);
        assert!(RiskManager::position_size_with_confidence(10_000.0, 1.0, 90.0, 0.0).abs() < f64::EPSILON);
    }
}
