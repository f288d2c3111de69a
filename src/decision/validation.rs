// =============================================================================
// Decision Validation: gates an action must pass before execution
// =============================================================================
//
// Gates for opens:
//   1. Confidence    : at or above the open threshold for the side
//   2. Direction     : package direction agrees with the side
//   3. Session       : the trading session is open
//   4. Cooldown      : no same-side action within the cooldown window
//   5. PositionLimit : per-symbol position count allows another one
//   6. Risk          : account limits clear and reward:risk acceptable
//
// Gates for closes:
//   1. Confidence    : above the profit-scaled close threshold (CLOSE_BUY /
//                       CLOSE_SELL) or below the close-all threshold
//   2. Direction     : the package opposes the side being closed
//
// Any failure is returned as a `PipelineError::Validation` naming the rule;
// the engine downgrades the action to HOLD.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::decision::state::{CooldownRecord, DecisionAction};
use crate::decision_package::DecisionPackage;
use crate::error::{PipelineError, ValidationRule};
use crate::execution::PositionSnapshot;
use crate::risk::RiskManager;
use crate::runtime_config::{DecisionParams, EngineSettings};
use crate::types::{Direction, Side};

/// Profit above which a winner is harder to dislodge.
const WINNER_FACTOR: f64 = 0.9;
/// Loss beyond `LOSER_PROFIT_LIMIT` exits sooner.
const LOSER_FACTOR: f64 = 0.7;
const NEUTRAL_FACTOR: f64 = 0.8;
const LOSER_PROFIT_LIMIT: f64 = -50.0;

/// Close threshold scaled by the open profit of the position.
pub fn close_threshold(base: f64, profit: f64) -> f64 {
    let factor = if profit > 0.0 {
        WINNER_FACTOR
    } else if profit < LOSER_PROFIT_LIMIT {
        LOSER_FACTOR
    } else {
        NEUTRAL_FACTOR
    };
    base * factor
}

/// Open threshold for `side`.
pub fn open_threshold(params: &DecisionParams, side: Side) -> f64 {
    match side {
        Side::Buy => params.buy_threshold,
        Side::Sell => params.sell_threshold,
    }
}

pub fn check_cooldown(
    cooldown: &CooldownRecord,
    side: Side,
    params: &DecisionParams,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> Result<(), PipelineError> {
    if !settings.enforce_cooldown {
        return Ok(());
    }
    let remaining = cooldown.remaining_secs(side, params.cooldown_secs(), now);
    if remaining > 0 {
        return Err(PipelineError::validation(
            ValidationRule::Cooldown,
            format!("{side} cooldown active, {remaining}s remaining"),
        ));
    }
    Ok(())
}

pub fn check_position_limit(
    positions: &PositionSnapshot,
    side: Side,
    params: &DecisionParams,
    settings: &EngineSettings,
) -> Result<(), PipelineError> {
    if !settings.allow_multiple_positions {
        let open = positions.total_count();
        if open > 0 {
            return Err(PipelineError::validation(
                ValidationRule::PositionLimit,
                format!("multiple positions disabled, {open} already open"),
            ));
        }
        return Ok(());
    }

    let count = positions.count(side);
    if count >= params.max_positions {
        return Err(PipelineError::validation(
            ValidationRule::PositionLimit,
            format!("{count} {side} positions open, limit {}", params.max_positions),
        ));
    }
    Ok(())
}

/// Inputs of one validation pass.
pub struct ValidationContext<'a> {
    pub package: &'a DecisionPackage,
    pub params: &'a DecisionParams,
    pub settings: &'a EngineSettings,
    pub positions: &'a PositionSnapshot,
    pub cooldown: &'a CooldownRecord,
    pub session_open: bool,
    pub risk: Option<&'a RiskManager>,
    pub now: DateTime<Utc>,
}

pub struct DecisionValidator;

impl DecisionValidator {
    /// Re-check `action` against every gate that applies to it.
    pub fn validate(action: DecisionAction, ctx: &ValidationContext<'_>) -> Result<(), PipelineError> {
        let result = match action {
            DecisionAction::OpenBuy => Self::validate_open(Side::Buy, ctx),
            DecisionAction::OpenSell => Self::validate_open(Side::Sell, ctx),
            DecisionAction::CloseBuy => Self::validate_close(Side::Buy, ctx),
            DecisionAction::CloseSell => Self::validate_close(Side::Sell, ctx),
            DecisionAction::CloseAll => Self::validate_close_all(ctx),
            _ => Ok(()),
        };

        if let Err(e) = &result {
            debug!(symbol = %ctx.package.symbol, %action, error = %e, "validation failed");
        }
        result
    }

    fn validate_open(side: Side, ctx: &ValidationContext<'_>) -> Result<(), PipelineError> {
        let confidence = ctx.package.confidence;
        let threshold = open_threshold(ctx.params, side);
        if confidence < threshold {
            return Err(PipelineError::validation(
                ValidationRule::Confidence,
                format!("{confidence:.1}% below {side} threshold {threshold:.1}%"),
            ));
        }

        if Side::for_direction(ctx.package.direction) != Some(side) {
            return Err(PipelineError::validation(
                ValidationRule::Direction,
                format!("{} package cannot open {side}", ctx.package.direction),
            ));
        }

        if !ctx.session_open {
            return Err(PipelineError::validation(
                ValidationRule::Session,
                "outside trading session",
            ));
        }

        check_cooldown(ctx.cooldown, side, ctx.params, ctx.settings, ctx.now)?;
        check_position_limit(ctx.positions, side, ctx.params, ctx.settings)?;

        if ctx.settings.use_risk_management {
            if let Some(risk) = ctx.risk {
                risk.can_open_trade()
                    .map_err(|reason| PipelineError::validation(ValidationRule::Risk, reason))?;
            }
            if let Some(setup) = &ctx.package.setup {
                if !RiskManager::risk_reward_ok(setup, ctx.params.min_risk_reward) {
                    return Err(PipelineError::validation(
                        ValidationRule::Risk,
                        format!(
                            "reward:risk {:.2} below minimum {:.2}",
                            setup.risk_reward(),
                            ctx.params.min_risk_reward
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    fn validate_close(side: Side, ctx: &ValidationContext<'_>) -> Result<(), PipelineError> {
        let confidence = ctx.package.confidence;
        let threshold = close_threshold(ctx.params.close_threshold, ctx.positions.total_profit);
        if confidence < threshold {
            return Err(PipelineError::validation(
                ValidationRule::Confidence,
                format!("{confidence:.1}% below close threshold {threshold:.1}%"),
            ));
        }

        let opposing = match side {
            Side::Buy => Direction::Bearish,
            Side::Sell => Direction::Bullish,
        };
        if ctx.package.direction != opposing {
            return Err(PipelineError::validation(
                ValidationRule::Direction,
                format!("{} package does not oppose {side}", ctx.package.direction),
            ));
        }
        Ok(())
    }

    fn validate_close_all(ctx: &ValidationContext<'_>) -> Result<(), PipelineError> {
        let confidence = ctx.package.confidence;
        if confidence >= ctx.params.close_all_threshold {
            return Err(PipelineError::validation(
                ValidationRule::Confidence,
                format!(
                    "{confidence:.1}% not below close-all threshold {:.1}%",
                    ctx.params.close_all_threshold
                ),
            ));
        }
        Ok(())
    }
}
