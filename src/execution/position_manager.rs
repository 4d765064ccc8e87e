use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{OptionContract, OptionType};

/// Fixed P&L rules, in rupees for the whole lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParams {
    pub lot_size: u32,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub trailing_stop: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            lot_size: 75,
            take_profit: 1500.0, // ₹20 per unit
            stop_loss: 2000.0,   // ₹26.67 per unit
            trailing_stop: 500.0, // ₹6.67 per unit
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    Open,
    OpenTrailing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    MarketClose,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::StopLoss => "STOP LOSS",
            ExitReason::TrailingStop => "TRAILING STOP",
            ExitReason::MarketClose => "MARKET CLOSE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("Already have open position: {direction} {strike}")]
    AlreadyOpen { direction: OptionType, strike: f64 },
    #[error("No open position")]
    NotOpen,
    #[error("Invalid entry premium: {0}")]
    InvalidPremium(f64),
}

/// The single open option position
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub direction: OptionType,
    pub strike: f64,
    pub instrument_key: String,
    pub trading_symbol: String,
    pub entry_premium: f64,
    pub entry_time: NaiveDateTime,
    pub spot_at_entry: f64,
    pub lot_size: u32,
    pub highest_pnl: f64,
    /// Some once take-profit has armed the trailing stop
    pub trailing_stop_price: Option<f64>,
}

impl Position {
    /// (P&L, premium delta) at `current_premium`. Both strategies buy the option,
    /// so appreciation is profit for CE and PE alike.
    pub fn pnl_at(&self, current_premium: f64) -> (f64, f64) {
        let premium_diff = current_premium - self.entry_premium;
        (premium_diff * f64::from(self.lot_size), premium_diff)
    }

    pub fn is_trailing(&self) -> bool {
        self.trailing_stop_price.is_some()
    }

    /// Capital outlay at entry
    pub fn investment(&self) -> f64 {
        self.entry_premium * f64::from(self.lot_size)
    }
}

/// Terminal record of a closed position
#[derive(Debug, Clone, PartialEq)]
pub struct ExitReport {
    pub position_id: Uuid,
    pub direction: OptionType,
    pub strike: f64,
    pub instrument_key: String,
    pub entry_premium: f64,
    pub exit_premium: f64,
    pub premium_diff: f64,
    pub pnl: f64,
    pub highest_pnl: f64,
    pub lot_size: u32,
    pub reason: ExitReason,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
}

impl ExitReport {
    /// e.g. "STOP LOSS (Loss: ₹2000.00)"
    pub fn headline(&self) -> String {
        match self.reason {
            ExitReason::StopLoss => format!("{} (Loss: ₹{:.2})", self.reason, self.pnl.abs()),
            ExitReason::TrailingStop => format!("{} (Profit: ₹{:.2})", self.reason, self.pnl),
            ExitReason::MarketClose => format!("{} (P&L: ₹{:.2})", self.reason, self.pnl),
        }
    }
}

/// What a monitoring tick did to the position
#[derive(Debug, Clone, PartialEq)]
pub enum PositionAction {
    Hold,
    TrailingArmed { trigger: f64 },
    TrailingRaised { previous: f64, trigger: f64 },
    Exit(ExitReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub pnl: f64,
    pub premium_diff: f64,
    pub action: PositionAction,
}

/// Owns at most one open position and applies the P&L exit rules
#[derive(Debug, Clone)]
pub struct PositionManager {
    params: RiskParams,
    position: Option<Position>,
}

impl PositionManager {
    pub fn new(params: RiskParams) -> Self {
        Self {
            params,
            position: None,
        }
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn has_open_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn state(&self) -> PositionState {
        match &self.position {
            None => PositionState::Flat,
            Some(p) if p.is_trailing() => PositionState::OpenTrailing,
            Some(_) => PositionState::Open,
        }
    }

    /// Flat -> Open
    pub fn open_position(
        &mut self,
        contract: &OptionContract,
        entry_premium: f64,
        spot: f64,
        entry_time: NaiveDateTime,
    ) -> Result<&Position, PositionError> {
        if let Some(existing) = &self.position {
            return Err(PositionError::AlreadyOpen {
                direction: existing.direction,
                strike: existing.strike,
            });
        }

        if !entry_premium.is_finite() || entry_premium <= 0.0 {
            return Err(PositionError::InvalidPremium(entry_premium));
        }

        let position = Position {
            id: Uuid::new_v4(),
            direction: contract.option_type,
            strike: contract.strike,
            instrument_key: contract.instrument_key.clone(),
            trading_symbol: contract.trading_symbol.clone(),
            entry_premium,
            entry_time,
            spot_at_entry: spot,
            lot_size: self.params.lot_size,
            highest_pnl: 0.0,
            trailing_stop_price: None,
        };

        tracing::info!(
            "Opened {} {} @ ₹{:.2} (lot {}, id {})",
            position.direction.entry_label(),
            position.strike,
            position.entry_premium,
            position.lot_size,
            position.id
        );

        Ok(&*self.position.insert(position))
    }

    /// Apply the exit rules to a fresh premium
    ///
    /// Order: stop-loss, then take-profit arming, then the trailing stop. An
    /// exit is reported but the position stays until [`close_position`] is
    /// called, so the caller can journal it first.
    ///
    /// [`close_position`]: PositionManager::close_position
    pub fn evaluate(
        &mut self,
        current_premium: f64,
        now: NaiveDateTime,
    ) -> Result<PositionUpdate, PositionError> {
        let params = self.params.clone();
        let position = self.position.as_mut().ok_or(PositionError::NotOpen)?;

        let (pnl, premium_diff) = position.pnl_at(current_premium);
        position.highest_pnl = position.highest_pnl.max(pnl);

        let update = |action| PositionUpdate {
            pnl,
            premium_diff,
            action,
        };

        if pnl <= -params.stop_loss {
            let report = build_report(position, current_premium, ExitReason::StopLoss, now);
            return Ok(update(PositionAction::Exit(report)));
        }

        let trail_distance = params.trailing_stop / f64::from(position.lot_size);

        let Some(trigger) = position.trailing_stop_price else {
            if pnl >= params.take_profit {
                let trigger = current_premium - trail_distance;
                position.trailing_stop_price = Some(trigger);
                tracing::info!("🎯 Take profit reached! Trailing stop: ₹{:.2}", trigger);
                return Ok(update(PositionAction::TrailingArmed { trigger }));
            }
            return Ok(update(PositionAction::Hold));
        };

        if current_premium <= trigger {
            let report = build_report(position, current_premium, ExitReason::TrailingStop, now);
            return Ok(update(PositionAction::Exit(report)));
        }

        let candidate = current_premium - trail_distance;
        if candidate > trigger {
            position.trailing_stop_price = Some(candidate);
            tracing::info!("📈 Trailing stop updated: ₹{:.2}", candidate);
            return Ok(update(PositionAction::TrailingRaised {
                previous: trigger,
                trigger: candidate,
            }));
        }

        Ok(update(PositionAction::Hold))
    }

    /// Unconditional exit at the given premium (market close)
    pub fn force_exit(
        &mut self,
        current_premium: f64,
        reason: ExitReason,
        now: NaiveDateTime,
    ) -> Result<ExitReport, PositionError> {
        let position = self.position.as_mut().ok_or(PositionError::NotOpen)?;
        let (pnl, _) = position.pnl_at(current_premium);
        position.highest_pnl = position.highest_pnl.max(pnl);
        Ok(build_report(position, current_premium, reason, now))
    }

    /// Open/OpenTrailing -> Flat
    pub fn close_position(&mut self) -> Result<Position, PositionError> {
        self.position.take().ok_or(PositionError::NotOpen)
    }
}

fn build_report(
    position: &Position,
    exit_premium: f64,
    reason: ExitReason,
    exit_time: NaiveDateTime,
) -> ExitReport {
    let (pnl, premium_diff) = position.pnl_at(exit_premium);
    ExitReport {
        position_id: position.id,
        direction: position.direction,
        strike: position.strike,
        instrument_key: position.instrument_key.clone(),
        entry_premium: position.entry_premium,
        exit_premium,
        premium_diff,
        pnl,
        highest_pnl: position.highest_pnl,
        lot_size: position.lot_size,
        reason,
        entry_time: position.entry_time,
        exit_time,
    }
}
