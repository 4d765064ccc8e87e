use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, Weekday};

use crate::api::{Alert, MarketDataProvider, Notifier, Severity, QUOTE_BATCH_LIMIT};
use crate::config::{BotConfig, ConfigError};
use crate::execution::position_manager::{
    ExitReason, ExitReport, PositionAction, PositionManager, PositionUpdate, RiskParams,
};
use crate::indicators::{compute_snapshot, resample_bars, IndicatorSnapshot};
use crate::models::{OptionChain, OptionContract};
use crate::persistence::{TradeJournal, TradeRecord};
use crate::risk::{next_weekly_expiry, EntryBlock, MarketPhase, SessionClock};
use crate::strategy::{
    classify_open_interest, evaluate_signal, rsi_label, OiSummary, SignalConfig, SignalDecision,
    SignalEvaluation, SignalInputs,
};

/// Static parameters of a trading session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub underlying: String,
    pub expiry_weekday: Weekday,
    pub bar_minutes: u32,
    pub strike_radius: f64,
    pub oi_fallback_contracts: usize,
    pub signal: SignalConfig,
    pub risk: RiskParams,
    pub clock: SessionClock,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            underlying: "NSE_INDEX|Nifty 50".to_string(),
            expiry_weekday: Weekday::Tue,
            bar_minutes: 5,
            strike_radius: 500.0,
            oi_fallback_contracts: 50,
            signal: SignalConfig::default(),
            risk: RiskParams::default(),
            clock: SessionClock::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &BotConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            underlying: config.underlying.clone(),
            expiry_weekday: config.expiry_day()?,
            bar_minutes: config.bar_minutes,
            strike_radius: config.strike_radius,
            oi_fallback_contracts: config.oi_fallback_contracts,
            signal: config.signal.clone(),
            risk: config.risk.clone(),
            clock: config.session_clock()?,
        })
    }
}

/// Result of one polling tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    MarketNotOpen,
    /// After close or on a non-trading day. `exit` is set when an open
    /// position was squared off on this tick.
    MarketClosed { exit: Option<ExitReport> },
    QuoteUnavailable,
    Holding(PositionUpdate),
    Exited(ExitReport),
    /// Exit fired but could not be journaled; the position stays open
    ExitDeferred { reason: ExitReason, error: String },
    DataUnavailable(String),
    Cooldown { remaining_secs: i64 },
    NoSignal(SignalEvaluation),
    /// Signal fired but no contract or premium was available
    EntryUnavailable(SignalDecision),
    Entered {
        decision: SignalDecision,
        instrument_key: String,
        strike: f64,
        premium: f64,
    },
}

/// Polling-loop state: the open position, cooldown and cached option chain
pub struct TradingSession<M, N, J> {
    settings: SessionSettings,
    market: M,
    notifier: N,
    journal: J,
    positions: PositionManager,
    last_signal: Option<NaiveDateTime>,
    chain: Option<OptionChain>,
    chain_date: Option<NaiveDate>,
    iteration: u64,
}

impl<M, N, J> TradingSession<M, N, J>
where
    M: MarketDataProvider,
    N: Notifier,
    J: TradeJournal,
{
    pub fn new(settings: SessionSettings, market: M, notifier: N, journal: J) -> Self {
        let positions = PositionManager::new(settings.risk.clone());
        Self {
            settings,
            market,
            notifier,
            journal,
            positions,
            last_signal: None,
            chain: None,
            chain_date: None,
            iteration: 0,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn market(&self) -> &M {
        &self.market
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn last_signal(&self) -> Option<NaiveDateTime> {
        self.last_signal
    }

    pub fn chain(&self) -> Option<&OptionChain> {
        self.chain.as_ref()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Load the option chain for the current weekly expiry
    ///
    /// Falls back to the nearest listed expiry when the resolved one has no
    /// contracts.
    pub async fn initialize(&mut self, now: NaiveDateTime) -> anyhow::Result<&OptionChain> {
        let underlying = self.settings.underlying.clone();
        let expiry = next_weekly_expiry(
            now,
            self.settings.expiry_weekday,
            self.settings.clock.market_close(),
        );
        tracing::info!("📅 Loading option chain for expiry {}", expiry);

        let mut contracts = self
            .market
            .option_contracts(&underlying, Some(expiry))
            .await
            .with_context(|| format!("Failed to load contracts for {}", expiry))?;

        let mut chain_expiry = expiry;
        if contracts.is_empty() {
            tracing::warn!("No contracts for {}, looking up the nearest expiry", expiry);
            let all = self
                .market
                .option_contracts(&underlying, None)
                .await
                .context("Failed to load option contracts")?;

            if let Some(nearest) = nearest_expiry(&all, now.date()) {
                chain_expiry = nearest;
                contracts = all.into_iter().filter(|c| c.expiry == nearest).collect();
            }
        }

        if contracts.is_empty() {
            anyhow::bail!("No option contracts available for {}", underlying);
        }

        let spot = self.fetch_price(&underlying).await;
        if spot.is_none() {
            tracing::warn!(
                "Spot unavailable, using first {} contracts for OI",
                self.settings.oi_fallback_contracts
            );
        }

        let chain = OptionChain::new(chain_expiry, contracts).with_oi_universe(
            spot,
            self.settings.strike_radius,
            self.settings.oi_fallback_contracts,
        );
        tracing::info!(
            "✅ Loaded {} contracts for {} ({} in OI window)",
            chain.contracts().len(),
            chain.expiry,
            chain.oi_universe().len()
        );

        self.chain_date = Some(now.date());
        Ok(&*self.chain.insert(chain))
    }

    /// Run one polling iteration
    ///
    /// Collaborator failures surface as outcomes; session state is only
    /// changed by a completed entry or a journaled exit.
    pub async fn tick(&mut self, now: NaiveDateTime) -> TickOutcome {
        self.iteration += 1;
        tracing::info!("⏰ [{}] Iteration #{}", now.format("%d-%b-%Y %H:%M:%S"), self.iteration);

        match self.settings.clock.phase(now) {
            MarketPhase::PreOpen => {
                tracing::info!(
                    "⏸  Market not open yet (Opens {})",
                    self.settings.clock.market_open().format("%H:%M")
                );
                TickOutcome::MarketNotOpen
            }
            MarketPhase::PostClose | MarketPhase::NonTradingDay => self.close_for_the_day(now).await,
            MarketPhase::Open if self.positions.has_open_position() => self.monitor(now).await,
            MarketPhase::Open => self.scan(now).await,
        }
    }

    async fn close_for_the_day(&mut self, now: NaiveDateTime) -> TickOutcome {
        let Some(key) = self.positions.position().map(|p| p.instrument_key.clone()) else {
            tracing::info!("⏸  Market Closed");
            return TickOutcome::MarketClosed { exit: None };
        };

        let Some(premium) = self.fetch_price(&key).await else {
            tracing::warn!("Market closed but no premium for {}, retrying next tick", key);
            return TickOutcome::MarketClosed { exit: None };
        };

        let report = match self.positions.force_exit(premium, ExitReason::MarketClose, now) {
            Ok(report) => report,
            Err(e) => return TickOutcome::DataUnavailable(e.to_string()),
        };

        tracing::info!("💼 CLOSING POSITION AT MARKET CLOSE");
        match self.complete_exit(report, now).await {
            Ok(report) => TickOutcome::MarketClosed { exit: Some(report) },
            Err(_) => TickOutcome::MarketClosed { exit: None },
        }
    }

    async fn monitor(&mut self, now: NaiveDateTime) -> TickOutcome {
        let Some(position) = self.positions.position() else {
            return TickOutcome::QuoteUnavailable;
        };
        let key = position.instrument_key.clone();
        tracing::info!(
            "💼 OPEN POSITION: {} {} | Entry: ₹{:.2}",
            position.direction.entry_label(),
            position.strike,
            position.entry_premium
        );

        let Some(premium) = self.fetch_price(&key).await else {
            tracing::warn!("No premium for {}, skipping evaluation", key);
            return TickOutcome::QuoteUnavailable;
        };

        let update = match self.positions.evaluate(premium, now) {
            Ok(update) => update,
            Err(e) => return TickOutcome::DataUnavailable(e.to_string()),
        };

        tracing::info!(
            "   Current: ₹{:.2} | Diff: ₹{:.2} | P&L: ₹{:.2}",
            premium,
            update.premium_diff,
            update.pnl
        );

        match update.action {
            PositionAction::Exit(report) => {
                let reason = report.reason;
                match self.complete_exit(report, now).await {
                    Ok(report) => TickOutcome::Exited(report),
                    Err(error) => TickOutcome::ExitDeferred { reason, error },
                }
            }
            _ => TickOutcome::Holding(update),
        }
    }

    /// Journal, notify, then flatten and restart the cooldown
    async fn complete_exit(
        &mut self,
        report: ExitReport,
        now: NaiveDateTime,
    ) -> Result<ExitReport, String> {
        if let Err(e) = self.journal.append(&TradeRecord::exit(&report)) {
            tracing::error!("❌ Failed to journal exit, keeping position open: {:#}", e);
            return Err(format!("{:#}", e));
        }

        tracing::info!(
            "🔔 POSITION CLOSED: {} | Entry ₹{:.2} -> Exit ₹{:.2} | P&L ₹{:.2}",
            report.headline(),
            report.entry_premium,
            report.exit_premium,
            report.pnl
        );
        self.send_alert(exit_alert(&report)).await;

        if let Err(e) = self.positions.close_position() {
            tracing::warn!("Position already flat: {}", e);
        }
        self.last_signal = Some(now);

        Ok(report)
    }

    async fn scan(&mut self, now: NaiveDateTime) -> TickOutcome {
        if self.chain.is_none() || self.chain_date != Some(now.date()) {
            if let Err(e) = self.initialize(now).await {
                tracing::warn!("Option chain unavailable: {:#}", e);
                return TickOutcome::DataUnavailable(format!("{:#}", e));
            }
        }

        let candles = match self.market.intraday_candles(&self.settings.underlying).await {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!("❌ Failed to fetch candles: {}", e);
                return TickOutcome::DataUnavailable(e.to_string());
            }
        };

        let bars = resample_bars(&candles, self.settings.bar_minutes);
        let Some(snapshot) = compute_snapshot(&bars, self.settings.signal.rsi_period) else {
            tracing::warn!("❌ No candles yet for this session");
            return TickOutcome::DataUnavailable("no candles for the session".to_string());
        };

        let oi = self.open_interest().await;

        tracing::info!(
            "📊 Spot: {:.2} | Open: {:.2} | VWAP: {:.2} | RSI: {:.2} ({})",
            snapshot.spot,
            snapshot.day_open,
            snapshot.vwap,
            snapshot.rsi,
            rsi_label(snapshot.rsi)
        );
        tracing::info!("📈 OI: CE={:.0} | PE={:.0} → {}", oi.call_oi, oi.put_oi, oi.trend);

        match self.settings.clock.check_entry(now, self.last_signal) {
            Ok(()) => {}
            Err(EntryBlock::MarketNotOpen) => return TickOutcome::MarketNotOpen,
            Err(EntryBlock::MarketClosed) => return TickOutcome::MarketClosed { exit: None },
            Err(EntryBlock::Cooldown { remaining_secs }) => {
                tracing::info!("⏳ COOLDOWN ACTIVE: {}s remaining until next signal", remaining_secs);
                return TickOutcome::Cooldown { remaining_secs };
            }
        }

        let inputs = SignalInputs {
            spot: snapshot.spot,
            day_open: snapshot.day_open,
            vwap: snapshot.vwap,
            rsi: snapshot.rsi,
            oi_trend: oi.trend,
        };
        let evaluation = evaluate_signal(&inputs, &self.settings.signal);
        tracing::info!("{}", evaluation);

        let Some(option_type) = evaluation.decision.option_type() else {
            tracing::info!("⏸  NO SIGNAL - Waiting for all conditions to align...");
            return TickOutcome::NoSignal(evaluation);
        };
        let decision = evaluation.decision;

        let Some(contract) = self
            .chain
            .as_ref()
            .and_then(|chain| chain.atm_contract(snapshot.spot, option_type))
            .cloned()
        else {
            tracing::warn!("⚠️  Signal generated but no {} strike available", option_type);
            return TickOutcome::EntryUnavailable(decision);
        };

        let Some(premium) = self.fetch_price(&contract.instrument_key).await else {
            tracing::warn!("⚠️  Signal generated but premium unavailable for {}", contract.strike);
            return TickOutcome::EntryUnavailable(decision);
        };

        self.enter(&contract, premium, decision, &snapshot, oi, now).await
    }

    async fn enter(
        &mut self,
        contract: &OptionContract,
        premium: f64,
        decision: SignalDecision,
        snapshot: &IndicatorSnapshot,
        oi: OiSummary,
        now: NaiveDateTime,
    ) -> TickOutcome {
        let investment = match self
            .positions
            .open_position(contract, premium, snapshot.spot, now)
        {
            Ok(position) => position.investment(),
            Err(e) => {
                tracing::warn!("Entry refused: {}", e);
                return TickOutcome::EntryUnavailable(decision);
            }
        };
        let label = contract.option_type.entry_label();

        tracing::info!(
            "🚀 NEW SIGNAL - {} {} @ ₹{:.2} (spot {:.2})",
            label,
            contract.strike,
            premium,
            snapshot.spot
        );

        let record = TradeRecord::entry(
            now,
            contract.option_type,
            contract.strike,
            premium,
            snapshot,
            oi.trend,
        );
        if let Err(e) = self.journal.append(&record) {
            tracing::error!("Failed to journal entry: {:#}", e);
        }

        let alert = Alert::new(
            format!("🚀 NEW SIGNAL - {}", label),
            format!("Strike: {} | Lot: {}", contract.strike, self.settings.risk.lot_size),
            Severity::Success,
        )
        .field("Premium", format!("₹{:.2}", premium), true)
        .field("Spot", format!("{:.2}", snapshot.spot), true)
        .field("Investment", format!("₹{:.2}", investment), true);
        self.send_alert(alert).await;

        self.last_signal = Some(now);

        TickOutcome::Entered {
            decision,
            instrument_key: contract.instrument_key.clone(),
            strike: contract.strike,
            premium,
        }
    }

    /// Sum open interest over the chain's strike window, batch by batch
    async fn open_interest(&self) -> OiSummary {
        let Some(chain) = &self.chain else {
            return OiSummary::unknown();
        };

        let mut entries = Vec::new();
        for batch in chain.oi_universe().chunks(QUOTE_BATCH_LIMIT) {
            match self.market.quotes(batch).await {
                Ok(quotes) => {
                    for (key, quote) in quotes {
                        if let (Some(contract), Some(oi)) = (chain.contract(&key), quote.open_interest) {
                            entries.push((contract.option_type, oi));
                        }
                    }
                }
                Err(e) => tracing::warn!("OI batch of {} failed, skipping: {}", batch.len(), e),
            }
        }

        classify_open_interest(entries, self.settings.signal.oi_bias_ratio)
    }

    /// Positive last price for one instrument
    async fn fetch_price(&self, instrument_key: &str) -> Option<f64> {
        let keys = [instrument_key.to_string()];
        match self.market.quotes(&keys).await {
            Ok(quotes) => quotes
                .get(instrument_key)
                .map(|q| q.last_price)
                .filter(|p| p.is_finite() && *p > 0.0),
            Err(e) => {
                tracing::warn!("Quote for {} failed: {}", instrument_key, e);
                None
            }
        }
    }

    async fn send_alert(&self, alert: Alert) {
        if let Err(e) = self.notifier.notify(&alert).await {
            tracing::warn!("Failed to send alert '{}': {}", alert.title, e);
        }
    }
}

/// Earliest expiry on or after `today`, else the latest listed
fn nearest_expiry(contracts: &[OptionContract], today: NaiveDate) -> Option<NaiveDate> {
    contracts
        .iter()
        .map(|c| c.expiry)
        .filter(|e| *e >= today)
        .min()
        .or_else(|| contracts.iter().map(|c| c.expiry).max())
}

pub fn exit_alert(report: &ExitReport) -> Alert {
    let (title, severity) = match report.reason {
        ExitReason::MarketClose => (
            "🔔 Position Closed - Market Close".to_string(),
            Severity::Warning,
        ),
        _ if report.pnl > 0.0 => (format!("🔔 {}", report.headline()), Severity::Success),
        _ => (format!("🔔 {}", report.headline()), Severity::Failure),
    };

    Alert::new(
        title,
        format!("**{}** | Strike: {}", report.direction.entry_label(), report.strike),
        severity,
    )
    .field("Entry", format!("₹{:.2}", report.entry_premium), true)
    .field("Exit", format!("₹{:.2}", report.exit_premium), true)
    .field("P&L", format!("₹{:.2}", report.pnl), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptionType;
    use uuid::Uuid;

    fn report(reason: ExitReason, exit_premium: f64) -> ExitReport {
        let at = NaiveDate::from_ymd_opt(2025, 1, 7)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let premium_diff = exit_premium - 50.0;
        ExitReport {
            position_id: Uuid::new_v4(),
            direction: OptionType::Put,
            strike: 23400.0,
            instrument_key: "NSE_FO|2".to_string(),
            entry_premium: 50.0,
            exit_premium,
            premium_diff,
            pnl: premium_diff * 75.0,
            highest_pnl: 0.0,
            lot_size: 75,
            reason,
            entry_time: at,
            exit_time: at,
        }
    }

    fn contract(expiry: (i32, u32, u32)) -> OptionContract {
        OptionContract {
            instrument_key: "NSE_FO|1".to_string(),
            trading_symbol: "NIFTY".to_string(),
            strike: 23500.0,
            option_type: OptionType::Call,
            expiry: NaiveDate::from_ymd_opt(expiry.0, expiry.1, expiry.2).unwrap(),
            lot_size: 75,
        }
    }

    #[test]
    fn test_exit_alert_colors() {
        let win = exit_alert(&report(ExitReason::TrailingStop, 70.0));
        assert_eq!(win.title, "🔔 TRAILING STOP (Profit: ₹1500.00)");
        assert_eq!(win.severity, Severity::Success);
        assert_eq!(win.description, "**BUY PE** | Strike: 23400");

        let loss = exit_alert(&report(ExitReason::StopLoss, 20.0));
        assert_eq!(loss.severity, Severity::Failure);
        assert_eq!(loss.fields[2].value, "₹-2250.00");
        assert!(!loss.fields[2].inline);

        let close = exit_alert(&report(ExitReason::MarketClose, 60.0));
        assert_eq!(close.title, "🔔 Position Closed - Market Close");
        assert_eq!(close.severity, Severity::Warning);
    }

    #[test]
    fn test_nearest_expiry() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        let contracts = vec![
            contract((2025, 1, 21)),
            contract((2025, 1, 7)),
            contract((2025, 1, 14)),
        ];
        assert_eq!(
            nearest_expiry(&contracts, today),
            NaiveDate::from_ymd_opt(2025, 1, 14)
        );

        // Everything listed is in the past
        let stale = vec![contract((2025, 1, 7)), contract((2024, 12, 31))];
        assert_eq!(nearest_expiry(&stale, today), NaiveDate::from_ymd_opt(2025, 1, 7));
        assert_eq!(nearest_expiry(&[], today), None);
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = SessionSettings::from_config(&BotConfig::default()).unwrap();
        assert_eq!(settings.expiry_weekday, Weekday::Tue);
        assert_eq!(settings.clock, SessionClock::default());
        assert_eq!(settings.risk, RiskParams::default());
        assert_eq!(settings.bar_minutes, 5);
    }
}
