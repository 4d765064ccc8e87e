use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};

/// Where the wall clock sits relative to the trading session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    PreOpen,
    Open,
    PostClose,
    NonTradingDay,
}

/// Why new-entry evaluation is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryBlock {
    MarketNotOpen,
    MarketClosed,
    Cooldown { remaining_secs: i64 },
}

/// Market-hours window and post-signal cooldown
///
/// Only gates new entries. Monitoring of an open position is never blocked
/// by the cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClock {
    market_open: NaiveTime,
    market_close: NaiveTime,
    cooldown: Duration,
    weekdays_only: bool,
}

impl SessionClock {
    pub fn new(
        market_open: NaiveTime,
        market_close: NaiveTime,
        cooldown: Duration,
        weekdays_only: bool,
    ) -> Self {
        Self {
            market_open,
            market_close,
            cooldown,
            weekdays_only,
        }
    }

    pub fn market_open(&self) -> NaiveTime {
        self.market_open
    }

    pub fn market_close(&self) -> NaiveTime {
        self.market_close
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Session phase at minute resolution: the close minute itself is still open
    pub fn phase(&self, now: NaiveDateTime) -> MarketPhase {
        if self.weekdays_only && matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return MarketPhase::NonTradingDay;
        }

        let minute = (now.hour(), now.minute());
        if minute < (self.market_open.hour(), self.market_open.minute()) {
            MarketPhase::PreOpen
        } else if minute > (self.market_close.hour(), self.market_close.minute()) {
            MarketPhase::PostClose
        } else {
            MarketPhase::Open
        }
    }

    pub fn check_cooldown(
        &self,
        now: NaiveDateTime,
        last_signal: Option<NaiveDateTime>,
    ) -> Result<(), EntryBlock> {
        let Some(last) = last_signal else {
            return Ok(());
        };

        let elapsed = now - last;
        if elapsed < self.cooldown {
            let remaining = (self.cooldown - elapsed).min(self.cooldown);
            return Err(EntryBlock::Cooldown {
                remaining_secs: remaining.num_seconds(),
            });
        }

        Ok(())
    }

    /// Gate for opening a new position
    pub fn check_entry(
        &self,
        now: NaiveDateTime,
        last_signal: Option<NaiveDateTime>,
    ) -> Result<(), EntryBlock> {
        match self.phase(now) {
            MarketPhase::PreOpen => Err(EntryBlock::MarketNotOpen),
            MarketPhase::PostClose | MarketPhase::NonTradingDay => Err(EntryBlock::MarketClosed),
            MarketPhase::Open => self.check_cooldown(now, last_signal),
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self {
            market_open: NaiveTime::MIN + Duration::minutes(9 * 60 + 15),
            market_close: NaiveTime::MIN + Duration::minutes(15 * 60 + 30),
            cooldown: Duration::seconds(300),
            weekdays_only: true,
        }
    }
}

/// Next weekly expiry on `weekday`
///
/// On the expiry weekday itself the current date is returned until `cutoff`,
/// the following week's date afterwards.
pub fn next_weekly_expiry(now: NaiveDateTime, weekday: Weekday, cutoff: NaiveTime) -> NaiveDate {
    let today = now.date();

    if today.weekday() == weekday {
        if now.time() < cutoff {
            return today;
        }
        return today + Duration::days(7);
    }

    let days_ahead = (i64::from(weekday.num_days_from_monday())
        - i64::from(today.weekday().num_days_from_monday()))
    .rem_euclid(7);

    today + Duration::days(days_ahead)
}
