use crate::models::{OiTrend, OptionType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Thresholds for signal generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub rsi_period: usize,
    pub rsi_bullish: f64, // CALL needs RSI above this
    pub rsi_bearish: f64, // PUT needs RSI below this
    /// One side's total OI must exceed the other's by this factor to count as a bias
    pub oi_bias_ratio: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_bullish: 60.0,
            rsi_bearish: 40.0,
            oi_bias_ratio: 1.05,
        }
    }
}

/// Market readings fed to the evaluator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalInputs {
    pub spot: f64,
    pub day_open: f64,
    pub vwap: f64,
    pub rsi: f64,
    pub oi_trend: OiTrend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDecision {
    EnterCall,
    EnterPut,
    NoSignal,
}

impl SignalDecision {
    /// Option side to buy, if any
    pub fn option_type(&self) -> Option<OptionType> {
        match self {
            SignalDecision::EnterCall => Some(OptionType::Call),
            SignalDecision::EnterPut => Some(OptionType::Put),
            SignalDecision::NoSignal => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallConditions {
    pub price_above_open: bool,
    pub price_above_vwap: bool,
    pub rsi_bullish: bool,
    pub oi_bullish: bool,
}

impl CallConditions {
    pub fn all(&self) -> bool {
        self.price_above_open && self.price_above_vwap && self.rsi_bullish && self.oi_bullish
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutConditions {
    pub price_below_open: bool,
    pub price_below_vwap: bool,
    pub rsi_bearish: bool,
    pub oi_bearish: bool,
}

impl PutConditions {
    pub fn all(&self) -> bool {
        self.price_below_open && self.price_below_vwap && self.rsi_bearish && self.oi_bearish
    }
}

/// Decision plus every underlying condition, for the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvaluation {
    pub decision: SignalDecision,
    pub call: CallConditions,
    pub put: PutConditions,
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✅"
    } else {
        "❌"
    }
}

impl fmt::Display for SignalEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CALL: {} Open {} VWAP {} RSI {} OI-Bull | PUT: {} Open {} VWAP {} RSI {} OI-Bear",
            mark(self.call.price_above_open),
            mark(self.call.price_above_vwap),
            mark(self.call.rsi_bullish),
            mark(self.call.oi_bullish),
            mark(self.put.price_below_open),
            mark(self.put.price_below_vwap),
            mark(self.put.rsi_bearish),
            mark(self.put.oi_bearish),
        )
    }
}

/// Evaluate entry conditions. All four must hold for a side; CALL is checked first.
pub fn evaluate_signal(inputs: &SignalInputs, config: &SignalConfig) -> SignalEvaluation {
    let call = CallConditions {
        price_above_open: inputs.spot > inputs.day_open,
        price_above_vwap: inputs.spot > inputs.vwap,
        rsi_bullish: inputs.rsi > config.rsi_bullish,
        oi_bullish: inputs.oi_trend == OiTrend::Bullish,
    };

    let put = PutConditions {
        price_below_open: inputs.spot < inputs.day_open,
        price_below_vwap: inputs.spot < inputs.vwap,
        rsi_bearish: inputs.rsi < config.rsi_bearish,
        oi_bearish: inputs.oi_trend == OiTrend::Bearish,
    };

    let decision = if call.all() {
        SignalDecision::EnterCall
    } else if put.all() {
        SignalDecision::EnterPut
    } else {
        SignalDecision::NoSignal
    };

    SignalEvaluation {
        decision,
        call,
        put,
    }
}

/// Momentum zone label for the market snapshot log
pub fn rsi_label(rsi: f64) -> &'static str {
    if rsi > 70.0 {
        "OVERBOUGHT ⚠️"
    } else if rsi > 60.0 {
        "STRONG BULL ✅"
    } else if rsi < 30.0 {
        "OVERSOLD ⚠️"
    } else if rsi < 40.0 {
        "STRONG BEAR ✅"
    } else {
        "NEUTRAL"
    }
}
