// Trading strategy module
// Day's open + VWAP + RSI + open interest confirmation
pub mod open_interest;
pub mod signals;

pub use open_interest::{classify_open_interest, OiSummary};
pub use signals::{
    evaluate_signal, rsi_label, CallConditions, PutConditions, SignalConfig, SignalDecision,
    SignalEvaluation, SignalInputs,
};
