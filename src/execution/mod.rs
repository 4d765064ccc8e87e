// Position lifecycle and the per-tick trading session
pub mod position_manager;
pub mod session;

pub use position_manager::{
    ExitReason, ExitReport, Position, PositionAction, PositionError, PositionManager,
    PositionState, PositionUpdate, RiskParams,
};
pub use session::{exit_alert, SessionSettings, TickOutcome, TradingSession};
