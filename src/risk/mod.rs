// Entry gating: market hours and post-signal cooldown
pub mod session_clock;

pub use session_clock::{next_weekly_expiry, EntryBlock, MarketPhase, SessionClock};
