// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use api::{Alert, ApiError, MarketDataProvider, Notifier, Severity};
pub use config::BotConfig;
pub use execution::{TickOutcome, TradingSession};
pub use models::*;

// Error handling
pub type Result<T> = anyhow::Result<T>;
