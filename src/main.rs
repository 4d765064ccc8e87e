use anyhow::Context;
use chrono::Utc;
use chrono_tz::Tz;
use clap::Parser;
use niftybot::api::{DiscordNotifier, UpstoxClient};
use niftybot::config::BotConfig;
use niftybot::execution::{SessionSettings, TickOutcome, TradingSession};
use niftybot::persistence::CsvTradeJournal;
use niftybot::Result;
use std::path::PathBuf;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(name = "niftybot", version, about = "Nifty 50 weekly options signal bot")]
struct Cli {
    /// Optional TOML config file
    #[arg(long, default_value = "niftybot.toml")]
    config: PathBuf,

    /// Trade journal CSV (overrides trade_log from config)
    #[arg(long)]
    trade_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("❌ CRITICAL ERROR: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BotConfig::load(Some(cli.config.as_path())).context("Invalid configuration")?;
    if let Some(path) = cli.trade_log {
        config.trade_log = path;
    }

    let tz = config.tz()?;
    let settings = SessionSettings::from_config(&config)?;

    let market = UpstoxClient::new(
        config.access_token()?,
        config.upstox.base_url.clone(),
        config.upstox.requests_per_minute,
        Duration::from_secs(config.upstox.timeout_secs),
    )?;
    let notifier = DiscordNotifier::new(config.discord.webhook_url.clone(), config.risk.lot_size)?;
    let journal = CsvTradeJournal::open(&config.trade_log)?;

    print_startup_banner(&config);

    let mut session = TradingSession::new(settings, market, notifier, journal);
    session
        .initialize(local_now(tz))
        .await
        .context("Option chain unavailable at start-up")?;

    let mut ticker = interval(Duration::from_secs(config.poll_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("⏹  BOT STOPPED BY USER");
                break;
            }
            _ = ticker.tick() => {}
        }

        // Runs outside select! so a tick always completes before shutdown
        let outcome = session.tick(local_now(tz)).await;
        log_outcome(&outcome);
    }

    tracing::info!("All signals saved to: {}", config.trade_log.display());
    tracing::info!("👋 Nifty bot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("niftybot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn local_now(tz: Tz) -> chrono::NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

fn print_startup_banner(config: &BotConfig) {
    tracing::info!("🚀 Nifty options bot starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Underlying: {}", config.underlying);
    tracing::info!("  Market hours: {} - {} ({})", config.market_open, config.market_close, config.timezone);
    tracing::info!("  Lot size: {}", config.risk.lot_size);
    tracing::info!(
        "  Take profit: ₹{:.0} | Stop loss: ₹{:.0} | Trailing: ₹{:.0}",
        config.risk.take_profit,
        config.risk.stop_loss,
        config.risk.trailing_stop
    );
    tracing::info!(
        "  RSI: {} > {} / < {} | OI bias: {}x",
        config.signal.rsi_period,
        config.signal.rsi_bullish,
        config.signal.rsi_bearish,
        config.signal.oi_bias_ratio
    );
    tracing::info!("  Cooldown: {}s | Poll: {}s", config.cooldown_secs, config.poll_interval_secs);
    tracing::info!("  Trade log: {}", config.trade_log.display());
    tracing::info!("\nPress Ctrl+C to stop...\n");
}

fn log_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Entered { decision, strike, premium, .. } => {
            tracing::info!("✅ Entered {:?} {} @ ₹{:.2}", decision, strike, premium)
        }
        TickOutcome::Exited(report) => tracing::info!("✅ Exited: {}", report.headline()),
        TickOutcome::MarketClosed { exit: Some(report) } => {
            tracing::info!("✅ Squared off: {}", report.headline())
        }
        TickOutcome::ExitDeferred { reason, error } => {
            tracing::error!("{} exit deferred: {}", reason, error)
        }
        TickOutcome::DataUnavailable(reason) => tracing::warn!("Tick skipped: {}", reason),
        other => tracing::debug!("Tick outcome: {:?}", other),
    }
}
