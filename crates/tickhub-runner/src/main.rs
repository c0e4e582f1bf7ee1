//! # tickhub-runner
//!
//! Main entry point for the price hub.
//!
//! Loads a JSON configuration file, opens the hub connection, registers one
//! subscriber per configured watchlist, and periodically values the
//! configured holdings against live prices.
//!
//! # Usage
//!
//! ```bash
//! tickhub-runner config/tickhub.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tickhub_core::{ConnectionStatus, PricePoint, StatusEvent, Symbol};
use tickhub_stream::{PortfolioValuation, PriceHub, SubscriberId};
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Live price hub runner.
#[derive(Parser)]
#[command(name = "tickhub-runner", about = "Live price hub runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides the config's log_path.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (logging needs the module name)
    let config = tickhub_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    tickhub_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name());

    info!(
        "tickhub-runner starting — config={}, endpoint={}, {} watchlist(s), {} holding(s)",
        cli.config.display(),
        config.hub.endpoint_url,
        config.watchlists.len(),
        config.holdings.len(),
    );

    // 3. Build the hub and watch its connection
    let hub = PriceHub::new(config.hub.clone())?;
    let gave_up = Arc::new(Notify::new());
    {
        let gave_up = gave_up.clone();
        hub.on_status_change(move |ev: &StatusEvent| match (&ev.status, &ev.error) {
            (ConnectionStatus::Connected, _) => info!("connection up"),
            (status, Some(e)) => {
                error!("connection {status}: {e}");
                if ev.is_terminal() {
                    gave_up.notify_one();
                }
            }
            (status, None) => info!("connection {status}"),
        });
    }
    hub.init()?;

    // 4. One subscriber per watchlist
    let mut subscribers: Vec<SubscriberId> = Vec::new();
    for list in &config.watchlists {
        let id = hub.next_subscriber_id();
        let name = list.name.clone();
        hub.subscribe(id, &list.symbols, move |symbol: &Symbol, point: &PricePoint| {
            info!("[{name}] {symbol} ${:.2} ({:+.2}%)", point.price, point.percent_change_24h);
        });
        info!("watchlist '{}' registered as {id}", list.name);
        subscribers.push(id);
    }

    // Holdings need live prices even when no watchlist covers them.
    if !config.holdings.is_empty() {
        let id = hub.next_subscriber_id();
        hub.subscribe(id, config.holdings.iter().map(|h| h.symbol.as_str()), |_: &Symbol, _: &PricePoint| {});
        subscribers.push(id);
    }

    info!("active symbols: {:?} — press Ctrl+C to stop", hub.active_symbols());

    // 5. Report until shutdown
    let mut report = tokio::time::interval(config.report_interval());
    report.tick().await;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("shutdown signal received");
                break;
            }
            _ = gave_up.notified() => {
                warn!("reconnect attempts exhausted, stopping");
                break;
            }
            _ = report.tick() => {
                if !config.holdings.is_empty() {
                    log_valuation(&hub.value_portfolio(&config.holdings));
                }
            }
        }
    }

    // 6. Deregister and tear down
    for id in subscribers {
        hub.deregister_subscriber(id);
    }
    hub.teardown().await;

    info!("hub stopped — goodbye");
    Ok(())
}

fn log_valuation(v: &PortfolioValuation) {
    for p in &v.positions {
        match p.current_price {
            Some(price) => info!(
                "  {} qty={} avg={:.2} now={:.2} value={:.2} pnl={:+.2} {}",
                p.symbol,
                p.quantity,
                p.average_buy_price,
                price,
                p.current_value,
                p.profit_loss,
                if p.is_profit() { "▲" } else { "▼" },
            ),
            None => info!("  {} qty={} (no price yet)", p.symbol, p.quantity),
        }
    }
    info!(
        "portfolio: invested={:.2} value={:.2} pnl={:+.2} missing={}",
        v.invested,
        v.current_value,
        v.profit_loss,
        v.missing.len(),
    );
}
