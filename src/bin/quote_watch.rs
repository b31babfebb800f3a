//! Quote Watch — keeps fee/price quotes fresh for the configured trades.
//!
//! Actor layout:
//!   QuoteUpdater ──(spawned refetches)──→ QuoteRefetcher → (mpsc) → QuoteStore → (watch) → logger
//!
//! Config: JSON file at `QUOTE_WATCH_CONFIG` (default `quote_watch.json`),
//! tunables via `QUOTE_*` env vars, optional log directory `QUOTE_LOG_DIR`.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use gp_quote_refresh::quote::messages::UpdaterCmd;
use gp_quote_refresh::quote::store::{QuoteState, QuoteStore};
use gp_quote_refresh::quote::updater::{QuoteUpdater, UpdaterConfig};
use gp_quote_refresh::quote_http::{QuoteApiClient, QuoteApiConfig};
use gp_quote_refresh::Config;

fn log_state(state: &QuoteState) {
    for q in state.quotes() {
        match (&q.fee, &q.price) {
            (Some(fee), Some(price)) => info!(
                "💱 {} {} {}→{} amount={} fee={} price={} (fee valid until {})",
                q.params.chain_id, q.params.kind.as_str(), q.params.sell_token, q.params.buy_token,
                q.params.amount, fee.amount, price.amount, fee.expiration_date,
            ),
            (Some(fee), None) => warn!(
                "⚠️ {} {}→{} fee {} exceeds amount {}",
                q.params.chain_id, q.params.sell_token, q.params.buy_token, fee.amount, q.params.amount,
            ),
            _ => {}
        }
    }
    for t in state.unsupported_tokens() {
        warn!("🚫 {} token {} unsupported since {}", t.chain_id, t.address, t.date_added);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match env::var("QUOTE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "quote_watch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        Err(_) => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    let config_path = env::var("QUOTE_WATCH_CONFIG").unwrap_or_else(|_| "quote_watch.json".into());
    let config = Config::load(&config_path)?;
    let chain_id = config.chain()?;
    let trades = config.trade_params()?;

    let api_cfg = QuoteApiConfig::from_env(chain_id)?;
    info!("🚀 Quote Watch | chain={} api={} trades={}", chain_id, api_cfg.base_url, trades.len());
    let fetcher = Arc::new(QuoteApiClient::new(api_cfg).context("Failed to build quote API client")?);

    let (store, store_handle) = QuoteStore::channel(256);
    let mut state_rx = store_handle.subscribe();
    let store_task = tokio::spawn(store.run());

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let updater = QuoteUpdater::new(UpdaterConfig::from_env(), fetcher, store_handle, cmd_rx);
    let updater_task = tokio::spawn(updater.run());

    for trade in trades {
        cmd_tx.send(UpdaterCmd::SetTrade(trade)).await.context("Updater stopped early")?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Ctrl-C received, shutting down");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    warn!("⚠️ Quote store closed");
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                log_state(&state);
            }
        }
    }

    // Closing the command channel stops the updater, which releases the
    // last store handle and stops the store.
    drop(cmd_tx);
    let _ = updater_task.await;
    drop(state_rx);
    let _ = store_task.await;
    info!("👋 Quote Watch stopped");
    Ok(())
}
