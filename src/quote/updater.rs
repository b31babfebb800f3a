//! Quote Updater Actor — keeps watched trades' quotes fresh.
//!
//! Every check interval each watched trade is planned:
//! - no quote, or a quote for other params → refetch with a new fee
//! - fee about to expire → refetch with a new fee
//! - price older than the refresh interval → refetch reusing the fee
//!
//! Each trade owns one `QuoteRefetcher`, so changing a trade while its
//! previous request is in flight drops the previous result. Removing a trade
//! cancels its in-flight refetch and clears its quote. Refetches run on a
//! `JoinSet` and never block the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::messages::UpdaterCmd;
use super::refetch::{QuoteRefetcher, RefetchOutcome, RefetchQuoteParams};
use super::store::StoreHandle;
use super::types::{FeeQuoteParams, QuoteInformation, SupportedChainId, UnsupportedToken};
use crate::quote_http::QuoteFetcher;

// ─────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// How often watched trades are checked.
    pub check_interval: Duration,
    /// Renew the fee when it expires within this margin.
    pub fee_renewal_margin: Duration,
    /// Refresh the price once the quote is this old.
    pub price_refresh_interval: Duration,
    /// Minimum time between two requests for the same trade.
    pub equal_request_gap: Duration,
    /// Retry trades with an unsupported token after this long.
    pub unsupported_retry: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            fee_renewal_margin: Duration::from_secs(30),
            price_refresh_interval: Duration::from_secs(30),
            equal_request_gap: Duration::from_secs(5),
            unsupported_retry: Duration::from_secs(300),
        }
    }
}

impl UpdaterConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("QUOTE_CHECK_INTERVAL_MS")      { if let Ok(ms) = v.parse() { c.check_interval = Duration::from_millis(ms); } }
        if let Ok(v) = std::env::var("QUOTE_FEE_RENEWAL_MARGIN_MS")  { if let Ok(ms) = v.parse() { c.fee_renewal_margin = Duration::from_millis(ms); } }
        if let Ok(v) = std::env::var("QUOTE_PRICE_REFRESH_MS")       { if let Ok(ms) = v.parse() { c.price_refresh_interval = Duration::from_millis(ms); } }
        if let Ok(v) = std::env::var("QUOTE_EQUAL_REQUEST_GAP_MS")   { if let Ok(ms) = v.parse() { c.equal_request_gap = Duration::from_millis(ms); } }
        if let Ok(v) = std::env::var("QUOTE_UNSUPPORTED_RETRY_MS")   { if let Ok(ms) = v.parse() { c.unsupported_retry = Duration::from_millis(ms); } }
        c
    }
}

// ─────────────────────────────────────────────────────────
// Planning
// ─────────────────────────────────────────────────────────

/// Decide whether `params` needs a refetch given its current quote.
pub fn plan_refetch(
    cfg: &UpdaterConfig,
    params: &FeeQuoteParams,
    quote: Option<&QuoteInformation>,
    unsupported: impl Fn(Address) -> Option<UnsupportedToken>,
    now: DateTime<Utc>,
) -> Option<RefetchQuoteParams> {
    let retry = chrono::Duration::from_std(cfg.unsupported_retry).unwrap_or(chrono::Duration::zero());
    let blocked = [params.sell_token, params.buy_token]
        .into_iter()
        .filter_map(&unsupported)
        .any(|t| t.date_added + retry > now);
    if blocked {
        return None;
    }

    let refetch = |fetch_fee: bool, is_price_refresh: bool| RefetchQuoteParams {
        quote_params: params.clone(),
        fetch_fee,
        previous_fee: quote.and_then(|q| q.fee.clone()),
        is_price_refresh,
    };

    let Some(quote) = quote.filter(|q| q.params == *params) else {
        return Some(RefetchQuoteParams {
            previous_fee: None,
            ..refetch(true, false)
        });
    };

    let fee_expiring = quote
        .fee
        .as_ref()
        .map_or(true, |fee| fee.is_expiring(now, cfg.fee_renewal_margin));
    if fee_expiring {
        return Some(refetch(true, false));
    }

    let age = (now - quote.last_check).to_std().unwrap_or(Duration::ZERO);
    if age >= cfg.price_refresh_interval {
        return Some(refetch(false, true));
    }

    None
}

// ─────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────

type TradeKey = (SupportedChainId, Address);

struct Trade {
    params: FeeQuoteParams,
    refetcher: QuoteRefetcher,
    last_request: Option<Instant>,
}

#[derive(Debug, Default)]
struct Stats {
    ticks: u64,
    requested: u64,
    updated: u64,
    cancelled: u64,
    fee_exceeds: u64,
    unsupported: u64,
    cleared: u64,
    skipped_gap: u64,
    task_failed: u64,
}

// ─────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────

pub struct QuoteUpdater {
    cfg: UpdaterConfig,
    fetcher: Arc<dyn QuoteFetcher>,
    store: StoreHandle,
    trades: HashMap<TradeKey, Trade>,
    in_flight: JoinSet<RefetchOutcome>,
    stats: Stats,
    cmd_rx: mpsc::Receiver<UpdaterCmd>,
}

impl QuoteUpdater {
    pub fn new(
        cfg: UpdaterConfig,
        fetcher: Arc<dyn QuoteFetcher>,
        store: StoreHandle,
        cmd_rx: mpsc::Receiver<UpdaterCmd>,
    ) -> Self {
        Self {
            cfg,
            fetcher,
            store,
            trades: HashMap::new(),
            in_flight: JoinSet::new(),
            stats: Stats::default(),
            cmd_rx,
        }
    }

    /// Actor main loop. Runs until the command channel is closed, then waits
    /// for in-flight refetches.
    pub async fn run(mut self) {
        info!(
            "🔄 QuoteUpdater check={:?} fee_margin={:?} price_refresh={:?} gap={:?} unsupported_retry={:?}",
            self.cfg.check_interval, self.cfg.fee_renewal_margin, self.cfg.price_refresh_interval,
            self.cfg.equal_request_gap, self.cfg.unsupported_retry,
        );

        let mut ticker = tokio::time::interval(self.cfg.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_cmd(cmd).await,
                        None => break, // Channel closed
                    }
                }
                _ = ticker.tick() => {
                    self.stats.ticks += 1;
                    self.tick();
                }
                Some(res) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.record(res);
                }
            }
        }

        while let Some(res) = self.in_flight.join_next().await {
            self.record(res);
        }

        let s = &self.stats;
        info!(
            "🔄 Shutdown | ticks={} requested={} updated={} cancelled={} fee_exceeds={} unsupported={} cleared={} skip(gap={}) failed={}",
            s.ticks, s.requested, s.updated, s.cancelled, s.fee_exceeds, s.unsupported, s.cleared,
            s.skipped_gap, s.task_failed,
        );
    }

    async fn handle_cmd(&mut self, cmd: UpdaterCmd) {
        match cmd {
            UpdaterCmd::SetTrade(params) => {
                let key = (params.chain_id, params.sell_token);
                let now = Instant::now();
                let trade = self.trades.entry(key).or_insert_with(|| Trade {
                    params: params.clone(),
                    refetcher: QuoteRefetcher::new(
                        Arc::clone(&self.fetcher),
                        self.store.clone(),
                        self.cfg.fee_renewal_margin,
                    ),
                    last_request: None,
                });

                let unchanged = trade.params == params;
                let recent = trade
                    .last_request
                    .is_some_and(|at| now.duration_since(at) < self.cfg.equal_request_gap);
                if unchanged && recent {
                    self.stats.skipped_gap += 1;
                    debug!(sell = %params.sell_token, "same trade requested again, skipping");
                    return;
                }
                trade.params = params;

                let quote = self.store.quote(key.0, key.1);
                let plan = plan_refetch(
                    &self.cfg,
                    &trade.params,
                    quote.as_ref(),
                    |addr| self.store.unsupported_token(key.0, addr),
                    Utc::now(),
                );
                if let Some(req) = plan {
                    info!(chain = %key.0, sell = %key.1, buy = %trade.params.buy_token, amount = %trade.params.amount, "trade set, refetching");
                    Self::launch(&mut self.in_flight, &mut self.stats, trade, req, now);
                }
            }
            UpdaterCmd::RemoveTrade { chain_id, sell_token } => {
                let Some(trade) = self.trades.remove(&(chain_id, sell_token)) else {
                    return;
                };
                // A re-added trade gets a new refetcher; results of the old
                // one must never reach the store.
                trade.refetcher.cancel();
                if let Err(e) = self.store.clear_quote(chain_id, sell_token).await {
                    warn!("⚠️ clear_quote dropped: {}", e);
                }
                info!(chain = %chain_id, sell = %sell_token, "trade removed");
            }
        }
    }

    fn tick(&mut self) {
        let now = Utc::now();
        let instant = Instant::now();

        for (key, trade) in self.trades.iter_mut() {
            let recent = trade
                .last_request
                .is_some_and(|at| instant.duration_since(at) < self.cfg.equal_request_gap);
            if recent {
                self.stats.skipped_gap += 1;
                continue;
            }

            let quote = self.store.quote(key.0, key.1);
            let store = &self.store;
            let plan = plan_refetch(
                &self.cfg,
                &trade.params,
                quote.as_ref(),
                |addr| store.unsupported_token(key.0, addr),
                now,
            );
            if let Some(req) = plan {
                Self::launch(&mut self.in_flight, &mut self.stats, trade, req, instant);
            }
        }
    }

    fn launch(
        in_flight: &mut JoinSet<RefetchOutcome>,
        stats: &mut Stats,
        trade: &mut Trade,
        req: RefetchQuoteParams,
        now: Instant,
    ) {
        debug!(
            sell = %req.quote_params.sell_token,
            fetch_fee = req.fetch_fee,
            price_refresh = req.is_price_refresh,
            "refetch launched"
        );
        trade.last_request = Some(now);
        stats.requested += 1;
        in_flight.spawn(trade.refetcher.refetch_quote(req));
    }

    fn record(&mut self, res: Result<RefetchOutcome, JoinError>) {
        match res {
            Ok(RefetchOutcome::Updated(_)) => self.stats.updated += 1,
            Ok(RefetchOutcome::Cancelled) => self.stats.cancelled += 1,
            Ok(RefetchOutcome::FeeExceedsAmount(_)) => self.stats.fee_exceeds += 1,
            Ok(RefetchOutcome::UnsupportedToken(_)) => self.stats.unsupported += 1,
            Ok(RefetchOutcome::Cleared(_)) => self.stats.cleared += 1,
            Err(e) => {
                self.stats.task_failed += 1;
                warn!("⚠️ refetch task failed: {}", e);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────
