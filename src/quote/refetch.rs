//! Quote refetch: fee + price from the pricing service, coalesced so that only
//! the newest request per refetcher reaches the store.
//!
//! Reconciliation:
//! - fresh success: update the quote, un-mark tokens that were unsupported
//! - `UnsupportedToken`: mark the token unsupported
//! - fee exceeds the sell amount: keep the fee, no price
//! - any other error: log and clear the quote
//! - superseded call: nothing

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::error::{QuoteError, QuoteErrorKind};
use super::store::StoreHandle;
use super::types::{
    amount_after_fee, canonical_market, FeeInformation, FeeQuoteParams, OrderKind, PriceInformation,
    PriceQuoteParams, QuoteInformation, UnsupportedToken,
};
use crate::coalescer::{Coalesced, LatestCallWins};
use crate::quote_http::QuoteFetcher;

#[derive(Debug, Clone)]
pub struct RefetchQuoteParams {
    pub quote_params: FeeQuoteParams,
    /// Force a new fee quote even if `previous_fee` is still valid.
    pub fetch_fee: bool,
    pub previous_fee: Option<FeeInformation>,
    /// Periodic price refresh, as opposed to a new or changed trade.
    pub is_price_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteResult {
    pub fee: FeeInformation,
    pub price: PriceInformation,
}

/// What a refetch did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefetchOutcome {
    Updated(QuoteInformation),
    /// Superseded by a newer refetch; nothing dispatched.
    Cancelled,
    /// Stored with the fee and without a price.
    FeeExceedsAmount(QuoteInformation),
    UnsupportedToken(Address),
    Cleared(QuoteErrorKind),
}

/// Fetch the fee (or reuse a still valid one), then the price for the
/// amount left after the fee.
pub async fn get_quote(
    fetcher: &dyn QuoteFetcher,
    params: &RefetchQuoteParams,
    fee_renewal_margin: Duration,
) -> Result<QuoteResult, QuoteError> {
    let qp = &params.quote_params;

    let reusable_fee = params
        .previous_fee
        .as_ref()
        .filter(|fee| !params.fetch_fee && !fee.is_expiring(Utc::now(), fee_renewal_margin));
    let fee = match reusable_fee {
        Some(fee) => fee.clone(),
        None => fetcher.get_fee_quote(qp).await?,
    };

    let amount = match qp.kind {
        OrderKind::Sell => amount_after_fee(qp.amount, fee.amount).ok_or_else(|| {
            QuoteError::FeeExceedsAmount {
                fee: fee.clone(),
                amount: qp.amount,
            }
        })?,
        OrderKind::Buy => qp.amount,
    };

    let (base_token, quote_token) = canonical_market(qp.sell_token, qp.buy_token, qp.kind);
    let price = fetcher
        .get_price_quote(&PriceQuoteParams {
            chain_id: qp.chain_id,
            base_token,
            quote_token,
            amount,
            kind: qp.kind,
        })
        .await?;

    // Happens on pairs with a huge price difference.
    if price.amount.is_zero() {
        return Err(QuoteError::ZeroPrice);
    }

    Ok(QuoteResult { fee, price })
}

pub struct QuoteRefetcher {
    fetcher: Arc<dyn QuoteFetcher>,
    store: StoreHandle,
    calls: LatestCallWins,
    fee_renewal_margin: Duration,
}

impl QuoteRefetcher {
    pub fn new(fetcher: Arc<dyn QuoteFetcher>, store: StoreHandle, fee_renewal_margin: Duration) -> Self {
        Self {
            fetcher,
            store,
            calls: LatestCallWins::new(),
            fee_renewal_margin,
        }
    }

    /// Drop the result of every refetch still in flight on this refetcher.
    pub fn cancel(&self) {
        self.calls.supersede();
    }

    /// Refetch and reconcile. The call is ordered against other calls on this
    /// refetcher when `refetch_quote` is invoked, not when the future is polled.
    pub fn refetch_quote(&self, params: RefetchQuoteParams) -> impl Future<Output = RefetchOutcome> + Send + 'static {
        let call = self.calls.begin();
        let fetcher = Arc::clone(&self.fetcher);
        let store = self.store.clone();
        let margin = self.fee_renewal_margin;

        async move {
            let outcome = call
                .settle(async { get_quote(fetcher.as_ref(), &params, margin).await })
                .await;

            match outcome {
                Ok(Coalesced::Cancelled) => {
                    debug!(
                        sell = %params.quote_params.sell_token,
                        buy = %params.quote_params.buy_token,
                        "refetch superseded, result dropped"
                    );
                    RefetchOutcome::Cancelled
                }
                Ok(Coalesced::Fresh(result)) => apply_quote(&store, &params, result).await,
                Err(err) => handle_quote_error(&store, &params, err).await,
            }
        }
    }
}

async fn apply_quote(store: &StoreHandle, params: &RefetchQuoteParams, result: QuoteResult) -> RefetchOutcome {
    let qp = &params.quote_params;
    let quote = QuoteInformation {
        params: qp.clone(),
        fee: Some(result.fee),
        price: Some(result.price),
        last_check: Utc::now(),
    };
    debug!(
        chain = %qp.chain_id,
        sell = %qp.sell_token,
        price_refresh = params.is_price_refresh,
        "quote updated"
    );
    if let Err(e) = store.update_quote(quote.clone()).await {
        warn!("⚠️ update_quote dropped: {}", e);
    }

    // The snapshot can lag queued actions; the store's own un-mark on a
    // priced update covers marks this check misses.
    for token in [qp.sell_token, qp.buy_token] {
        if store.unsupported_token(qp.chain_id, token).is_some() {
            info!(chain = %qp.chain_id, %token, "token is supported again");
            if let Err(e) = store.remove_unsupported_token(qp.chain_id, token).await {
                warn!("⚠️ remove_unsupported_token dropped: {}", e);
            }
        }
    }

    RefetchOutcome::Updated(quote)
}

async fn handle_quote_error(store: &StoreHandle, params: &RefetchQuoteParams, err: QuoteError) -> RefetchOutcome {
    let qp = &params.quote_params;
    let kind = err.kind();

    match (kind, err) {
        (_, QuoteError::FeeExceedsAmount { fee, amount }) => {
            info!(chain = %qp.chain_id, sell = %qp.sell_token, fee = %fee.amount, %amount, "fee exceeds sell amount");
            let quote = QuoteInformation {
                params: qp.clone(),
                fee: Some(fee),
                price: None,
                last_check: Utc::now(),
            };
            if let Err(e) = store.update_quote(quote.clone()).await {
                warn!("⚠️ update_quote dropped: {}", e);
            }
            RefetchOutcome::FeeExceedsAmount(quote)
        }
        (QuoteErrorKind::UnsupportedToken, err) => {
            let address = err.unsupported_token().unwrap_or(qp.sell_token);
            warn!(chain = %qp.chain_id, token = %address, "{} - disabling", err);
            let token = UnsupportedToken {
                chain_id: qp.chain_id,
                address,
                date_added: Utc::now(),
            };
            if let Err(e) = store.add_unsupported_token(token).await {
                warn!("⚠️ add_unsupported_token dropped: {}", e);
            }
            RefetchOutcome::UnsupportedToken(address)
        }
        (kind, err) => {
            match kind {
                QuoteErrorKind::UnknownError => {
                    error!(chain = %qp.chain_id, sell = %qp.sell_token, "unknown reason fetching a quote: {}", err)
                }
                _ => warn!(chain = %qp.chain_id, sell = %qp.sell_token, "quote service error: {}", err),
            }
            if let Err(e) = store.clear_quote(qp.chain_id, qp.sell_token).await {
                warn!("⚠️ clear_quote dropped: {}", e);
            }
            RefetchOutcome::Cleared(kind)
        }
    }
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────
