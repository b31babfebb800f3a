//! Channel message types for the quote actors.

use alloy_primitives::Address;

use super::types::{FeeQuoteParams, QuoteInformation, SupportedChainId, UnsupportedToken};

// ─────────────────────────────────────────────────────────
// Store Actions (Refetcher → QuoteStore)
// ─────────────────────────────────────────────────────────

/// State changes applied by the `QuoteStore`.
#[derive(Debug, Clone)]
pub enum StoreAction {
    /// Replace the quote for `(chain, sell token)`.
    UpdateQuote(QuoteInformation),
    /// Drop the quote for `(chain, sell token)`.
    ClearQuote {
        chain_id: SupportedChainId,
        token: Address,
    },
    AddUnsupportedToken(UnsupportedToken),
    RemoveUnsupportedToken {
        chain_id: SupportedChainId,
        address: Address,
    },
}

// ─────────────────────────────────────────────────────────
// Updater Commands (caller → QuoteUpdater)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum UpdaterCmd {
    /// Start watching a trade, or replace the watched trade for the same
    /// `(chain, sell token)`. Triggers an immediate refetch.
    SetTrade(FeeQuoteParams),
    /// Stop watching the trade selling `sell_token`.
    RemoveTrade {
        chain_id: SupportedChainId,
        sell_token: Address,
    },
}
