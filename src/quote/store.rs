//! Quote Store Actor.
//!
//! Owns the reconciled quotes and the unsupported-token list, applies
//! `StoreAction`s in arrival order and broadcasts every new state via a
//! `watch` channel. A priced `UpdateQuote` also un-marks its sell and buy
//! tokens, so a mark still queued when the quote was fetched is dropped.

use std::collections::HashMap;

use alloy_primitives::Address;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::messages::StoreAction;
use super::types::{QuoteInformation, SupportedChainId, UnsupportedToken};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("quote store is closed")]
    Closed,
}

// ─────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────

/// Quotes by chain then sell token; unsupported tokens by chain then address.
#[derive(Debug, Clone, Default)]
pub struct QuoteState {
    quotes: HashMap<SupportedChainId, HashMap<Address, QuoteInformation>>,
    unsupported: HashMap<SupportedChainId, HashMap<Address, UnsupportedToken>>,
}

impl QuoteState {
    pub fn apply(&mut self, action: &StoreAction) {
        match action {
            StoreAction::UpdateQuote(quote) => {
                let chain_id = quote.params.chain_id;
                // A priced quote proves both tokens are supported, including
                // marks queued after the refetcher last read the state.
                if quote.price.is_some() {
                    if let Some(tokens) = self.unsupported.get_mut(&chain_id) {
                        tokens.remove(&quote.params.sell_token);
                        tokens.remove(&quote.params.buy_token);
                    }
                }
                self.quotes
                    .entry(chain_id)
                    .or_default()
                    .insert(quote.params.sell_token, quote.clone());
            }
            StoreAction::ClearQuote { chain_id, token } => {
                if let Some(quotes) = self.quotes.get_mut(chain_id) {
                    quotes.remove(token);
                }
            }
            StoreAction::AddUnsupportedToken(token) => {
                self.unsupported
                    .entry(token.chain_id)
                    .or_default()
                    .insert(token.address, token.clone());
            }
            StoreAction::RemoveUnsupportedToken { chain_id, address } => {
                if let Some(tokens) = self.unsupported.get_mut(chain_id) {
                    tokens.remove(address);
                }
            }
        }
    }

    pub fn quote(&self, chain_id: SupportedChainId, sell_token: Address) -> Option<&QuoteInformation> {
        self.quotes.get(&chain_id)?.get(&sell_token)
    }

    pub fn unsupported_token(&self, chain_id: SupportedChainId, address: Address) -> Option<&UnsupportedToken> {
        self.unsupported.get(&chain_id)?.get(&address)
    }

    pub fn quotes(&self) -> impl Iterator<Item = &QuoteInformation> {
        self.quotes.values().flat_map(|by_token| by_token.values())
    }

    pub fn unsupported_tokens(&self) -> impl Iterator<Item = &UnsupportedToken> {
        self.unsupported.values().flat_map(|by_addr| by_addr.values())
    }
}

// ─────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────

pub struct QuoteStore {
    state: QuoteState,
    action_rx: mpsc::Receiver<StoreAction>,
    state_tx: watch::Sender<QuoteState>,
}

impl QuoteStore {
    pub fn new(action_rx: mpsc::Receiver<StoreAction>, state_tx: watch::Sender<QuoteState>) -> Self {
        Self {
            state: QuoteState::default(),
            action_rx,
            state_tx,
        }
    }

    /// Create a store together with a handle to it. The store must be
    /// `run()` for actions sent through the handle to take effect.
    pub fn channel(capacity: usize) -> (Self, StoreHandle) {
        let (action_tx, action_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(QuoteState::default());
        (Self::new(action_rx, state_tx), StoreHandle::new(action_tx, state_rx))
    }

    /// Actor main loop. Runs until every handle is dropped.
    pub async fn run(mut self) {
        info!("🗂️ QuoteStore started");

        while let Some(action) = self.action_rx.recv().await {
            debug!(?action, "store action");
            self.state.apply(&action);
            // Stored even while nobody is subscribed.
            self.state_tx.send_replace(self.state.clone());
        }

        info!("🗂️ QuoteStore shutting down (channel closed)");
    }
}

/// Cloneable access to a running `QuoteStore`.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    action_tx: mpsc::Sender<StoreAction>,
    state_rx: watch::Receiver<QuoteState>,
}

impl StoreHandle {
    pub fn new(action_tx: mpsc::Sender<StoreAction>, state_rx: watch::Receiver<QuoteState>) -> Self {
        Self { action_tx, state_rx }
    }

    async fn dispatch(&self, action: StoreAction) -> Result<(), StoreError> {
        self.action_tx.send(action).await.map_err(|_| StoreError::Closed)
    }

    pub async fn update_quote(&self, quote: QuoteInformation) -> Result<(), StoreError> {
        self.dispatch(StoreAction::UpdateQuote(quote)).await
    }

    pub async fn clear_quote(&self, chain_id: SupportedChainId, token: Address) -> Result<(), StoreError> {
        self.dispatch(StoreAction::ClearQuote { chain_id, token }).await
    }

    pub async fn add_unsupported_token(&self, token: UnsupportedToken) -> Result<(), StoreError> {
        self.dispatch(StoreAction::AddUnsupportedToken(token)).await
    }

    pub async fn remove_unsupported_token(
        &self,
        chain_id: SupportedChainId,
        address: Address,
    ) -> Result<(), StoreError> {
        self.dispatch(StoreAction::RemoveUnsupportedToken { chain_id, address }).await
    }

    /// Latest broadcast quote for `(chain, sell token)`.
    pub fn quote(&self, chain_id: SupportedChainId, sell_token: Address) -> Option<QuoteInformation> {
        self.state_rx.borrow().quote(chain_id, sell_token).cloned()
    }

    pub fn unsupported_token(&self, chain_id: SupportedChainId, address: Address) -> Option<UnsupportedToken> {
        self.state_rx.borrow().unsupported_token(chain_id, address).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuoteState> {
        self.state_rx.clone()
    }
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::types::{FeeQuoteParams, OrderKind, PriceInformation};
    use alloy_primitives::U256;
    use chrono::Utc;
    use std::time::Duration;

    const SELL: Address = Address::repeat_byte(0x11);
    const BUY: Address = Address::repeat_byte(0x22);

    fn quote(chain_id: SupportedChainId, amount: u64) -> QuoteInformation {
        QuoteInformation {
            params: FeeQuoteParams {
                chain_id,
                sell_token: SELL,
                buy_token: BUY,
                amount: U256::from(amount),
                kind: OrderKind::Sell,
            },
            fee: None,
            price: None,
            last_check: Utc::now(),
        }
    }

    fn unsupported(address: Address) -> UnsupportedToken {
        UnsupportedToken {
            chain_id: SupportedChainId::Mainnet,
            address,
            date_added: Utc::now(),
        }
    }

    #[test]
    fn test_update_replaces_quote_per_sell_token() {
        let mut s = QuoteState::default();
        s.apply(&StoreAction::UpdateQuote(quote(SupportedChainId::Mainnet, 1)));
        s.apply(&StoreAction::UpdateQuote(quote(SupportedChainId::Mainnet, 2)));
        s.apply(&StoreAction::UpdateQuote(quote(SupportedChainId::Xdai, 3)));

        assert_eq!(s.quotes().count(), 2);
        let q = s.quote(SupportedChainId::Mainnet, SELL).unwrap();
        assert_eq!(q.params.amount, U256::from(2u64));
    }

    #[test]
    fn test_clear_only_touches_its_chain() {
        let mut s = QuoteState::default();
        s.apply(&StoreAction::UpdateQuote(quote(SupportedChainId::Mainnet, 1)));
        s.apply(&StoreAction::UpdateQuote(quote(SupportedChainId::Xdai, 1)));
        s.apply(&StoreAction::ClearQuote { chain_id: SupportedChainId::Mainnet, token: SELL });

        assert!(s.quote(SupportedChainId::Mainnet, SELL).is_none());
        assert!(s.quote(SupportedChainId::Xdai, SELL).is_some());
    }

    #[test]
    fn test_unsupported_add_remove() {
        let mut s = QuoteState::default();
        s.apply(&StoreAction::AddUnsupportedToken(unsupported(BUY)));
        assert!(s.unsupported_token(SupportedChainId::Mainnet, BUY).is_some());
        assert!(s.unsupported_token(SupportedChainId::Xdai, BUY).is_none());

        s.apply(&StoreAction::RemoveUnsupportedToken { chain_id: SupportedChainId::Mainnet, address: BUY });
        assert!(s.unsupported_token(SupportedChainId::Mainnet, BUY).is_none());
        assert_eq!(s.unsupported_tokens().count(), 0);
    }

    #[test]
    fn test_priced_update_unmarks_its_tokens() {
        let mut s = QuoteState::default();
        let other = Address::repeat_byte(0x33);
        s.apply(&StoreAction::AddUnsupportedToken(unsupported(BUY)));
        s.apply(&StoreAction::AddUnsupportedToken(unsupported(other)));

        // Fee only: support is not proven yet.
        s.apply(&StoreAction::UpdateQuote(quote(SupportedChainId::Mainnet, 1)));
        assert!(s.unsupported_token(SupportedChainId::Mainnet, BUY).is_some());

        let mut priced = quote(SupportedChainId::Mainnet, 2);
        priced.price = Some(PriceInformation { token: BUY, amount: U256::from(5u64) });
        s.apply(&StoreAction::UpdateQuote(priced));
        assert!(s.unsupported_token(SupportedChainId::Mainnet, BUY).is_none());
        assert!(s.unsupported_token(SupportedChainId::Mainnet, other).is_some());
    }

    #[test]
    fn test_clear_missing_is_noop() {
        let mut s = QuoteState::default();
        s.apply(&StoreAction::ClearQuote { chain_id: SupportedChainId::Rinkeby, token: SELL });
        s.apply(&StoreAction::RemoveUnsupportedToken { chain_id: SupportedChainId::Rinkeby, address: SELL });
        assert_eq!(s.quotes().count(), 0);
    }

    #[tokio::test]
    async fn test_actor_broadcasts_state() {
        let (store, handle) = QuoteStore::channel(16);
        let mut rx = handle.subscribe();
        let h = tokio::spawn(store.run());

        handle.update_quote(quote(SupportedChainId::Mainnet, 7)).await.unwrap();
        tokio::time::timeout(Duration::from_millis(100), rx.changed()).await.unwrap().unwrap();
        assert_eq!(
            handle.quote(SupportedChainId::Mainnet, SELL).map(|q| q.params.amount),
            Some(U256::from(7u64))
        );

        handle.add_unsupported_token(unsupported(BUY)).await.unwrap();
        tokio::time::timeout(Duration::from_millis(100), rx.changed()).await.unwrap().unwrap();
        assert!(handle.unsupported_token(SupportedChainId::Mainnet, BUY).is_some());

        drop(handle);
        drop(rx);
        let _ = tokio::time::timeout(Duration::from_millis(100), h).await;
    }

    #[tokio::test]
    async fn test_queued_mark_dropped_by_later_priced_update() {
        let (store, handle) = QuoteStore::channel(16);
        let mut rx = handle.subscribe();

        // Both queued before the store applies anything.
        handle.add_unsupported_token(unsupported(BUY)).await.unwrap();
        let mut priced = quote(SupportedChainId::Mainnet, 3);
        priced.price = Some(PriceInformation { token: BUY, amount: U256::from(5u64) });
        handle.update_quote(priced).await.unwrap();
        let h = tokio::spawn(store.run());

        tokio::time::timeout(Duration::from_millis(100), async {
            while handle.quote(SupportedChainId::Mainnet, SELL).is_none() {
                let _ = rx.changed().await;
            }
        })
        .await
        .unwrap();
        assert!(handle.unsupported_token(SupportedChainId::Mainnet, BUY).is_none());

        drop(handle);
        drop(rx);
        let _ = tokio::time::timeout(Duration::from_millis(100), h).await;
    }

    #[tokio::test]
    async fn test_dispatch_after_close_fails() {
        let (store, handle) = QuoteStore::channel(1);
        drop(store);
        let err = handle.clear_quote(SupportedChainId::Mainnet, SELL).await;
        assert!(matches!(err, Err(StoreError::Closed)));
    }
}
