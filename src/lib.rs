pub mod coalescer;
pub mod quote;
pub mod quote_http;

use std::collections::HashMap;
use std::path::Path;

use alloy_primitives::{Address, U256};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::quote::types::{FeeQuoteParams, OrderKind, SupportedChainId};

// --- Configuration Structs ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chain_id: u64,
    pub tokens: Vec<TokenConfig>,
    pub trades: Vec<TradeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub name: String,
    pub address: String,
}

/// Trade to keep a quote for. `sell` / `buy` name entries of `tokens`,
/// `amount` is in token atoms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    pub sell: String,
    pub buy: String,
    pub amount: String,
    pub kind: OrderKind,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn chain(&self) -> anyhow::Result<SupportedChainId> {
        SupportedChainId::try_from(self.chain_id).map_err(|id| anyhow!("Unsupported chain id: {}", id))
    }

    /// Resolve every configured trade into quote params.
    pub fn trade_params(&self) -> anyhow::Result<Vec<FeeQuoteParams>> {
        let chain_id = self.chain()?;
        let mut tokens = HashMap::new();
        for t in &self.tokens {
            let address = t
                .address
                .parse::<Address>()
                .with_context(|| format!("Invalid address for token {}", t.name))?;
            tokens.insert(t.name.as_str(), address);
        }
        let lookup = |name: &str| {
            tokens
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("Unknown token in trade: {}", name))
        };

        self.trades
            .iter()
            .map(|trade| {
                Ok(FeeQuoteParams {
                    chain_id,
                    sell_token: lookup(&trade.sell)?,
                    buy_token: lookup(&trade.buy)?,
                    amount: trade
                        .amount
                        .parse::<U256>()
                        .with_context(|| format!("Invalid amount {} for {}→{}", trade.amount, trade.sell, trade.buy))?,
                    kind: trade.kind,
                })
            })
            .collect()
    }
}
