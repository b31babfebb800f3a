use std::fmt;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chains the pricing service is deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedChainId {
    Mainnet,
    Rinkeby,
    Xdai,
}

impl SupportedChainId {
    pub fn id(&self) -> u64 {
        match self {
            SupportedChainId::Mainnet => 1,
            SupportedChainId::Rinkeby => 4,
            SupportedChainId::Xdai => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedChainId::Mainnet => "mainnet",
            SupportedChainId::Rinkeby => "rinkeby",
            SupportedChainId::Xdai => "xdai",
        }
    }

    /// Default pricing service root for this chain (without the `/v1` suffix).
    pub fn default_api_base(&self) -> &'static str {
        match self {
            SupportedChainId::Mainnet => "https://protocol-mainnet.gnosis.io/api",
            SupportedChainId::Rinkeby => "https://protocol-rinkeby.gnosis.io/api",
            SupportedChainId::Xdai => "https://protocol-xdai.gnosis.io/api",
        }
    }
}

impl TryFrom<u64> for SupportedChainId {
    type Error = u64;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(SupportedChainId::Mainnet),
            4 => Ok(SupportedChainId::Rinkeby),
            100 => Ok(SupportedChainId::Xdai),
            other => Err(other),
        }
    }
}

impl fmt::Display for SupportedChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.as_str(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Sell,
    Buy,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Sell => "sell",
            OrderKind::Buy => "buy",
        }
    }
}

/// Trade for which a quote is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuoteParams {
    pub chain_id: SupportedChainId,
    pub sell_token: Address,
    pub buy_token: Address,
    pub amount: U256,
    pub kind: OrderKind,
}

/// Price request on a canonical market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuoteParams {
    pub chain_id: SupportedChainId,
    pub base_token: Address,
    pub quote_token: Address,
    pub amount: U256,
    pub kind: OrderKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeInformation {
    pub expiration_date: DateTime<Utc>,
    pub amount: U256,
}

impl FeeInformation {
    /// True when the fee expires within `margin` from `now` (or already has).
    pub fn is_expiring(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let Ok(margin) = chrono::Duration::from_std(margin) else {
            return true;
        };
        match now.checked_add_signed(margin) {
            Some(deadline) => self.expiration_date <= deadline,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceInformation {
    pub token: Address,
    pub amount: U256,
}

/// Reconciled quote as kept in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteInformation {
    pub params: FeeQuoteParams,
    pub fee: Option<FeeInformation>,
    /// `None` when the fee exceeds the sell amount.
    pub price: Option<PriceInformation>,
    pub last_check: DateTime<Utc>,
}

impl QuoteInformation {
    pub fn fee_exceeds_amount(&self) -> bool {
        self.fee.is_some() && self.price.is_none()
    }
}

/// Token the pricing service refused to quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedToken {
    pub chain_id: SupportedChainId,
    pub address: Address,
    pub date_added: DateTime<Utc>,
}

/// Market the price is requested on: sell orders price `sell-buy`,
/// buy orders price `buy-sell`. Returns `(base, quote)`.
pub fn canonical_market(sell_token: Address, buy_token: Address, kind: OrderKind) -> (Address, Address) {
    match kind {
        OrderKind::Sell => (sell_token, buy_token),
        OrderKind::Buy => (buy_token, sell_token),
    }
}

/// Sell amount left after paying the fee. `None` when nothing is left to trade.
pub fn amount_after_fee(amount: U256, fee: U256) -> Option<U256> {
    amount.checked_sub(fee).filter(|left| !left.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WETH: Address = Address::repeat_byte(0x11);
    const DAI: Address = Address::repeat_byte(0x22);

    #[test]
    fn test_canonical_market_sell() {
        assert_eq!(canonical_market(WETH, DAI, OrderKind::Sell), (WETH, DAI));
    }

    #[test]
    fn test_canonical_market_buy() {
        assert_eq!(canonical_market(WETH, DAI, OrderKind::Buy), (DAI, WETH));
    }

    #[test]
    fn test_amount_after_fee() {
        assert_eq!(amount_after_fee(U256::from(100u64), U256::from(30u64)), Some(U256::from(70u64)));
        assert_eq!(amount_after_fee(U256::from(100u64), U256::from(100u64)), None);
        assert_eq!(amount_after_fee(U256::from(100u64), U256::from(101u64)), None);
        assert_eq!(amount_after_fee(U256::from(100u64), U256::ZERO), Some(U256::from(100u64)));
    }

    #[test]
    fn test_fee_expiring() {
        let now = Utc::now();
        let fee = FeeInformation {
            expiration_date: now + chrono::Duration::seconds(20),
            amount: U256::from(1u64),
        };
        assert!(fee.is_expiring(now, Duration::from_secs(30)));
        assert!(!fee.is_expiring(now, Duration::from_secs(10)));
        assert!(fee.is_expiring(now + chrono::Duration::seconds(25), Duration::ZERO));
    }

    #[test]
    fn test_chain_id_round_trip() {
        for chain in [SupportedChainId::Mainnet, SupportedChainId::Rinkeby, SupportedChainId::Xdai] {
            assert_eq!(SupportedChainId::try_from(chain.id()), Ok(chain));
        }
        assert_eq!(SupportedChainId::try_from(5), Err(5));
    }
}
