//! HTTP client for the fee/price pricing service.

use std::time::Duration;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::quote::error::{OperatorErrorBody, QuoteError};
use crate::quote::types::{
    FeeInformation, FeeQuoteParams, PriceInformation, PriceQuoteParams, SupportedChainId,
};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Source of fee and price estimates.
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    async fn get_fee_quote(&self, params: &FeeQuoteParams) -> Result<FeeInformation, QuoteError>;

    async fn get_price_quote(&self, params: &PriceQuoteParams) -> Result<PriceInformation, QuoteError>;
}

#[derive(Debug, Clone)]
pub struct QuoteApiConfig {
    /// Service root, e.g. `https://protocol-mainnet.gnosis.io/api`.
    pub base_url: Url,
    pub timeout: Duration,
}

impl QuoteApiConfig {
    /// Chain default, overridable with `QUOTE_API_BASE_URL` / `QUOTE_API_TIMEOUT_MS`.
    pub fn from_env(chain_id: SupportedChainId) -> anyhow::Result<Self> {
        let base = std::env::var("QUOTE_API_BASE_URL")
            .unwrap_or_else(|_| chain_id.default_api_base().to_string());
        let mut timeout_ms = DEFAULT_TIMEOUT_MS;
        if let Ok(v) = std::env::var("QUOTE_API_TIMEOUT_MS") { if let Ok(ms) = v.parse() { timeout_ms = ms; } }
        Ok(Self {
            base_url: Url::parse(&base)?,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeResponse {
    expiration_date: DateTime<Utc>,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    amount: Option<String>,
    token: String,
}

pub struct QuoteApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl QuoteApiClient {
    pub fn new(cfg: QuoteApiConfig) -> Result<Self, QuoteError> {
        let client = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url,
        })
    }

    fn fee_url(&self, params: &FeeQuoteParams) -> Result<Url, QuoteError> {
        let mut url = join(&self.base_url, "v1/fee")?;
        url.query_pairs_mut()
            .append_pair("sellToken", &params.sell_token.to_string())
            .append_pair("buyToken", &params.buy_token.to_string())
            .append_pair("amount", &params.amount.to_string())
            .append_pair("kind", params.kind.as_str());
        Ok(url)
    }

    fn price_url(&self, params: &PriceQuoteParams) -> Result<Url, QuoteError> {
        let path = format!(
            "v1/markets/{}-{}/{}/{}",
            params.base_token,
            params.quote_token,
            params.kind.as_str(),
            params.amount
        );
        join(&self.base_url, &path)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, QuoteError> {
        debug!(%url, "quote request");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), body));
        }
        serde_json::from_str(&body).map_err(|e| QuoteError::InvalidPayload(e.to_string()))
    }
}

#[async_trait]
impl QuoteFetcher for QuoteApiClient {
    async fn get_fee_quote(&self, params: &FeeQuoteParams) -> Result<FeeInformation, QuoteError> {
        let url = self.fee_url(params)?;
        let resp: FeeResponse = self.get(url).await?;
        Ok(FeeInformation {
            expiration_date: resp.expiration_date,
            amount: parse_amount(&resp.amount)?,
        })
    }

    async fn get_price_quote(&self, params: &PriceQuoteParams) -> Result<PriceInformation, QuoteError> {
        let url = self.price_url(params)?;
        let resp: PriceResponse = self.get(url).await?;
        // A missing amount means no price could be computed.
        let amount = match resp.amount {
            Some(a) => parse_amount(&a)?,
            None => U256::ZERO,
        };
        let token = resp
            .token
            .parse::<Address>()
            .map_err(|e| QuoteError::InvalidPayload(format!("token {}: {}", resp.token, e)))?;
        Ok(PriceInformation { token, amount })
    }
}

/// Append `path` to the base URL, keeping the base's own path segments.
fn join(base: &Url, path: &str) -> Result<Url, QuoteError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base.join(path)
        .map_err(|e| QuoteError::InvalidPayload(format!("url {}{}: {}", base, path, e)))
}

fn parse_amount(raw: &str) -> Result<U256, QuoteError> {
    raw.parse::<U256>()
        .map_err(|e| QuoteError::InvalidPayload(format!("amount {}: {}", raw, e)))
}

/// Operator error if the body carries one, raw status otherwise.
fn error_from_body(status: u16, body: String) -> QuoteError {
    match serde_json::from_str::<OperatorErrorBody>(&body) {
        Ok(op) => op.into(),
        Err(_) => QuoteError::UnexpectedResponse { status, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::error::{ApiErrorCode, QuoteErrorKind};
    use crate::quote::types::OrderKind;

    fn client(base: &str) -> QuoteApiClient {
        QuoteApiClient::new(QuoteApiConfig {
            base_url: Url::parse(base).unwrap(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn test_fee_url() {
        let c = client("https://example.org/api");
        let params = FeeQuoteParams {
            chain_id: SupportedChainId::Mainnet,
            sell_token: Address::repeat_byte(0x11),
            buy_token: Address::repeat_byte(0x22),
            amount: U256::from(1_000u64),
            kind: OrderKind::Sell,
        };
        let url = c.fee_url(&params).unwrap();
        assert_eq!(url.path(), "/api/v1/fee");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("amount".to_string(), "1000".to_string())));
        assert!(pairs.contains(&("kind".to_string(), "sell".to_string())));
        assert!(pairs.contains(&("sellToken".to_string(), Address::repeat_byte(0x11).to_string())));
    }

    #[test]
    fn test_price_url() {
        let c = client("https://example.org/api/");
        let base = Address::repeat_byte(0x22);
        let quote = Address::repeat_byte(0x11);
        let params = PriceQuoteParams {
            chain_id: SupportedChainId::Xdai,
            base_token: base,
            quote_token: quote,
            amount: U256::from(5u64),
            kind: OrderKind::Buy,
        };
        let url = c.price_url(&params).unwrap();
        assert_eq!(url.path(), format!("/api/v1/markets/{}-{}/buy/5", base, quote));
    }

    #[test]
    fn test_error_from_operator_body() {
        let body = r#"{"errorType":"UnsupportedToken","description":"Token address 0x1111111111111111111111111111111111111111"}"#;
        let err = error_from_body(400, body.to_string());
        assert!(matches!(err, QuoteError::Operator { code: ApiErrorCode::UnsupportedToken, .. }));
        assert_eq!(err.unsupported_token(), Some(Address::repeat_byte(0x11)));
    }

    #[test]
    fn test_error_from_plain_body() {
        let err = error_from_body(502, "Bad Gateway".to_string());
        assert!(matches!(err, QuoteError::UnexpectedResponse { status: 502, .. }));
        assert_eq!(err.kind(), QuoteErrorKind::UnknownError);
    }

    #[test]
    fn test_fee_response_parses() {
        let resp: FeeResponse = serde_json::from_str(
            r#"{"expirationDate":"2021-05-01T12:00:00Z","amount":"1500000000000000"}"#,
        )
        .unwrap();
        assert_eq!(parse_amount(&resp.amount).unwrap(), U256::from(1_500_000_000_000_000u64));
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(matches!(parse_amount("12abc"), Err(QuoteError::InvalidPayload(_))));
    }
}
