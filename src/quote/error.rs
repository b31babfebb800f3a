use std::fmt;

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use thiserror::Error;

use super::types::FeeInformation;

/// Machine-readable error codes returned by the pricing service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ApiErrorCode {
    UnsupportedToken,
    NoLiquidity,
    AmountIsZero,
    SellAmountDoesNotCoverFee,
    InsufficientFee,
    TransferEthToContract,
    NotFound,
    Other(String),
}

impl From<String> for ApiErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "UnsupportedToken" => ApiErrorCode::UnsupportedToken,
            "NoLiquidity" => ApiErrorCode::NoLiquidity,
            "AmountIsZero" => ApiErrorCode::AmountIsZero,
            "SellAmountDoesNotCoverFee" => ApiErrorCode::SellAmountDoesNotCoverFee,
            "InsufficientFee" => ApiErrorCode::InsufficientFee,
            "TransferEthToContract" => ApiErrorCode::TransferEthToContract,
            "NotFound" => ApiErrorCode::NotFound,
            _ => ApiErrorCode::Other(code),
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorCode::Other(code) => f.write_str(code),
            known => write!(f, "{:?}", known),
        }
    }
}

/// Error body of a non-2xx pricing service response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorErrorBody {
    pub error_type: ApiErrorCode,
    #[serde(default)]
    pub description: String,
}

#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("{code}: {description}")]
    Operator { code: ApiErrorCode, description: String },

    #[error("fee {} exceeds sell amount {amount}", .fee.amount)]
    FeeExceedsAmount { fee: FeeInformation, amount: U256 },

    #[error("price quote returned a zero amount")]
    ZeroPrice,

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("quote API returned status {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("invalid quote payload: {0}")]
    InvalidPayload(String),
}

/// How a failed refetch is reconciled into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteErrorKind {
    /// Mark the token unsupported.
    UnsupportedToken,
    /// Keep the fee, drop the price.
    FeeExceedsAmount,
    /// Typed pricing service error: log and clear the quote.
    OtherServiceError,
    /// Anything else: log and clear the quote.
    UnknownError,
}

impl From<OperatorErrorBody> for QuoteError {
    fn from(body: OperatorErrorBody) -> Self {
        QuoteError::Operator {
            code: body.error_type,
            description: body.description,
        }
    }
}

impl QuoteError {
    pub fn kind(&self) -> QuoteErrorKind {
        match self {
            QuoteError::Operator { code: ApiErrorCode::UnsupportedToken, .. } => {
                QuoteErrorKind::UnsupportedToken
            }
            QuoteError::Operator { .. } | QuoteError::ZeroPrice => QuoteErrorKind::OtherServiceError,
            QuoteError::FeeExceedsAmount { .. } => QuoteErrorKind::FeeExceedsAmount,
            QuoteError::Transport(_)
            | QuoteError::UnexpectedResponse { .. }
            | QuoteError::InvalidPayload(_) => QuoteErrorKind::UnknownError,
        }
    }

    /// Token named in an `UnsupportedToken` description, e.g.
    /// `"Token address 0xabc… is not supported"`.
    pub fn unsupported_token(&self) -> Option<Address> {
        match self {
            QuoteError::Operator { code: ApiErrorCode::UnsupportedToken, description } => description
                .split_whitespace()
                .map(|word| word.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
                .filter(|word| word.starts_with("0x"))
                .find_map(|word| word.parse::<Address>().ok()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator(code: &str, description: &str) -> QuoteError {
        let body: OperatorErrorBody = serde_json::from_value(serde_json::json!({
            "errorType": code,
            "description": description,
        }))
        .unwrap();
        body.into()
    }

    #[test]
    fn test_parse_known_code() {
        let err = operator("NoLiquidity", "not enough liquidity");
        assert!(matches!(err, QuoteError::Operator { code: ApiErrorCode::NoLiquidity, .. }));
        assert_eq!(err.kind(), QuoteErrorKind::OtherServiceError);
        assert_eq!(err.to_string(), "NoLiquidity: not enough liquidity");
    }

    #[test]
    fn test_parse_unknown_code() {
        let err = operator("SomethingNew", "");
        assert!(matches!(
            &err,
            QuoteError::Operator { code: ApiErrorCode::Other(c), .. } if c == "SomethingNew"
        ));
        assert_eq!(err.kind(), QuoteErrorKind::OtherServiceError);
    }

    #[test]
    fn test_unsupported_token_address() {
        let addr = Address::repeat_byte(0xab);
        let err = operator("UnsupportedToken", &format!("Token address {} is not supported.", addr));
        assert_eq!(err.kind(), QuoteErrorKind::UnsupportedToken);
        assert_eq!(err.unsupported_token(), Some(addr));
    }

    #[test]
    fn test_unsupported_token_without_address() {
        let err = operator("UnsupportedToken", "token not supported");
        assert_eq!(err.kind(), QuoteErrorKind::UnsupportedToken);
        assert_eq!(err.unsupported_token(), None);
    }

    #[test]
    fn test_other_kinds() {
        assert_eq!(QuoteError::ZeroPrice.kind(), QuoteErrorKind::OtherServiceError);
        assert_eq!(
            QuoteError::UnexpectedResponse { status: 502, body: String::new() }.kind(),
            QuoteErrorKind::UnknownError
        );
        assert_eq!(QuoteError::InvalidPayload("x".into()).kind(), QuoteErrorKind::UnknownError);
    }
}
