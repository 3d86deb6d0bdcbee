//! Error handling - Zero-cost, hierarchical errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::types::{OrderType, TradingPair};

pub type Result<T> = std::result::Result<T, Error>;

/// AlephTX connector error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed intent or record (codec)
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Key unavailable or signing primitive failure
    #[error("Signing error: {0}")]
    Signing(String),

    /// Remote explicitly rejected the request
    #[error("Request rejected by exchange: {0}")]
    TransportRejected(String),

    /// Remote has no record (distinct from a rejection)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Order book diff at or below the last applied sequence
    #[error("Stale sequence for {pair}: last applied {last}, received {received}")]
    StaleSequence {
        pair: TradingPair,
        last: u64,
        received: u64,
    },

    /// Diff arrived before any snapshot for the pair
    #[error("No snapshot applied yet for {0}")]
    MissingSnapshot(TradingPair),

    /// Bounded wait exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Inbound message could not be interpreted
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Codec failures. Never retried with mutated parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unsupported order type {0:?}")]
    UnsupportedOrderType(OrderType),

    #[error("unsupported order side {0:?}")]
    UnsupportedSide(String),

    #[error("unknown asset {0:?} (expected PDEX or a numeric asset id)")]
    UnknownAsset(String),

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("amount {0} out of range for protocol units")]
    AmountOutOfRange(Decimal),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}
