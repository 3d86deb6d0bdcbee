//! Core types - Strong typing for safety

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::error::EncodingError;

/// Exchange trading pair (e.g., "PDEX-1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingPair(String);

impl TradingPair {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base asset ticker, the part before the first '-'.
    pub fn base(&self) -> &str {
        self.0.split_once('-').map(|(b, _)| b).unwrap_or(&self.0)
    }

    /// Quote asset ticker, the part after the first '-'.
    pub fn quote(&self) -> &str {
        self.0.split_once('-').map(|(_, q)| q).unwrap_or("")
    }

    pub fn from_assets(base: &str, quote: &str) -> Self {
        Self::new(format!("{}-{}", base, quote))
    }
}

impl std::fmt::Display for TradingPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side as named by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "Bid",
            Side::Ask => "Ask",
        }
    }
}

impl FromStr for Side {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Bid" | "bid" | "BID" => Ok(Side::Bid),
            "Ask" | "ask" | "ASK" => Ok(Side::Ask),
            other => Err(EncodingError::UnsupportedSide(other.to_string())),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type. Only `Limit` and `Market` are accepted by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopLoss => write!(f, "STOP_LOSS"),
            OrderType::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// Local lifecycle state of a tracked order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    PendingCreate,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Failed,
}

impl OrderState {
    /// Map a remote status code to a local state.
    pub fn from_remote(code: &str) -> Option<Self> {
        match code {
            "OPEN" => Some(OrderState::Open),
            "CLOSED" => Some(OrderState::Filled),
            "PARTIAL" => Some(OrderState::PartiallyFilled),
            "CANCELLED" => Some(OrderState::Canceled),
            "REJECTED" | "EXPIRED" => Some(OrderState::Failed),
            "PENDING_CREATE" => Some(OrderState::PendingCreate),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Canceled | OrderState::Failed)
    }
}

/// What the caller wants placed. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub trading_pair: TradingPair,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Unix seconds; this is the timestamp that gets signed.
    pub created_at: i64,
}

/// Order as seen by the synchronizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedOrder {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: TradingPair,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Decimal,
    pub state: OrderState,
    pub executed_amount: Decimal,
    pub cumulative_fee: Decimal,
    pub created_at: i64,
    /// Unix millis of the last applied update.
    pub last_update_timestamp: u64,
}

impl TrackedOrder {
    pub fn from_intent(intent: &OrderIntent, now_ms: u64) -> Self {
        Self {
            client_order_id: intent.client_order_id.clone(),
            exchange_order_id: None,
            trading_pair: intent.trading_pair.clone(),
            side: intent.side,
            order_type: intent.order_type,
            amount: intent.quantity,
            price: intent.price,
            state: OrderState::PendingCreate,
            executed_amount: Decimal::ZERO,
            cumulative_fee: Decimal::ZERO,
            created_at: intent.created_at,
            last_update_timestamp: now_ms,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Account balance for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub total: Decimal,
}

impl Balance {
    pub fn reserved(&self) -> Decimal {
        self.total - self.free
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Public trade print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub trading_pair: TradingPair,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Unix millis
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFee {
    pub asset: String,
    pub amount: Decimal,
}

/// Fill against one of our own orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    pub trade_id: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: TradingPair,
    pub fill_base_amount: Decimal,
    pub fill_quote_amount: Decimal,
    pub fill_price: Decimal,
    pub fee: TradeFee,
    pub fill_timestamp: u64,
}

pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
