//! Exchange collaborators - transport, typed queries, market metadata

pub mod client;
pub mod graphql;
pub mod model;
pub mod symbols;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::codec::{OrderRecord, PairAssets};
use crate::core::{Result, TradingPair};
use crate::signer::{AccountId, MultiSignature};

pub use client::GraphQlExchange;
pub use graphql::HttpTransport;
pub use model::{
    BalanceEvent, DiffEntry, MarketInfo, OrderBookSnapshot, OrderEvent, RemoteBalance, RemoteTrade, UserEvent,
};
pub use symbols::{SymbolMap, TradingRule};

/// One GraphQL operation
#[derive(Debug, Clone, Serialize)]
pub struct GraphQlRequest {
    #[serde(rename = "operationName")]
    pub operation: &'static str,
    pub query: &'static str,
    pub variables: Value,
}

impl GraphQlRequest {
    pub fn new(operation: &'static str, query: &'static str, variables: Value) -> Self {
        Self { operation, query, variables }
    }
}

/// Query/mutation channel to the exchange.
///
/// Returns the `data` object of the response. A remote rejection is
/// `Error::TransportRejected`, never an empty result.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: GraphQlRequest) -> Result<Value>;
}

/// Resolves a trading (proxy) identity to the main account that owns funds.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_main_account(&self, proxy: &AccountId) -> Result<AccountId>;
}

#[async_trait]
pub trait MarketMetadata: Send + Sync {
    async fn list_markets(&self) -> Result<Vec<MarketInfo>>;
}

/// Typed exchange operations used by the connector
#[async_trait]
pub trait ExchangeApi: IdentityResolver + MarketMetadata {
    /// Submit a signed order. Returns the exchange order id.
    async fn place_order(&self, record: &OrderRecord, signature: &MultiSignature) -> Result<String>;

    /// Submit a signed cancellation. `Ok(true)` when the exchange accepted it.
    async fn cancel_order(
        &self,
        exchange_order_id: &str,
        proxy: &AccountId,
        pair: &PairAssets,
        signature: &MultiSignature,
    ) -> Result<bool>;

    /// `Error::NotFound` when the exchange has no record of the order.
    async fn find_order(&self, main: &AccountId, market: &TradingPair, exchange_order_id: &str) -> Result<OrderEvent>;

    async fn all_balances(&self, main: &AccountId) -> Result<Vec<RemoteBalance>>;

    async fn orderbook_snapshot(&self, market: &TradingPair) -> Result<OrderBookSnapshot>;

    async fn recent_trades(&self, market: &TradingPair, limit: u32) -> Result<Vec<RemoteTrade>>;
}
