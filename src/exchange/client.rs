//! Typed exchange queries and mutations over any `Transport`

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::model::{MarketInfo, OrderBookSnapshot, OrderEvent, RawLevel, RemoteBalance, RemoteTrade};
use super::{ExchangeApi, GraphQlRequest, IdentityResolver, MarketMetadata, Transport};
use crate::codec::{OrderRecord, PairAssets};
use crate::core::{Error, Result, TradingPair};
use crate::signer::{AccountId, MultiSignature};

const PLACE_ORDER: &str = r#"
mutation PlaceOrder($input: UserActionInput!) {
  place_order(input: $input)
}"#;

const CANCEL_ORDER: &str = r#"
mutation CancelOrder($input: UserActionInput!) {
  cancel_order(input: $input)
}"#;

const FIND_ORDER: &str = r#"
query findOrderByMainAccount($main: String!, $market: String!, $order_id: String!) {
  findOrderByMainAccount(main_account: $main, market: $market, order_id: $order_id) {
    afp cid fee fq id m ot p q s st t u
  }
}"#;

const ALL_BALANCES: &str = r#"
query getAllBalancesByMainAccount($main: String!) {
  getAllBalancesByMainAccount(main_account: $main) {
    items { a f r }
  }
}"#;

const FIND_USER_BY_PROXY: &str = r#"
query findUserByProxyAccount($proxy_account: String!) {
  findUserByProxyAccount(proxy_account: $proxy_account) {
    items
  }
}"#;

const ALL_MARKETS: &str = r#"
query getAllMarkets {
  getAllMarkets {
    items {
      market max_order_qty max_price min_order_qty min_price
      price_tick_size qty_step_size quote_asset_precision
    }
  }
}"#;

const ORDERBOOK: &str = r#"
query getOrderbook($market: String!, $limit: Int, $nextToken: String) {
  getOrderbook(market: $market, limit: $limit, nextToken: $nextToken) {
    nextToken
    items { p q s stid }
  }
}"#;

const RECENT_TRADES: &str = r#"
query getRecentTrades($market: String!, $limit: Int, $nextToken: String) {
  getRecentTrades(m: $market, limit: $limit, nextToken: $nextToken) {
    nextToken
    items { p q t }
  }
}"#;

/// Exchange API over GraphQL
pub struct GraphQlExchange<T: Transport> {
    transport: T,
}

impl<T: Transport> GraphQlExchange<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn field(&self, operation: &'static str, query: &'static str, variables: Value, field: &str) -> Result<Value> {
        let mut data = self.transport.execute(GraphQlRequest::new(operation, query, variables)).await?;
        Ok(data.get_mut(field).map(Value::take).unwrap_or(Value::Null))
    }

    async fn items<R: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &'static str,
        variables: Value,
        field: &str,
    ) -> Result<Vec<R>> {
        let mut value = self.field(operation, query, variables, field).await?;
        match value.get_mut("items").map(Value::take) {
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(items) => serde_json::from_value(items)
                .map_err(|e| Error::Decode(format!("{}: {}", operation, e))),
        }
    }

    /// User actions go in as a JSON string under `input.payload`.
    fn user_action(payload: Value) -> Value {
        json!({ "input": { "payload": payload.to_string() } })
    }
}

/// `findUserByProxyAccount` items are flattened records such as
/// `{hash_key=..., range_key=..., main_account=es...}`.
fn parse_main_account(item: &str) -> Option<&str> {
    let rest = &item[item.find("main_account=")? + "main_account=".len()..];
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim()).filter(|s| !s.is_empty())
}

#[async_trait]
impl<T: Transport> IdentityResolver for GraphQlExchange<T> {
    async fn resolve_main_account(&self, proxy: &AccountId) -> Result<AccountId> {
        let items: Vec<String> = self
            .items(
                "findUserByProxyAccount",
                FIND_USER_BY_PROXY,
                json!({ "proxy_account": proxy.to_ss58() }),
                "findUserByProxyAccount",
            )
            .await?;
        let first = items
            .first()
            .ok_or_else(|| Error::NotFound(format!("no main account for proxy {}", proxy)))?;
        let address = parse_main_account(first)
            .ok_or_else(|| Error::Decode(format!("unrecognised user record: {}", first)))?;
        let (main, _) = AccountId::from_ss58_any(address)?;
        info!("Proxy {} trades for main account {}", proxy, main);
        Ok(main)
    }
}

#[async_trait]
impl<T: Transport> MarketMetadata for GraphQlExchange<T> {
    async fn list_markets(&self) -> Result<Vec<MarketInfo>> {
        self.items("getAllMarkets", ALL_MARKETS, json!({}), "getAllMarkets").await
    }
}

#[async_trait]
impl<T: Transport> ExchangeApi for GraphQlExchange<T> {
    async fn place_order(&self, record: &OrderRecord, signature: &MultiSignature) -> Result<String> {
        let payload = json!({ "PlaceOrder": [record, signature] });
        let result = self
            .field("PlaceOrder", PLACE_ORDER, Self::user_action(payload), "place_order")
            .await?;
        let id = match result {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            other => return Err(Error::TransportRejected(format!("place_order returned {}", other))),
        };
        debug!("Order {:?} accepted as {}", record.client_order_id, id);
        Ok(id)
    }

    async fn cancel_order(
        &self,
        exchange_order_id: &str,
        proxy: &AccountId,
        pair: &PairAssets,
        signature: &MultiSignature,
    ) -> Result<bool> {
        let payload = json!({ "CancelOrder": [exchange_order_id, proxy, pair, signature] });
        let result = self
            .field("CancelOrder", CANCEL_ORDER, Self::user_action(payload), "cancel_order")
            .await?;
        Ok(match result {
            Value::Null => false,
            Value::Bool(b) => b,
            _ => true,
        })
    }

    async fn find_order(&self, main: &AccountId, market: &TradingPair, exchange_order_id: &str) -> Result<OrderEvent> {
        let result = self
            .field(
                "findOrderByMainAccount",
                FIND_ORDER,
                json!({ "main": main.to_ss58(), "market": market.as_str(), "order_id": exchange_order_id }),
                "findOrderByMainAccount",
            )
            .await?;
        if result.is_null() {
            return Err(Error::NotFound(format!("order {} on {}", exchange_order_id, market)));
        }
        serde_json::from_value(result).map_err(|e| Error::Decode(format!("findOrderByMainAccount: {}", e)))
    }

    async fn all_balances(&self, main: &AccountId) -> Result<Vec<RemoteBalance>> {
        self.items(
            "getAllBalancesByMainAccount",
            ALL_BALANCES,
            json!({ "main": main.to_ss58() }),
            "getAllBalancesByMainAccount",
        )
        .await
    }

    async fn orderbook_snapshot(&self, market: &TradingPair) -> Result<OrderBookSnapshot> {
        let raw: Vec<Value> = self
            .items("getOrderbook", ORDERBOOK, json!({ "market": market.as_str() }), "getOrderbook")
            .await?;
        let mut sequence = 0;
        let mut levels = Vec::with_capacity(raw.len());
        for item in raw {
            if let Some(stid) = item.get("stid").and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok())) {
                sequence = sequence.max(stid);
            }
            let level: RawLevel =
                serde_json::from_value(item).map_err(|e| Error::Decode(format!("getOrderbook: {}", e)))?;
            levels.push(level.into_level()?);
        }
        Ok(OrderBookSnapshot { levels, sequence })
    }

    async fn recent_trades(&self, market: &TradingPair, limit: u32) -> Result<Vec<RemoteTrade>> {
        self.items(
            "getRecentTrades",
            RECENT_TRADES,
            json!({ "market": market.as_str(), "limit": limit }),
            "getRecentTrades",
        )
        .await
    }
}
