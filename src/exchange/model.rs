//! Wire shapes of exchange responses and stream payloads

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

use crate::codec::{AssetId, PairAssets, from_protocol_units};
use crate::core::{Error, Result, Side, TradingPair};
use crate::orderbook::{BookLevel, TradePrint};

/// Accepts `42` or `"42"`.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Decimal sent either as a JSON number or a numeric string.
fn decimal<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Decimal, D::Error> {
    opt_decimal(d)?.ok_or_else(|| serde::de::Error::custom("expected a decimal"))
}

fn opt_decimal<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Decimal>, D::Error> {
    let raw = match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(serde::de::Error::custom(format!("expected a decimal, got {}", other))),
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// Accepts unix millis as a number or numeric string, or an RFC 3339 date.
fn timestamp_millis<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse::<u64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|t| t.timestamp_millis() as u64)
        }),
        _ => None,
    })
}

/// `getAllBalancesByMainAccount` item, amounts in protocol units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f", deserialize_with = "decimal")]
    pub free: Decimal,
    #[serde(rename = "r", deserialize_with = "decimal")]
    pub reserved: Decimal,
}

/// `getAllMarkets` item
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketInfo {
    pub market: String,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub max_order_qty: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub max_price: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub min_order_qty: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub min_price: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub price_tick_size: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub qty_step_size: Option<Decimal>,
    #[serde(default)]
    pub quote_asset_precision: Option<u32>,
}

/// `getRecentTrades` item, human units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteTrade {
    #[serde(rename = "p", deserialize_with = "decimal")]
    pub price: Decimal,
    #[serde(rename = "q", deserialize_with = "decimal")]
    pub quantity: Decimal,
    #[serde(rename = "t", default, deserialize_with = "timestamp_millis")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookSnapshot {
    pub levels: Vec<BookLevel>,
    pub sequence: u64,
}

/// Order status as pushed (`SetOrder`) or polled (`findOrderByMainAccount`).
/// Amounts are in protocol units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderEvent {
    #[serde(alias = "cid", default)]
    pub client_order_id: Option<String>,
    #[serde(rename = "id", default, deserialize_with = "string_or_number")]
    pub exchange_order_id: Option<String>,
    #[serde(alias = "st")]
    pub status: String,
    #[serde(alias = "s", default)]
    pub side: Option<String>,
    #[serde(default)]
    pub pair: Option<PairAssets>,
    #[serde(rename = "m", default)]
    pub market: Option<String>,
    #[serde(alias = "fq", default, deserialize_with = "decimal")]
    pub filled_quantity: Decimal,
    #[serde(alias = "afp", default, deserialize_with = "decimal")]
    pub avg_filled_price: Decimal,
    #[serde(default, deserialize_with = "decimal")]
    pub fee: Decimal,
    #[serde(rename = "t", default, deserialize_with = "timestamp_millis")]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub event_id: Option<u64>,
}

impl OrderEvent {
    pub fn trading_pair(&self) -> Option<TradingPair> {
        self.pair
            .as_ref()
            .map(PairAssets::to_pair)
            .or_else(|| self.market.as_deref().map(TradingPair::new))
    }
}

/// `SetBalance` push, amounts in protocol units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceEvent {
    pub asset: AssetId,
    #[serde(deserialize_with = "decimal")]
    pub free: Decimal,
    #[serde(default, deserialize_with = "decimal")]
    pub reserved: Decimal,
    #[serde(default, deserialize_with = "decimal")]
    pub pending_withdrawal: Decimal,
    #[serde(default)]
    pub event_id: Option<u64>,
}

/// Payloads of the per-account channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub enum UserEvent {
    SetBalance(BalanceEvent),
    SetOrder(OrderEvent),
}

impl UserEvent {
    pub fn parse(payload: &Value) -> Result<Self> {
        let payload = unwrap_json_string(payload)?;
        serde_json::from_value(payload).map_err(|e| Error::Decode(format!("user event: {}", e)))
    }
}

/// One order book increment. Price/qty already converted to human units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffEntry {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub sequence: u64,
}

#[derive(Debug, Deserialize)]
struct RawDiff {
    side: String,
    #[serde(deserialize_with = "decimal")]
    price: Decimal,
    #[serde(deserialize_with = "decimal")]
    qty: Decimal,
    seq: u64,
}

/// `{"type":"IncOB","changes":[[side, price, qty, seq], ...]}`, human units.
#[derive(Debug, Deserialize)]
struct IncrementalBook {
    changes: Vec<(String, Value, Value, u64)>,
}

/// Decode an order book increment payload, possibly wrapped in a JSON string.
///
/// Two shapes are accepted: a list of `{"side","price","qty","seq"}` objects
/// in protocol units, or an `IncOB` object whose `changes` rows are already
/// in human units. Entries with an unknown side are skipped.
pub fn parse_diffs(payload: &Value) -> Result<Vec<DiffEntry>> {
    let payload = unwrap_json_string(payload)?;
    let decode_err = |e: serde_json::Error| Error::Decode(format!("orderbook diff: {}", e));

    let rows: Vec<(String, Decimal, Decimal, u64)> = if payload.get("changes").is_some() {
        let inc: IncrementalBook = serde_json::from_value(payload).map_err(decode_err)?;
        inc.changes
            .into_iter()
            .map(|(side, price, qty, seq)| {
                Ok((side, decimal(price).map_err(decode_err)?, decimal(qty).map_err(decode_err)?, seq))
            })
            .collect::<Result<_>>()?
    } else {
        let raw: Vec<RawDiff> = match payload {
            Value::Array(_) => serde_json::from_value(payload),
            other => serde_json::from_value(other).map(|d: RawDiff| vec![d]),
        }
        .map_err(decode_err)?;
        raw.into_iter()
            .map(|d| (d.side, from_protocol_units(d.price), from_protocol_units(d.qty), d.seq))
            .collect()
    };

    let mut out = Vec::with_capacity(rows.len());
    for (side, price, quantity, sequence) in rows {
        match side.parse::<Side>() {
            Ok(side) => out.push(DiffEntry { side, price, quantity, sequence }),
            Err(e) => warn!("Skipping diff entry seq={}: {}", sequence, e),
        }
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "p", deserialize_with = "decimal")]
    price: Decimal,
    #[serde(rename = "q", deserialize_with = "decimal")]
    quantity: Decimal,
    #[serde(rename = "tid", default, deserialize_with = "string_or_number")]
    trade_id: Option<String>,
    #[serde(rename = "t", default, deserialize_with = "timestamp_millis")]
    timestamp: Option<u64>,
}

/// Decode one trade object or a list of them.
pub fn parse_trades(payload: &Value) -> Result<Vec<TradePrint>> {
    let payload = unwrap_json_string(payload)?;
    let raw: Vec<RawTrade> = match payload {
        Value::Array(_) => serde_json::from_value(payload),
        other => serde_json::from_value(other).map(|t: RawTrade| vec![t]),
    }
    .map_err(|e| Error::Decode(format!("trade: {}", e)))?;

    Ok(raw
        .into_iter()
        .map(|t| TradePrint {
            trade_id: t
                .trade_id
                .unwrap_or_else(|| t.timestamp.unwrap_or_default().to_string()),
            price: t.price,
            quantity: t.quantity,
            timestamp: t.timestamp,
        })
        .collect())
}

/// `getOrderbook` item, protocol units.
#[derive(Debug, Deserialize)]
pub(crate) struct RawLevel {
    #[serde(deserialize_with = "decimal")]
    pub p: Decimal,
    #[serde(deserialize_with = "decimal")]
    pub q: Decimal,
    pub s: String,
}

impl RawLevel {
    pub fn into_level(self) -> Result<BookLevel> {
        Ok(BookLevel {
            side: self.s.parse::<Side>()?,
            price: from_protocol_units(self.p),
            quantity: from_protocol_units(self.q),
        })
    }
}

/// Stream payloads sometimes arrive as JSON encoded inside a string.
fn unwrap_json_string(payload: &Value) -> Result<Value> {
    match payload {
        Value::String(s) => serde_json::from_str(s).map_err(|e| Error::Decode(format!("embedded json: {}", e))),
        other => Ok(other.clone()),
    }
}
