//! Order and cancel records in the exchange's canonical form

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize, Serializer};

use super::scale::ScaleWriter;
use super::{AMOUNT_DECIMALS, CLIENT_ORDER_ID_MAX_LEN, NATIVE_ASSET, NUMERIC_FIELD_WIDTH, UNIT_BALANCE};
use crate::core::{EncodingError, OrderIntent, OrderType, Side, TradingPair};
use crate::signer::AccountId;

/// 32-byte identifier. Client order ids are stored as their UTF-8 bytes,
/// zero-padded on the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub fn from_client_order_id(id: &str) -> Result<Self, EncodingError> {
        let bytes = id.as_bytes();
        if bytes.is_empty() || bytes.len() > CLIENT_ORDER_ID_MAX_LEN {
            return Err(EncodingError::InvalidIdentifier(id.to_string()));
        }
        let mut out = [0u8; 32];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// `0x`-prefixed hex is taken as a big-endian value; anything else as a
    /// client-order-id style string.
    pub fn from_identifier(id: &str) -> Result<Self, EncodingError> {
        match id.strip_prefix("0x") {
            Some(h) => {
                let bytes = hex::decode(h).map_err(|_| EncodingError::InvalidIdentifier(id.to_string()))?;
                if bytes.len() > 32 {
                    return Err(EncodingError::InvalidIdentifier(id.to_string()));
                }
                let mut out = [0u8; 32];
                out[32 - bytes.len()..].copy_from_slice(&bytes);
                Ok(Self(out))
            }
            None => Self::from_client_order_id(id),
        }
    }

    /// Inverse of `from_client_order_id` for the hex form seen in events.
    pub fn decode_client_order_id(hex_id: &str) -> Result<String, EncodingError> {
        let invalid = || EncodingError::InvalidIdentifier(hex_id.to_string());
        let bytes = hex::decode(hex_id.trim_start_matches("0x")).map_err(|_| invalid())?;
        let end = bytes.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
        String::from_utf8(bytes[..end].to_vec()).map_err(|_| invalid())
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Asset identifier: the native token or a numeric asset id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetId {
    Polkadex,
    Asset(u128),
}

impl AssetId {
    pub fn from_ticker(ticker: &str) -> Result<Self, EncodingError> {
        if ticker == NATIVE_ASSET {
            return Ok(AssetId::Polkadex);
        }
        ticker
            .parse::<u128>()
            .map(AssetId::Asset)
            .map_err(|_| EncodingError::UnknownAsset(ticker.to_string()))
    }

    pub fn ticker(&self) -> String {
        match self {
            AssetId::Polkadex => NATIVE_ASSET.to_string(),
            AssetId::Asset(id) => id.to_string(),
        }
    }

    fn encode_to(&self, w: &mut ScaleWriter) {
        match self {
            AssetId::Polkadex => {
                w.variant(0);
            }
            AssetId::Asset(id) => {
                w.variant(1).u128(*id);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairAssets {
    pub base_asset: AssetId,
    pub quote_asset: AssetId,
}

impl PairAssets {
    pub fn from_pair(pair: &TradingPair) -> Result<Self, EncodingError> {
        Ok(Self {
            base_asset: AssetId::from_ticker(pair.base())?,
            quote_asset: AssetId::from_ticker(pair.quote())?,
        })
    }

    pub fn to_pair(&self) -> TradingPair {
        TradingPair::from_assets(&self.base_asset.ticker(), &self.quote_asset.ticker())
    }
}

/// Order types the protocol can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordOrderType {
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "MARKET")]
    Market,
}

impl TryFrom<OrderType> for RecordOrderType {
    type Error = EncodingError;

    fn try_from(t: OrderType) -> Result<Self, Self::Error> {
        match t {
            OrderType::Limit => Ok(RecordOrderType::Limit),
            OrderType::Market => Ok(RecordOrderType::Market),
            other => Err(EncodingError::UnsupportedOrderType(other)),
        }
    }
}

/// Canonical order payload. Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRecord {
    pub client_order_id: H256,
    pub user: AccountId,
    pub main_account: AccountId,
    pub pair: PairAssets,
    pub side: Side,
    pub order_type: RecordOrderType,
    pub qty: String,
    pub price: String,
    pub timestamp: i64,
}

/// Convert a decimal amount to the protocol's integer string.
///
/// Rounds to `AMOUNT_DECIMALS` places, scales by `UNIT_BALANCE` and keeps
/// the first `NUMERIC_FIELD_WIDTH` digits. Wider values are cut, not
/// rejected, so amounts of 10 units or more lose magnitude.
pub fn to_protocol_units(value: Decimal) -> Result<String, EncodingError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(EncodingError::AmountOutOfRange(value));
    }
    let rounded = value.round_dp(AMOUNT_DECIMALS);
    let scaled = rounded
        .checked_mul(Decimal::from(UNIT_BALANCE))
        .and_then(|d| d.trunc().to_u128())
        .ok_or(EncodingError::AmountOutOfRange(value))?;
    let digits = scaled.to_string();
    Ok(digits.chars().take(NUMERIC_FIELD_WIDTH).collect())
}

/// Inverse scaling for amounts received from the exchange.
pub fn from_protocol_units(value: Decimal) -> Decimal {
    value / Decimal::from(UNIT_BALANCE)
}

pub fn build_order_record(
    intent: &OrderIntent,
    signing_identity: &AccountId,
    main_identity: &AccountId,
) -> Result<OrderRecord, EncodingError> {
    let order_type = RecordOrderType::try_from(intent.order_type)?;
    Ok(OrderRecord {
        client_order_id: H256::from_client_order_id(&intent.client_order_id)?,
        user: *signing_identity,
        main_account: *main_identity,
        pair: PairAssets::from_pair(&intent.trading_pair)?,
        side: intent.side,
        order_type,
        qty: to_protocol_units(intent.quantity)?,
        price: to_protocol_units(intent.price)?,
        timestamp: intent.created_at,
    })
}

/// Bytes that get signed for an order.
pub fn encode(record: &OrderRecord) -> Vec<u8> {
    let mut w = ScaleWriter::new();
    w.fixed(&record.client_order_id.0)
        .fixed(&record.user.0)
        .fixed(&record.main_account.0);
    record.pair.base_asset.encode_to(&mut w);
    record.pair.quote_asset.encode_to(&mut w);
    w.variant(match record.side {
        Side::Ask => 0,
        Side::Bid => 1,
    });
    w.variant(match record.order_type {
        RecordOrderType::Limit => 0,
        RecordOrderType::Market => 1,
    });
    w.str(&record.qty).str(&record.price).i64(record.timestamp);
    w.finish()
}

/// Bytes that get signed for a cancellation.
pub fn build_cancel_record(order_id: &str) -> Result<Vec<u8>, EncodingError> {
    Ok(H256::from_identifier(order_id)?.0.to_vec())
}
