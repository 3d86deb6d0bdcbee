//! Canonical order/cancel encoding
//!
//! Pure functions only. The bytes produced here are exactly what gets
//! signed, so identical logical inputs must give identical output.

pub mod order;
pub mod scale;

pub use order::{
    AssetId, H256, OrderRecord, PairAssets, RecordOrderType, build_cancel_record, build_order_record,
    encode, from_protocol_units, to_protocol_units,
};

/// Decimal amount → protocol integer scaling factor.
pub const UNIT_BALANCE: i64 = 1_000_000_000_000;

/// Characters kept from a scaled amount.
pub const NUMERIC_FIELD_WIDTH: usize = 13;

/// Decimal places kept before scaling.
pub const AMOUNT_DECIMALS: u32 = 4;

pub const CLIENT_ORDER_ID_MAX_LEN: usize = 32;

/// Ticker of the chain's native asset.
pub const NATIVE_ASSET: &str = "PDEX";
