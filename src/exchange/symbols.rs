//! Local <-> exchange market names and per-market trading rules

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

use super::model::MarketInfo;
use crate::codec::from_protocol_units;
use crate::core::{Error, Result, TradingPair};

/// Two-way, injective map between local pair names and exchange market names.
///
/// Exchange markets are `BASE-QUOTE` with numeric asset ids (`PDEX-1`);
/// aliases give them readable local names (`1` -> `USDT` yields `PDEX-USDT`).
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    to_remote: HashMap<TradingPair, TradingPair>,
    to_local: HashMap<TradingPair, TradingPair>,
}

impl SymbolMap {
    pub fn build(markets: &[MarketInfo], aliases: &HashMap<String, String>) -> Result<Self> {
        let alias = |asset: &str| aliases.get(asset).cloned().unwrap_or_else(|| asset.to_string());
        let mut map = Self::default();
        for market in markets {
            let remote = TradingPair::new(market.market.as_str());
            let local = TradingPair::from_assets(&alias(remote.base()), &alias(remote.quote()));
            if map.to_remote.contains_key(&local) || map.to_local.contains_key(&remote) {
                return Err(Error::Config(format!(
                    "market {} maps to {} which is already taken",
                    remote, local
                )));
            }
            debug!("Symbol {} <-> {}", local, remote);
            map.to_remote.insert(local.clone(), remote.clone());
            map.to_local.insert(remote, local);
        }
        info!("Symbol map built with {} markets", map.len());
        Ok(map)
    }

    pub fn to_remote(&self, local: &TradingPair) -> Result<&TradingPair> {
        self.to_remote
            .get(local)
            .ok_or_else(|| Error::NotFound(format!("no exchange market for {}", local)))
    }

    pub fn to_local(&self, remote: &TradingPair) -> Option<&TradingPair> {
        self.to_local.get(remote)
    }

    pub fn len(&self) -> usize {
        self.to_remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_remote.is_empty()
    }
}

/// Minimum size and increments for one market, in human units.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingRule {
    pub trading_pair: TradingPair,
    pub min_order_size: Decimal,
    pub min_price_increment: Decimal,
    pub min_base_amount_increment: Decimal,
}

impl TradingRule {
    const DEFAULT_MIN_ORDER_SIZE: Decimal = Decimal::ONE;
    const DEFAULT_INCREMENT: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

    /// Market metadata is in protocol units; missing fields use the
    /// exchange-wide defaults (size 1, increments 0.1).
    pub fn from_market(trading_pair: TradingPair, market: &MarketInfo) -> Self {
        let scaled = |v: Option<Decimal>, default: Decimal| {
            v.map(from_protocol_units).filter(|d| !d.is_zero()).unwrap_or(default)
        };
        Self {
            trading_pair,
            min_order_size: scaled(market.min_order_qty, Self::DEFAULT_MIN_ORDER_SIZE),
            min_price_increment: scaled(market.price_tick_size, Self::DEFAULT_INCREMENT),
            min_base_amount_increment: scaled(market.qty_step_size, Self::DEFAULT_INCREMENT),
        }
    }

    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        quantize_down(price, self.min_price_increment)
    }

    pub fn quantize_amount(&self, amount: Decimal) -> Decimal {
        quantize_down(amount, self.min_base_amount_increment)
    }

    /// Quantize both and refuse anything that ends up unplaceable.
    pub fn apply(&self, price: Decimal, amount: Decimal, is_market: bool) -> Result<(Decimal, Decimal)> {
        let amount = self.quantize_amount(amount);
        if amount.is_zero() || amount < self.min_order_size {
            return Err(Error::InvalidState(format!(
                "{} amount {} below minimum {}",
                self.trading_pair, amount, self.min_order_size
            )));
        }
        let price = if is_market { price } else { self.quantize_price(price) };
        if !is_market && price.is_zero() {
            return Err(Error::InvalidState(format!("{} price rounds to zero", self.trading_pair)));
        }
        Ok((price, amount))
    }
}

fn quantize_down(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    ((value / step).floor() * step).normalize()
}
