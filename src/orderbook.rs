//! L2 order books: snapshot + sequenced diff reconciliation.
//!
//! Diff quantities are absolute. Zero removes the level, anything else
//! replaces it. A diff whose sequence is not strictly above the last
//! applied one is refused; the owner is expected to resnapshot.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::core::{Error, PriceLevel, Result, Side, Trade, TradingPair, now_millis};

/// In-memory L2 orderbook for a single pair.
/// Bids: descending (highest first). Asks: ascending (lowest first).
#[derive(Debug, Clone)]
pub struct LocalOrderbook {
    pub pair: TradingPair,
    bids: BTreeMap<Decimal, Decimal>, // price → qty
    asks: BTreeMap<Decimal, Decimal>,
    sequence: u64,
    ts: u64,
}

impl LocalOrderbook {
    pub fn new(pair: TradingPair) -> Self {
        Self { pair, bids: BTreeMap::new(), asks: BTreeMap::new(), sequence: 0, ts: 0 }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, Decimal> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Absolute upsert. qty == 0 means remove the level.
    fn set_level(&mut self, side: Side, price: Decimal, qty: Decimal) {
        let book = self.side_mut(side);
        if qty.is_zero() {
            book.remove(&price);
        } else {
            book.insert(price, qty);
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.iter().next_back().map(|(p, q)| PriceLevel { price: *p, quantity: *q })
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, q)| PriceLevel { price: *p, quantity: *q })
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn view(&self) -> BookView {
        BookView {
            pair: self.pair.clone(),
            bids: self.bids.iter().rev().map(|(p, q)| PriceLevel { price: *p, quantity: *q }).collect(),
            asks: self.asks.iter().map(|(p, q)| PriceLevel { price: *p, quantity: *q }).collect(),
            sequence: self.sequence,
            timestamp: self.ts,
        }
    }
}

/// One level of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Read-only copy of a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookView {
    pub pair: TradingPair,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub sequence: u64,
    pub timestamp: u64,
}

impl BookView {
    pub fn level(&self, side: Side, price: Decimal) -> Option<Decimal> {
        let levels = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        levels.iter().find(|l| l.price == price).map(|l| l.quantity)
    }

    /// Same levels and sequence, ignoring when each was built.
    pub fn same_book(&self, other: &BookView) -> bool {
        self.pair == other.pair
            && self.bids == other.bids
            && self.asks == other.asks
            && self.sequence == other.sequence
    }
}

/// Trade print as received, before it is tagged
#[derive(Debug, Clone, PartialEq)]
pub struct TradePrint {
    pub trade_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: Option<u64>,
}

/// Owns every book the connector streams.
#[derive(Debug, Default)]
pub struct OrderBookReconciler {
    books: HashMap<TradingPair, LocalOrderbook>,
}

impl OrderBookReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole book for `pair`; `sequence` becomes the baseline.
    pub fn apply_snapshot(&mut self, pair: &TradingPair, levels: &[BookLevel], sequence: u64) -> BookView {
        let mut book = LocalOrderbook::new(pair.clone());
        for level in levels {
            book.set_level(level.side, level.price, level.quantity);
        }
        book.sequence = sequence;
        book.ts = now_millis();
        debug!(
            "Snapshot {} seq={} bids={} asks={}",
            pair,
            sequence,
            book.bids.len(),
            book.asks.len()
        );
        let view = book.view();
        self.books.insert(pair.clone(), book);
        view
    }

    pub fn apply_diff(
        &mut self,
        pair: &TradingPair,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        sequence: u64,
    ) -> Result<()> {
        let book = self
            .books
            .get_mut(pair)
            .ok_or_else(|| Error::MissingSnapshot(pair.clone()))?;

        if sequence <= book.sequence {
            warn!("Dropping stale diff for {}: seq {} <= {}", pair, sequence, book.sequence);
            return Err(Error::StaleSequence {
                pair: pair.clone(),
                last: book.sequence,
                received: sequence,
            });
        }

        book.set_level(side, price, quantity);
        book.sequence = sequence;
        book.ts = now_millis();
        Ok(())
    }

    /// Trades do not touch the book. Duplicates are passed through.
    pub fn apply_trade(&self, pair: &TradingPair, trade: TradePrint) -> Trade {
        Trade {
            trade_id: trade.trade_id,
            trading_pair: pair.clone(),
            price: trade.price,
            quantity: trade.quantity,
            timestamp: trade.timestamp.unwrap_or_else(now_millis),
        }
    }

    pub fn book(&self, pair: &TradingPair) -> Option<BookView> {
        self.books.get(pair).map(LocalOrderbook::view)
    }

    pub fn local_book(&self, pair: &TradingPair) -> Option<&LocalOrderbook> {
        self.books.get(pair)
    }

    pub fn last_sequence(&self, pair: &TradingPair) -> Option<u64> {
        self.books.get(pair).map(|b| b.sequence)
    }
}
