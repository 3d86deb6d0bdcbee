//! Stream handlers: user events, trade prints, order book increments

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ConnectorEvent, Shared};
use crate::core::{Error, Result, TradingPair};
use crate::exchange::model::{DiffEntry, parse_diffs, parse_trades};
use crate::exchange::{ExchangeApi, UserEvent};
use crate::feeds::{Channel, ChannelHandler};
use crate::signer::Signer;

fn unexpected(channel: &Channel) -> Error {
    Error::InvalidState(format!("handler bound to wrong channel {}", channel))
}

/// `SetBalance` / `SetOrder` on the main account's channel.
pub(crate) struct UserHandler<A, S> {
    shared: Arc<Shared<A, S>>,
}

impl<A, S> UserHandler<A, S> {
    pub(crate) fn new(shared: Arc<Shared<A, S>>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl<A: ExchangeApi + 'static, S: Signer + 'static> ChannelHandler for UserHandler<A, S> {
    async fn handle(&self, _channel: &Channel, payload: Value) -> Result<()> {
        match UserEvent::parse(&payload) {
            Ok(UserEvent::SetBalance(balance)) => self.shared.sync.on_balance_event(&balance),
            Ok(UserEvent::SetOrder(order)) => {
                let tracked = self.shared.sync.tracked_id_for(&order);
                match self.shared.sync.on_order_event(&order) {
                    Ok(fill) => {
                        if let Some(fill) = fill {
                            self.shared.publish(ConnectorEvent::Fill(fill));
                        }
                        if let Some(cid) = tracked {
                            self.shared.publish_order(&cid);
                        }
                    }
                    Err(e) => warn!("Order event skipped: {}", e),
                }
            }
            Err(e) => warn!("Ignoring user payload: {}", e),
        }
        Ok(())
    }
}

/// Public trade prints for one market.
pub(crate) struct TradeHandler<A, S> {
    shared: Arc<Shared<A, S>>,
}

impl<A, S> TradeHandler<A, S> {
    pub(crate) fn new(shared: Arc<Shared<A, S>>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl<A: ExchangeApi + 'static, S: Signer + 'static> ChannelHandler for TradeHandler<A, S> {
    async fn handle(&self, channel: &Channel, payload: Value) -> Result<()> {
        let Channel::RecentTrades(market) = channel else {
            return Err(unexpected(channel));
        };
        let prints = match parse_trades(&payload) {
            Ok(prints) => prints,
            Err(e) => {
                warn!("Bad trade payload on {}: {}", channel, e);
                return Ok(());
            }
        };
        for print in prints {
            let trade = self.shared.books.read().apply_trade(market, print);
            self.shared.publish(ConnectorEvent::Trade(trade));
        }
        Ok(())
    }
}

/// Order book increments for one market. Owns the resnapshot policy.
pub(crate) struct DiffHandler<A, S> {
    shared: Arc<Shared<A, S>>,
}

impl<A, S> DiffHandler<A, S> {
    pub(crate) fn new(shared: Arc<Shared<A, S>>) -> Self {
        Self { shared }
    }
}

impl<A: ExchangeApi, S: Signer> DiffHandler<A, S> {
    /// Apply in order; stop at the first entry that needs a resnapshot.
    fn apply(&self, market: &TradingPair, diffs: &[DiffEntry]) -> Result<bool> {
        let mut books = self.shared.books.write();
        for diff in diffs {
            match books.apply_diff(market, diff.side, diff.price, diff.quantity, diff.sequence) {
                Ok(()) => {}
                Err(Error::MissingSnapshot(_)) => return Ok(true),
                Err(Error::StaleSequence { received, .. }) => {
                    // Covered by the snapshot we already hold.
                    let baseline = self.shared.baselines.lock().get(market).copied().unwrap_or(0);
                    if received <= baseline {
                        debug!("Skipping diff seq {} for {} at or below snapshot {}", received, market, baseline);
                        continue;
                    }
                    return Ok(true);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    async fn resync(&self, market: &TradingPair) {
        match self.shared.resnapshot(market).await {
            Ok(view) => debug!("Resnapshotted {} at seq {}", market, view.sequence),
            Err(e) => warn!("Resnapshot of {} failed: {}", market, e),
        }
    }
}

#[async_trait]
impl<A: ExchangeApi + 'static, S: Signer + 'static> ChannelHandler for DiffHandler<A, S> {
    async fn handle(&self, channel: &Channel, payload: Value) -> Result<()> {
        let Channel::OrderBookIncrement(market) = channel else {
            return Err(unexpected(channel));
        };
        let diffs = match parse_diffs(&payload) {
            Ok(diffs) => diffs,
            Err(e) => {
                warn!("Bad diff payload on {}: {}", channel, e);
                return Ok(());
            }
        };

        if self.apply(market, &diffs)? {
            warn!("Book {} out of sequence, resnapshotting", market);
            self.resync(market).await;
        }
        Ok(())
    }

    async fn lagged(&self, channel: &Channel, dropped: u64) -> Result<()> {
        let Channel::OrderBookIncrement(market) = channel else {
            return Err(unexpected(channel));
        };
        warn!("Lost {} increments for {}, resnapshotting", dropped, market);
        self.resync(market).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{H256, UNIT_BALANCE};
    use crate::connector::tests::{FakeExchange, connector};
    use crate::core::{OrderState, OrderType, Side};
    use crate::exchange::OrderBookSnapshot;
    use crate::feeds::multiplexer::tests::data;
    use crate::orderbook::BookLevel;
    use crate::signer::AccountId;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;

    fn pdex1() -> TradingPair {
        TradingPair::new("PDEX-1")
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_diff_stream_removes_level() {
        let (c, frames) = connector(FakeExchange::default());
        c.start().await.unwrap();
        let ch = Channel::OrderBookIncrement(pdex1());

        let unit = UNIT_BALANCE;
        frames
            .send(data(&ch, json!([{"side": "Ask", "price": 10 * unit, "qty": 5 * unit, "seq": 1}])))
            .unwrap();
        wait_until(|| c.shared.books.read().last_sequence(&pdex1()) == Some(1)).await;
        let book = c.shared.books.read().book(&pdex1()).unwrap();
        assert_eq!(book.level(Side::Ask, dec!(10)), Some(dec!(5)));

        frames
            .send(data(&ch, json!([{"side": "Ask", "price": 10 * unit, "qty": 0, "seq": 2}])))
            .unwrap();
        wait_until(|| c.shared.books.read().last_sequence(&pdex1()) == Some(2)).await;
        let book = c.shared.books.read().book(&pdex1()).unwrap();
        assert_eq!(book.level(Side::Ask, dec!(10)), None);
        assert_eq!(book.level(Side::Ask, dec!(11)), Some(dec!(1)));

        c.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_diff_triggers_resnapshot() {
        let (c, frames) = connector(FakeExchange::default());
        c.start().await.unwrap();
        assert_eq!(*c.shared.api.snapshot_calls.lock(), 1);

        c.shared.api.snapshots.lock().push(OrderBookSnapshot {
            levels: vec![BookLevel { side: Side::Bid, price: dec!(9), quantity: dec!(2) }],
            sequence: 7,
        });
        let ch = Channel::OrderBookIncrement(pdex1());
        let change = |seq: u64| json!({"type": "IncOB", "changes": [["Bid", "9.5", "1", seq]]});
        frames.send(data(&ch, change(5))).unwrap();
        frames.send(data(&ch, change(3))).unwrap();

        wait_until(|| *c.shared.api.snapshot_calls.lock() == 2).await;
        wait_until(|| c.shared.books.read().last_sequence(&pdex1()) == Some(7)).await;
        let book = c.shared.books.read().book(&pdex1()).unwrap();
        assert_eq!(book.level(Side::Bid, dec!(9)), Some(dec!(2)));
        assert_eq!(book.level(Side::Bid, dec!(9.5)), None);

        // At or below the fresh baseline: dropped quietly.
        frames.send(data(&ch, change(6))).unwrap();
        frames.send(data(&ch, change(8))).unwrap();
        wait_until(|| c.shared.books.read().last_sequence(&pdex1()) == Some(8)).await;
        assert_eq!(*c.shared.api.snapshot_calls.lock(), 2);

        c.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_increments_trigger_resnapshot() {
        let (c, _frames) = connector(FakeExchange::default());
        c.start().await.unwrap();
        let handler = DiffHandler::new(c.shared.clone());
        let ch = Channel::OrderBookIncrement(pdex1());

        c.shared.api.snapshots.lock().push(OrderBookSnapshot {
            levels: vec![BookLevel { side: Side::Ask, price: dec!(12), quantity: dec!(4) }],
            sequence: 9,
        });
        handler.lagged(&ch, 2).await.unwrap();

        assert_eq!(*c.shared.api.snapshot_calls.lock(), 2);
        assert_eq!(c.shared.books.read().last_sequence(&pdex1()), Some(9));
        let book = c.shared.books.read().book(&pdex1()).unwrap();
        assert_eq!(book.level(Side::Ask, dec!(12)), Some(dec!(4)));
        assert_eq!(book.level(Side::Ask, dec!(11)), None);
        assert!(handler.lagged(&Channel::RecentTrades(pdex1()), 1).await.is_err());

        c.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_user_channel_drives_orders_and_balances() {
        let (c, frames) = connector(FakeExchange::default());
        c.start().await.unwrap();
        let mut events = c.subscribe();

        let outcome = c
            .place_order(&TradingPair::new("PDEX-USDT"), Side::Bid, OrderType::Limit, dec!(1000), dec!(1.00))
            .await
            .unwrap();
        let cid = outcome.client_order_id().to_string();
        assert_eq!(c.sync().get_order(&cid).unwrap().state, OrderState::Open);

        let user = Channel::User(AccountId([9; 32]));
        let unit = UNIT_BALANCE;
        let set_order = json!({"SetOrder": {
            "id": 42,
            "client_order_id": H256::from_client_order_id(&cid).unwrap().to_hex(),
            "status": "CLOSED",
            "side": "Bid",
            "pair": {"base_asset": "polkadex", "quote_asset": {"asset": 1}},
            "filled_quantity": (1000 * unit).to_string(),
            "avg_filled_price": unit.to_string(),
            "fee": (2 * unit).to_string(),
        }});
        frames.send(data(&user, json!({"unexpected": true}))).unwrap();
        frames.send(data(&user, Value::String(set_order.to_string()))).unwrap();
        frames
            .send(data(&user, json!({"SetBalance": {"asset": {"asset": 1}, "free": 3 * unit, "reserved": unit, "pending_withdrawal": 0}})))
            .unwrap();

        wait_until(|| c.sync().balance("1").is_some()).await;
        let order = c.sync().get_order(&cid).unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.executed_amount, dec!(1000));
        assert_eq!(c.sync().balance("1").unwrap().total, dec!(4));

        // Placement publishes the OPEN order first.
        assert!(matches!(events.recv().await.unwrap(), ConnectorEvent::Order(_)));
        match events.recv().await.unwrap() {
            ConnectorEvent::Fill(fill) => {
                assert_eq!(fill.fill_base_amount, dec!(1000));
                assert_eq!(fill.fee.asset, "PDEX");
                assert_eq!(fill.fee.amount, dec!(2));
                assert_eq!(fill.trading_pair, TradingPair::new("PDEX-USDT"));
            }
            other => panic!("unexpected {:?}", other),
        }

        c.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_trade_prints_published() {
        let (c, frames) = connector(FakeExchange::default());
        c.start().await.unwrap();
        let mut events = c.subscribe();

        let ch = Channel::RecentTrades(pdex1());
        frames
            .send(data(&ch, json!({"m": "PDEX-1", "p": "1.5", "q": "2", "tid": 77, "t": 1700000000000u64})))
            .unwrap();
        match events.recv().await.unwrap() {
            ConnectorEvent::Trade(trade) => {
                assert_eq!(trade.trade_id, "77");
                assert_eq!(trade.price, dec!(1.5));
                assert_eq!(trade.trading_pair, TradingPair::new("PDEX-USDT"));
            }
            other => panic!("unexpected {:?}", other),
        }
        c.shutdown().await.unwrap();
    }
}
