//! Execution layer - tracked orders and balances
//!
//! Push events and poll results both land here. Every update is an
//! absolute assignment, so replays and out-of-order delivery converge to
//! the same state. Locks are held for single map operations only and
//! never across an await.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec::{H256, from_protocol_units};
use crate::core::config::SyncConfig;
use crate::core::{
    Balance, Error, OrderIntent, OrderState, Result, Side, TrackedOrder, TradeFee, TradeFill, TradingPair,
    now_millis,
};
use crate::exchange::{BalanceEvent, ExchangeApi, OrderEvent, RemoteBalance};
use crate::signer::AccountId;

/// Fee currency convention: bids pay in the base asset, asks in the quote.
pub fn fee_asset(side: Side, pair: &TradingPair) -> String {
    match side {
        Side::Bid => pair.base().to_string(),
        Side::Ask => pair.quote().to_string(),
    }
}

/// Owns tracked orders and balances.
pub struct OrderSynchronizer {
    active: RwLock<HashMap<String, TrackedOrder>>,
    completed: RwLock<HashMap<String, TrackedOrder>>,
    balances: RwLock<HashMap<String, Balance>>,
    not_found: Mutex<HashMap<String, u32>>,
    exchange_ids: Mutex<HashMap<String, watch::Sender<Option<String>>>>,
    not_found_threshold: u32,
    exchange_id_timeout: Duration,
}

impl OrderSynchronizer {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
            not_found: Mutex::new(HashMap::new()),
            exchange_ids: Mutex::new(HashMap::new()),
            not_found_threshold: config.not_found_threshold.max(1),
            exchange_id_timeout: config.exchange_id_timeout(),
        }
    }

    /// Start tracking an intent as PENDING_CREATE, before anything is sent.
    pub fn submit_pending(&self, intent: &OrderIntent) -> TrackedOrder {
        let order = TrackedOrder::from_intent(intent, now_millis());
        let (tx, _) = watch::channel(None);
        self.exchange_ids.lock().insert(order.client_order_id.clone(), tx);
        self.active.write().insert(order.client_order_id.clone(), order.clone());
        info!(
            "Tracking {} {} {} {} @ {} (PENDING_CREATE)",
            order.client_order_id, order.side, order.amount, order.trading_pair, order.price
        );
        order
    }

    /// Bind the exchange-assigned id. A pending order becomes OPEN.
    pub fn on_remote_confirmation(&self, client_order_id: &str, exchange_order_id: &str, ts: u64) -> Result<TrackedOrder> {
        let updated = {
            let mut active = self.active.write();
            let order = active
                .get_mut(client_order_id)
                .ok_or_else(|| Error::NotFound(format!("no active order {}", client_order_id)))?;
            order.exchange_order_id = Some(exchange_order_id.to_string());
            if order.state == OrderState::PendingCreate {
                order.state = OrderState::Open;
            }
            order.last_update_timestamp = ts;
            order.clone()
        };
        self.publish_exchange_id(client_order_id, exchange_order_id);
        info!("{} confirmed as {} ({:?})", client_order_id, exchange_order_id, updated.state);
        Ok(updated)
    }

    /// Apply a pushed order status. Returns a fill when cumulative filled
    /// quantity grew. Events for orders that are not active are ignored.
    pub fn on_order_event(&self, event: &OrderEvent) -> Result<Option<TradeFill>> {
        let state = remote_state(event)?;
        match self.tracked_id_for(event) {
            Some(client_order_id) => Ok(self.apply(&client_order_id, state, event)),
            None => {
                debug!(
                    "Ignoring {} event for untracked order cid={:?} id={:?}",
                    event.status, event.client_order_id, event.exchange_order_id
                );
                Ok(None)
            }
        }
    }

    /// Replace free/total for the one asset in the event.
    pub fn on_balance_event(&self, event: &BalanceEvent) {
        let free = from_protocol_units(event.free);
        let balance = Balance {
            asset: event.asset.ticker(),
            free,
            total: free + from_protocol_units(event.reserved),
        };
        debug!("Balance {}: free={} total={}", balance.asset, balance.free, balance.total);
        self.balances.write().insert(balance.asset.clone(), balance);
    }

    /// Replace-by-difference from a full balance listing.
    pub fn apply_balance_snapshot(&self, remote: &[RemoteBalance]) {
        let mut balances = self.balances.write();
        let mut seen = HashSet::with_capacity(remote.len());
        for entry in remote {
            let free = from_protocol_units(entry.free);
            let total = from_protocol_units(entry.free + entry.reserved);
            seen.insert(entry.asset.clone());
            balances.insert(entry.asset.clone(), Balance { asset: entry.asset.clone(), free, total });
        }
        balances.retain(|asset, _| {
            let keep = seen.contains(asset);
            if !keep {
                debug!("Balance {} no longer reported, removing", asset);
            }
            keep
        });
    }

    pub async fn refresh_balances(&self, api: &dyn ExchangeApi, main: &AccountId) -> Result<()> {
        let remote = api.all_balances(main).await?;
        self.apply_balance_snapshot(&remote);
        Ok(())
    }

    /// Poll every active order. Orders with an exchange id are queried;
    /// the rest get a bounded wait for their id. A miss in either case
    /// goes through the not-found path.
    pub async fn reconcile_via_poll(&self, api: &dyn ExchangeApi, main: &AccountId) -> Vec<TradeFill> {
        let orders = self.active_orders();
        if orders.is_empty() {
            return Vec::new();
        }
        debug!("Reconciling {} active orders", orders.len());

        let polls = orders.into_iter().map(|order| async move {
            match order.exchange_order_id.as_deref() {
                Some(exchange_id) => match api.find_order(main, &order.trading_pair, exchange_id).await {
                    Ok(event) => match remote_state(&event) {
                        Ok(state) => {
                            self.reset_not_found(&order.client_order_id);
                            self.apply(&order.client_order_id, state, &event)
                        }
                        Err(e) => {
                            warn!("Poll for {}: {}", order.client_order_id, e);
                            None
                        }
                    },
                    Err(Error::NotFound(_)) => {
                        self.process_order_not_found(&order.client_order_id);
                        None
                    }
                    Err(e) => {
                        warn!("Status poll for {} failed: {}", order.client_order_id, e);
                        None
                    }
                },
                None => {
                    match self
                        .wait_for_exchange_order_id(&order.client_order_id, self.exchange_id_timeout)
                        .await
                    {
                        Ok(id) => debug!("{} resolved to {} while polling", order.client_order_id, id),
                        Err(Error::Timeout(_)) => {
                            debug!("{} still has no exchange id", order.client_order_id);
                            self.process_order_not_found(&order.client_order_id);
                        }
                        Err(e) => debug!("Wait for {} ended: {}", order.client_order_id, e),
                    }
                    None
                }
            }
        });

        join_all(polls).await.into_iter().flatten().collect()
    }

    /// Wait up to `timeout` for the order's exchange id to be bound.
    pub async fn wait_for_exchange_order_id(&self, client_order_id: &str, timeout: Duration) -> Result<String> {
        let mut rx = self
            .exchange_ids
            .lock()
            .get(client_order_id)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| Error::NotFound(format!("no pending order {}", client_order_id)))?;

        let id = tokio::time::timeout(timeout, rx.wait_for(Option::is_some))
            .await
            .map_err(|_| Error::Timeout(format!("exchange id for {}", client_order_id)))?
            .map_err(|_| Error::InvalidState(format!("{} stopped being tracked", client_order_id)))?
            .clone();

        self.reset_not_found(client_order_id);
        id.ok_or_else(|| Error::InvalidState(format!("empty exchange id for {}", client_order_id)))
    }

    /// Count a miss. At the threshold the order is marked FAILED.
    /// Returns true when that happened.
    pub fn process_order_not_found(&self, client_order_id: &str) -> bool {
        let misses = {
            let mut counts = self.not_found.lock();
            let count = counts.entry(client_order_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if misses < self.not_found_threshold {
            warn!(
                "Order {} not found ({}/{})",
                client_order_id, misses, self.not_found_threshold
            );
            return false;
        }
        warn!("Order {} not found {} times, marking FAILED", client_order_id, misses);
        self.set_state(client_order_id, OrderState::Failed, now_millis()).is_some()
    }

    /// Mark an order FAILED outright (local encoding/signing failure).
    pub fn fail_order(&self, client_order_id: &str) -> Option<TrackedOrder> {
        self.set_state(client_order_id, OrderState::Failed, now_millis())
    }

    pub fn get_order(&self, client_order_id: &str) -> Option<TrackedOrder> {
        if let Some(order) = self.active.read().get(client_order_id) {
            return Some(order.clone());
        }
        self.completed.read().get(client_order_id).cloned()
    }

    pub fn active_orders(&self) -> Vec<TrackedOrder> {
        self.active.read().values().cloned().collect()
    }

    pub fn completed_orders(&self) -> Vec<TrackedOrder> {
        self.completed.read().values().cloned().collect()
    }

    pub fn balance(&self, asset: &str) -> Option<Balance> {
        self.balances.read().get(asset).cloned()
    }

    pub fn balances(&self) -> HashMap<String, Balance> {
        self.balances.read().clone()
    }

    /// Client order id of the active order an event refers to: the
    /// (hex) client id first, then the exchange id.
    pub fn tracked_id_for(&self, event: &OrderEvent) -> Option<String> {
        let active = self.active.read();
        if let Some(raw) = event.client_order_id.as_deref() {
            let decoded = H256::decode_client_order_id(raw).ok();
            for candidate in decoded.as_deref().into_iter().chain(std::iter::once(raw)) {
                if active.contains_key(candidate) {
                    return Some(candidate.to_string());
                }
            }
        }
        let exchange_id = event.exchange_order_id.as_deref()?;
        active
            .values()
            .find(|o| o.exchange_order_id.as_deref() == Some(exchange_id))
            .map(|o| o.client_order_id.clone())
    }

    fn apply(&self, client_order_id: &str, state: OrderState, event: &OrderEvent) -> Option<TradeFill> {
        let ts = event.timestamp.unwrap_or_else(now_millis);
        let mut bound_id = None;
        let (fill, terminal) = {
            let mut active = self.active.write();
            let order = active.get_mut(client_order_id)?;

            if order.exchange_order_id.is_none() {
                if let Some(id) = event.exchange_order_id.clone() {
                    order.exchange_order_id = Some(id.clone());
                    bound_id = Some(id);
                }
            }

            let fill = take_fill(order, event, ts);
            if order.state != state {
                debug!("{}: {:?} -> {:?}", client_order_id, order.state, state);
            }
            order.state = state;
            order.last_update_timestamp = ts;
            (fill, state.is_terminal())
        };

        if let Some(id) = bound_id {
            self.publish_exchange_id(client_order_id, &id);
        }
        if terminal {
            self.retire(client_order_id);
        }
        fill
    }

    fn set_state(&self, client_order_id: &str, state: OrderState, ts: u64) -> Option<TrackedOrder> {
        let updated = {
            let mut active = self.active.write();
            let order = active.get_mut(client_order_id)?;
            order.state = state;
            order.last_update_timestamp = ts;
            order.clone()
        };
        if state.is_terminal() {
            self.retire(client_order_id);
        }
        Some(updated)
    }

    /// Move a terminal order to the completed history.
    fn retire(&self, client_order_id: &str) {
        let Some(order) = self.active.write().remove(client_order_id) else {
            return;
        };
        info!("{} finished as {:?}", client_order_id, order.state);
        self.completed.write().insert(client_order_id.to_string(), order);
        self.not_found.lock().remove(client_order_id);
        self.exchange_ids.lock().remove(client_order_id);
    }

    fn publish_exchange_id(&self, client_order_id: &str, exchange_order_id: &str) {
        self.reset_not_found(client_order_id);
        if let Some(tx) = self.exchange_ids.lock().get(client_order_id) {
            tx.send_replace(Some(exchange_order_id.to_string()));
        }
    }

    fn reset_not_found(&self, client_order_id: &str) {
        self.not_found.lock().remove(client_order_id);
    }
}

fn remote_state(event: &OrderEvent) -> Result<OrderState> {
    OrderState::from_remote(&event.status)
        .ok_or_else(|| Error::Decode(format!("unknown order status {:?}", event.status)))
}

/// Fill for the growth of cumulative filled quantity, if any. Updates the
/// order's executed amount and cumulative fee.
fn take_fill(order: &mut TrackedOrder, event: &OrderEvent, ts: u64) -> Option<TradeFill> {
    let filled = from_protocol_units(event.filled_quantity);
    if filled <= order.executed_amount {
        return None;
    }
    let fill_base_amount = filled - order.executed_amount;
    let cumulative_fee = from_protocol_units(event.fee);
    let fee_amount = (cumulative_fee - order.cumulative_fee).max(Decimal::ZERO);
    let fill_price = match from_protocol_units(event.avg_filled_price) {
        p if p.is_zero() => order.price,
        p => p,
    };
    let side = event.side.as_deref().and_then(|s| s.parse().ok()).unwrap_or(order.side);
    let exchange_order_id = order.exchange_order_id.clone();

    order.executed_amount = filled;
    order.cumulative_fee = order.cumulative_fee.max(cumulative_fee);

    Some(TradeFill {
        trade_id: format!(
            "{}-{}",
            exchange_order_id.as_deref().unwrap_or(&order.client_order_id),
            filled.normalize()
        ),
        client_order_id: order.client_order_id.clone(),
        exchange_order_id,
        trading_pair: order.trading_pair.clone(),
        fill_base_amount,
        fill_quote_amount: fill_base_amount * fill_price,
        fill_price,
        fee: TradeFee { asset: fee_asset(side, &order.trading_pair), amount: fee_amount },
        fill_timestamp: ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AssetId, UNIT_BALANCE};
    use crate::core::OrderType;
    use crate::exchange::{IdentityResolver, MarketInfo, MarketMetadata, OrderBookSnapshot, RemoteTrade};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn config(threshold: u32) -> SyncConfig {
        SyncConfig { poll_interval_secs: 10, exchange_id_timeout_secs: 10, not_found_threshold: threshold }
    }

    fn intent(cid: &str) -> OrderIntent {
        OrderIntent {
            client_order_id: cid.into(),
            trading_pair: TradingPair::new("PDEX-1"),
            side: Side::Bid,
            order_type: OrderType::Limit,
            price: dec!(1.00),
            quantity: dec!(1000),
            created_at: 1,
        }
    }

    fn units(d: Decimal) -> Decimal {
        d * Decimal::from(UNIT_BALANCE)
    }

    fn event(cid: &str, status: &str, filled: Decimal, fee: Decimal) -> OrderEvent {
        OrderEvent {
            client_order_id: Some(H256::from_client_order_id(cid).unwrap().to_hex()),
            exchange_order_id: Some("42".into()),
            status: status.into(),
            side: Some("Bid".into()),
            pair: None,
            market: Some("PDEX-1".into()),
            filled_quantity: units(filled),
            avg_filled_price: units(dec!(1)),
            fee: units(fee),
            timestamp: Some(1_000),
            event_id: None,
        }
    }

    #[test]
    fn test_limit_bid_lifecycle() {
        let sync = OrderSynchronizer::new(&config(3));
        let order = sync.submit_pending(&intent("ALPH1"));
        assert_eq!(order.state, OrderState::PendingCreate);

        let order = sync.on_remote_confirmation("ALPH1", "42", 10).unwrap();
        assert_eq!(order.state, OrderState::Open);
        assert_eq!(order.exchange_order_id.as_deref(), Some("42"));

        let fill = sync
            .on_order_event(&event("ALPH1", "CLOSED", dec!(1000), dec!(2)))
            .unwrap()
            .expect("fill");
        assert_eq!(fill.fill_base_amount, dec!(1000));
        assert_eq!(fill.fill_price, dec!(1));
        assert_eq!(fill.fee.amount, dec!(2));
        // Bids pay fees in the base asset.
        assert_eq!(fill.fee.asset, "PDEX");

        let order = sync.get_order("ALPH1").unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert!(sync.active_orders().is_empty());
        assert_eq!(sync.completed_orders().len(), 1);
    }

    #[test]
    fn test_replayed_event_is_idempotent() {
        let sync = OrderSynchronizer::new(&config(3));
        sync.submit_pending(&intent("ALPH1"));
        sync.on_remote_confirmation("ALPH1", "42", 10).unwrap();

        let partial = event("ALPH1", "PARTIAL", dec!(400), dec!(1));
        let first = sync.on_order_event(&partial).unwrap().expect("first fill");
        assert_eq!(first.fill_base_amount, dec!(400));
        let before = sync.get_order("ALPH1").unwrap();

        assert!(sync.on_order_event(&partial).unwrap().is_none());
        assert_eq!(sync.get_order("ALPH1").unwrap(), before);

        let more = sync
            .on_order_event(&event("ALPH1", "PARTIAL", dec!(700), dec!(1.5)))
            .unwrap()
            .expect("second fill");
        assert_eq!(more.fill_base_amount, dec!(300));
        assert_eq!(more.fee.amount, dec!(0.5));
        assert_eq!(sync.get_order("ALPH1").unwrap().state, OrderState::PartiallyFilled);
    }

    #[test]
    fn test_ask_fee_in_quote_and_lookup_by_exchange_id() {
        let sync = OrderSynchronizer::new(&config(3));
        let mut i = intent("ALPH2");
        i.side = Side::Ask;
        sync.submit_pending(&i);
        sync.on_remote_confirmation("ALPH2", "42", 10).unwrap();

        let mut ev = event("ALPH2", "PARTIAL", dec!(1), dec!(0.1));
        ev.client_order_id = None;
        ev.side = Some("Ask".into());
        let fill = sync.on_order_event(&ev).unwrap().unwrap();
        assert_eq!(fill.fee.asset, "1");
        assert_eq!(fill.client_order_id, "ALPH2");
    }

    #[test]
    fn test_events_for_inactive_orders_ignored() {
        let sync = OrderSynchronizer::new(&config(3));
        sync.submit_pending(&intent("ALPH1"));
        sync.on_order_event(&event("ALPH1", "CANCELLED", dec!(0), dec!(0))).unwrap();
        assert_eq!(sync.get_order("ALPH1").unwrap().state, OrderState::Canceled);

        // Late OPEN for a finished order changes nothing.
        assert!(sync.on_order_event(&event("ALPH1", "OPEN", dec!(5), dec!(0))).unwrap().is_none());
        assert_eq!(sync.get_order("ALPH1").unwrap().state, OrderState::Canceled);
        assert!(sync.on_order_event(&event("NOPE", "OPEN", dec!(0), dec!(0))).unwrap().is_none());
    }

    #[test]
    fn test_unknown_status_is_decode_error() {
        let sync = OrderSynchronizer::new(&config(3));
        sync.submit_pending(&intent("ALPH1"));
        let err = sync.on_order_event(&event("ALPH1", "WEIRD", dec!(0), dec!(0))).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_balance_event_touches_one_asset() {
        let sync = OrderSynchronizer::new(&config(3));
        sync.apply_balance_snapshot(&[
            RemoteBalance { asset: "PDEX".into(), free: units(dec!(10)), reserved: units(dec!(1)) },
            RemoteBalance { asset: "1".into(), free: units(dec!(5)), reserved: dec!(0) },
        ]);
        let ev = BalanceEvent {
            asset: AssetId::Asset(1),
            free: units(dec!(3)),
            reserved: units(dec!(2)),
            pending_withdrawal: dec!(0),
            event_id: None,
        };
        sync.on_balance_event(&ev);
        let after_first = sync.balances();
        sync.on_balance_event(&ev);
        assert_eq!(sync.balances(), after_first);

        assert_eq!(sync.balance("1").unwrap().free, dec!(3));
        assert_eq!(sync.balance("1").unwrap().total, dec!(5));
        assert_eq!(sync.balance("PDEX").unwrap().total, dec!(11));
    }

    #[test]
    fn test_balance_snapshot_removes_missing_assets() {
        let sync = OrderSynchronizer::new(&config(3));
        sync.apply_balance_snapshot(&[
            RemoteBalance { asset: "PDEX".into(), free: units(dec!(1)), reserved: dec!(0) },
            RemoteBalance { asset: "1".into(), free: units(dec!(1)), reserved: dec!(0) },
        ]);
        sync.apply_balance_snapshot(&[RemoteBalance { asset: "PDEX".into(), free: units(dec!(2)), reserved: dec!(0) }]);
        assert!(sync.balance("1").is_none());
        assert_eq!(sync.balance("PDEX").unwrap().free, dec!(2));
        assert_eq!(sync.balances().len(), 1);
    }

    /// Exchange stub for polling: every order lookup misses.
    struct MissingOrders {
        found: Option<OrderEvent>,
    }

    #[async_trait]
    impl IdentityResolver for MissingOrders {
        async fn resolve_main_account(&self, proxy: &AccountId) -> Result<AccountId> {
            Ok(*proxy)
        }
    }

    #[async_trait]
    impl MarketMetadata for MissingOrders {
        async fn list_markets(&self) -> Result<Vec<MarketInfo>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl ExchangeApi for MissingOrders {
        async fn place_order(&self, _: &crate::codec::OrderRecord, _: &crate::signer::MultiSignature) -> Result<String> {
            Err(Error::InvalidState("unused".into()))
        }
        async fn cancel_order(
            &self,
            _: &str,
            _: &AccountId,
            _: &crate::codec::PairAssets,
            _: &crate::signer::MultiSignature,
        ) -> Result<bool> {
            Ok(false)
        }
        async fn find_order(&self, _: &AccountId, _: &TradingPair, id: &str) -> Result<OrderEvent> {
            self.found.clone().ok_or_else(|| Error::NotFound(id.to_string()))
        }
        async fn all_balances(&self, _: &AccountId) -> Result<Vec<RemoteBalance>> {
            Ok(vec![RemoteBalance { asset: "PDEX".into(), free: dec!(0), reserved: dec!(0) }])
        }
        async fn orderbook_snapshot(&self, _: &TradingPair) -> Result<OrderBookSnapshot> {
            Ok(OrderBookSnapshot { levels: Vec::new(), sequence: 0 })
        }
        async fn recent_trades(&self, _: &TradingPair, _: u32) -> Result<Vec<RemoteTrade>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_exchange_id_escalates_to_failed() {
        let sync = OrderSynchronizer::new(&config(3));
        let api = MissingOrders { found: None };
        let main = AccountId([1; 32]);
        sync.submit_pending(&intent("ALPH1"));

        for _ in 0..2 {
            sync.reconcile_via_poll(&api, &main).await;
            assert_eq!(sync.get_order("ALPH1").unwrap().state, OrderState::PendingCreate);
        }
        sync.reconcile_via_poll(&api, &main).await;
        let order = sync.get_order("ALPH1").unwrap();
        assert_eq!(order.state, OrderState::Failed);
        assert!(sync.active_orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_resolution_never_fails() {
        let sync = Arc::new(OrderSynchronizer::new(&config(3)));
        let api = MissingOrders {
            found: Some(OrderEvent { client_order_id: None, ..event("ALPH1", "OPEN", dec!(0), dec!(0)) }),
        };
        let main = AccountId([1; 32]);
        sync.submit_pending(&intent("ALPH1"));

        sync.reconcile_via_poll(&api, &main).await;
        sync.reconcile_via_poll(&api, &main).await;

        // Confirmation arrives while the next poll is waiting for it.
        let waiter = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.reconcile_via_poll(&api, &main).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        sync.on_remote_confirmation("ALPH1", "42", 5).unwrap();
        waiter.await.unwrap();

        for _ in 0..5 {
            let api = MissingOrders {
                found: Some(OrderEvent { client_order_id: None, ..event("ALPH1", "OPEN", dec!(0), dec!(0)) }),
            };
            sync.reconcile_via_poll(&api, &main).await;
        }
        assert_eq!(sync.get_order("ALPH1").unwrap().state, OrderState::Open);
    }

    #[tokio::test]
    async fn test_poll_not_found_with_exchange_id() {
        let sync = OrderSynchronizer::new(&config(2));
        let api = MissingOrders { found: None };
        let main = AccountId([1; 32]);
        sync.submit_pending(&intent("ALPH1"));
        sync.on_remote_confirmation("ALPH1", "42", 1).unwrap();

        sync.reconcile_via_poll(&api, &main).await;
        assert_eq!(sync.get_order("ALPH1").unwrap().state, OrderState::Open);
        sync.reconcile_via_poll(&api, &main).await;
        assert_eq!(sync.get_order("ALPH1").unwrap().state, OrderState::Failed);
    }

    #[tokio::test]
    async fn test_poll_result_applies_fill() {
        let sync = OrderSynchronizer::new(&config(3));
        let api = MissingOrders { found: Some(event("ALPH1", "CLOSED", dec!(1000), dec!(1))) };
        sync.submit_pending(&intent("ALPH1"));
        sync.on_remote_confirmation("ALPH1", "42", 1).unwrap();

        let fills = sync.reconcile_via_poll(&api, &AccountId([1; 32])).await;
        assert_eq!(fills.len(), 1);
        assert_eq!(sync.get_order("ALPH1").unwrap().state, OrderState::Filled);

        sync.refresh_balances(&api, &AccountId([1; 32])).await.unwrap();
        assert!(sync.balance("PDEX").is_some());
    }

    #[tokio::test]
    async fn test_wait_for_exchange_id() {
        let sync = Arc::new(OrderSynchronizer::new(&config(3)));
        sync.submit_pending(&intent("ALPH1"));
        let s = sync.clone();
        let wait = tokio::spawn(async move { s.wait_for_exchange_order_id("ALPH1", Duration::from_secs(5)).await });
        tokio::task::yield_now().await;
        sync.on_remote_confirmation("ALPH1", "99", 1).unwrap();
        assert_eq!(wait.await.unwrap().unwrap(), "99");
        assert!(matches!(
            sync.wait_for_exchange_order_id("NOPE", Duration::from_millis(1)).await,
            Err(Error::NotFound(_))
        ));
    }
}
