//! Connector - ties codec, signer, streams, books and order sync together
//!
//! Callers speak local pair names (`PDEX-USDT`); everything below this
//! layer (records, books, tracked orders) uses exchange market names
//! (`PDEX-1`). The symbol map translates at the edges.

mod handlers;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OnceCell, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{CLIENT_ORDER_ID_MAX_LEN, PairAssets, build_cancel_record, build_order_record, encode};
use crate::core::{
    AppConfig, Error, OrderIntent, OrderType, Result, Side, TrackedOrder, Trade, TradeFill, TradingPair,
    now_millis, now_secs,
};
use crate::exchange::{ExchangeApi, SymbolMap, TradingRule};
use crate::execution::OrderSynchronizer;
use crate::feeds::{Channel, Session, StreamConnector};
use crate::orderbook::{BookView, OrderBookReconciler};
use crate::signer::{AccountId, Signer};

use handlers::{DiffHandler, TradeHandler, UserHandler};

/// Result of a placement call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// Exchange accepted the order and assigned an id.
    Confirmed { client_order_id: String, exchange_order_id: String },
    /// Sent, but the response was lost. Polling settles it.
    Pending { client_order_id: String },
}

impl PlaceOutcome {
    pub fn client_order_id(&self) -> &str {
        match self {
            PlaceOutcome::Confirmed { client_order_id, .. } | PlaceOutcome::Pending { client_order_id } => {
                client_order_id
            }
        }
    }
}

/// Broadcast to subscribers. Pairs are local names.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    Fill(TradeFill),
    Trade(Trade),
    Order(TrackedOrder),
}

/// State shared with stream handlers and the polling task.
pub(crate) struct Shared<A, S> {
    pub(crate) api: A,
    pub(crate) signer: S,
    pub(crate) sync: OrderSynchronizer,
    pub(crate) books: RwLock<OrderBookReconciler>,
    /// Sequence each book was last snapshotted at.
    pub(crate) baselines: Mutex<HashMap<TradingPair, u64>>,
    symbols: RwLock<SymbolMap>,
    rules: RwLock<HashMap<TradingPair, TradingRule>>,
    main_account: OnceCell<AccountId>,
    events: broadcast::Sender<ConnectorEvent>,
}

impl<A: ExchangeApi, S: Signer> Shared<A, S> {
    async fn main_account(&self) -> Result<AccountId> {
        self.main_account
            .get_or_try_init(|| async {
                let proxy = self.signer.account_id();
                let main = self.api.resolve_main_account(&proxy).await?;
                info!("Trading as {} on behalf of {}", proxy, main);
                Ok::<_, Error>(main)
            })
            .await
            .copied()
    }

    /// Fetch and apply a fresh book for an exchange market.
    pub(crate) async fn resnapshot(&self, market: &TradingPair) -> Result<BookView> {
        let snapshot = self.api.orderbook_snapshot(market).await?;
        let view = self.books.write().apply_snapshot(market, &snapshot.levels, snapshot.sequence);
        self.baselines.lock().insert(market.clone(), snapshot.sequence);
        Ok(view)
    }

    /// Initial book for a market whose diff channel is already live. A
    /// book the diff handler has since rebuilt at a later sequence wins.
    async fn seed(&self, market: &TradingPair) -> Result<u64> {
        let snapshot = self.api.orderbook_snapshot(market).await?;
        {
            let mut books = self.books.write();
            if let Some(current) = books.last_sequence(market).filter(|seq| *seq > snapshot.sequence) {
                debug!("Keeping {} book at seq {} over seed at {}", market, current, snapshot.sequence);
                return Ok(current);
            }
            books.apply_snapshot(market, &snapshot.levels, snapshot.sequence);
        }
        self.baselines.lock().insert(market.clone(), snapshot.sequence);
        Ok(snapshot.sequence)
    }

    fn local_pair(&self, market: &TradingPair) -> TradingPair {
        self.symbols.read().to_local(market).cloned().unwrap_or_else(|| market.clone())
    }

    pub(crate) fn publish(&self, event: ConnectorEvent) {
        let event = match event {
            ConnectorEvent::Fill(mut fill) => {
                fill.trading_pair = self.local_pair(&fill.trading_pair);
                ConnectorEvent::Fill(fill)
            }
            ConnectorEvent::Trade(mut trade) => {
                trade.trading_pair = self.local_pair(&trade.trading_pair);
                ConnectorEvent::Trade(trade)
            }
            ConnectorEvent::Order(mut order) => {
                order.trading_pair = self.local_pair(&order.trading_pair);
                ConnectorEvent::Order(order)
            }
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn publish_order(&self, client_order_id: &str) {
        if let Some(order) = self.sync.get_order(client_order_id) {
            self.publish(ConnectorEvent::Order(order));
        }
    }

    async fn poll_once(&self) {
        let main = match self.main_account().await {
            Ok(main) => main,
            Err(e) => {
                warn!("Poll skipped, main account unresolved: {}", e);
                return;
            }
        };
        let before: HashMap<String, _> = self
            .sync
            .active_orders()
            .into_iter()
            .map(|o| (o.client_order_id.clone(), o.state))
            .collect();

        for fill in self.sync.reconcile_via_poll(&self.api, &main).await {
            self.publish(ConnectorEvent::Fill(fill));
        }
        for (cid, state) in before {
            if self.sync.get_order(&cid).is_some_and(|o| o.state != state) {
                self.publish_order(&cid);
            }
        }

        if let Err(e) = self.sync.refresh_balances(&self.api, &main).await {
            warn!("Balance refresh failed: {}", e);
        }
    }
}

pub struct Connector<A, S, C> {
    shared: Arc<Shared<A, S>>,
    streams: C,
    config: AppConfig,
    session: AsyncMutex<Option<Session>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<A, S, C> Connector<A, S, C>
where
    A: ExchangeApi + 'static,
    S: Signer + 'static,
    C: StreamConnector,
{
    pub fn new(api: A, signer: S, streams: C, config: AppConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        let shared = Shared {
            api,
            signer,
            sync: OrderSynchronizer::new(&config.sync),
            books: RwLock::new(OrderBookReconciler::new()),
            baselines: Mutex::new(HashMap::new()),
            symbols: RwLock::new(SymbolMap::default()),
            rules: RwLock::new(HashMap::new()),
            main_account: OnceCell::new(),
            events,
        };
        Self {
            shared: Arc::new(shared),
            streams,
            config,
            session: AsyncMutex::new(None),
            poller: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.shared.events.subscribe()
    }

    pub fn sync(&self) -> &OrderSynchronizer {
        &self.shared.sync
    }

    /// Rebuild the symbol map and trading rules from exchange metadata.
    pub async fn refresh_markets(&self) -> Result<()> {
        let markets = self.shared.api.list_markets().await?;
        let symbols = SymbolMap::build(&markets, &self.config.exchange.asset_aliases)?;
        let rules: HashMap<_, _> = markets
            .iter()
            .map(|m| {
                let pair = TradingPair::new(m.market.as_str());
                (pair.clone(), TradingRule::from_market(pair, m))
            })
            .collect();
        info!("Loaded {} markets", rules.len());
        *self.shared.symbols.write() = symbols;
        *self.shared.rules.write() = rules;
        Ok(())
    }

    pub fn trading_rule(&self, pair: &TradingPair) -> Result<TradingRule> {
        let market = self.market_for(pair)?;
        self.shared
            .rules
            .read()
            .get(&market)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no trading rule for {}", pair)))
    }

    /// Connect streams, seed books and start the polling loop.
    pub async fn start(&self) -> Result<()> {
        self.refresh_markets().await?;
        let main = self.shared.main_account().await?;

        let mut session = Session::open(&self.streams, &self.config.stream).await?;
        session
            .register(Channel::User(main), Arc::new(UserHandler::new(self.shared.clone())))
            .await?;

        for local in &self.config.exchange.trading_pairs {
            let market = self.market_for(&TradingPair::new(local.as_str()))?;
            session
                .register(
                    Channel::RecentTrades(market.clone()),
                    Arc::new(TradeHandler::new(self.shared.clone())),
                )
                .await?;
            session
                .register(
                    Channel::OrderBookIncrement(market.clone()),
                    Arc::new(DiffHandler::new(self.shared.clone())),
                )
                .await?;
            let sequence = self.shared.seed(&market).await?;
            info!("Seeded {} book at seq {}", market, sequence);
        }
        *self.session.lock().await = Some(session);
        self.shared.sync.refresh_balances(&self.shared.api, &main).await?;

        let shared = self.shared.clone();
        let interval = self.config.sync.poll_interval();
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.poll_once().await;
            }
        });
        *self.poller.lock() = Some(poller);
        info!("Connector started");
        Ok(())
    }

    /// Resolves when the stream session ends on its own, or once
    /// `shutdown` has taken it down.
    pub async fn closed(&self) -> Result<()> {
        let Some(mut finished) = self.session.lock().await.as_ref().map(Session::finished) else {
            return Ok(());
        };
        // A dropped sender means the delivery task is gone as well.
        let _ = finished.wait_for(|done| *done).await;
        match self.session.lock().await.as_mut() {
            Some(session) => session.closed().await,
            None => Ok(()),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
        let session = self.session.lock().await.take();
        match session {
            Some(session) => session.shutdown().await,
            None => Ok(()),
        }
    }

    /// One reconciliation pass (also run periodically after `start`).
    pub async fn poll(&self) {
        self.shared.poll_once().await;
    }

    pub async fn place_order(
        &self,
        pair: &TradingPair,
        side: Side,
        order_type: OrderType,
        amount: Decimal,
        price: Decimal,
    ) -> Result<PlaceOutcome> {
        let market = self.market_for(pair)?;
        let rule = self.shared.rules.read().get(&market).cloned();
        let (price, amount) = match rule {
            Some(rule) => rule.apply(price, amount, order_type == OrderType::Market)?,
            None => (price, amount),
        };

        let intent = OrderIntent {
            client_order_id: self.new_client_order_id(),
            trading_pair: market,
            side,
            order_type,
            price,
            quantity: amount,
            created_at: now_secs(),
        };
        let cid = intent.client_order_id.clone();
        self.shared.sync.submit_pending(&intent);

        let signed = async {
            let main = self.shared.main_account().await?;
            let record = build_order_record(&intent, &self.shared.signer.account_id(), &main)?;
            let signature = self.shared.signer.sign(&encode(&record))?;
            Ok::<_, Error>((record, signature))
        }
        .await;
        let (record, signature) = match signed {
            Ok(signed) => signed,
            Err(e) => {
                warn!("Order {} not sent: {}", cid, e);
                self.shared.sync.fail_order(&cid);
                self.shared.publish_order(&cid);
                return Err(e);
            }
        };

        match self.shared.api.place_order(&record, &signature).await {
            Ok(exchange_order_id) => {
                match self.shared.sync.on_remote_confirmation(&cid, &exchange_order_id, now_millis()) {
                    Ok(_) => self.shared.publish_order(&cid),
                    // A push event may already have finished it.
                    Err(Error::NotFound(_)) => debug!("{} finished before its confirmation", cid),
                    Err(e) => return Err(e),
                }
                Ok(PlaceOutcome::Confirmed { client_order_id: cid, exchange_order_id })
            }
            Err(Error::TransportRejected(reason)) => {
                warn!("Order {} rejected: {}", cid, reason);
                Err(Error::TransportRejected(reason))
            }
            Err(e) => {
                warn!("Order {} outcome unknown, leaving it to polling: {}", cid, e);
                Ok(PlaceOutcome::Pending { client_order_id: cid })
            }
        }
    }

    /// `Ok(true)` when the exchange accepted the cancellation.
    pub async fn cancel_order(&self, client_order_id: &str) -> Result<bool> {
        let order = self
            .shared
            .sync
            .get_order(client_order_id)
            .ok_or_else(|| Error::NotFound(format!("unknown order {}", client_order_id)))?;
        if order.is_done() {
            debug!("{} already {:?}, nothing to cancel", client_order_id, order.state);
            return Ok(false);
        }
        let exchange_order_id = order
            .exchange_order_id
            .ok_or_else(|| Error::InvalidState(format!("{} has no exchange id yet", client_order_id)))?;

        let pair = PairAssets::from_pair(&order.trading_pair)?;
        let signature = self.shared.signer.sign(&build_cancel_record(&exchange_order_id)?)?;
        let accepted = self
            .shared
            .api
            .cancel_order(&exchange_order_id, &self.shared.signer.account_id(), &pair, &signature)
            .await?;
        info!("Cancel {} ({}) accepted={}", client_order_id, exchange_order_id, accepted);
        Ok(accepted)
    }

    pub async fn last_traded_price(&self, pair: &TradingPair) -> Result<Option<Decimal>> {
        let market = self.market_for(pair)?;
        let trades = self.shared.api.recent_trades(&market, 1).await?;
        Ok(trades.first().map(|t| t.price))
    }

    pub fn order_book(&self, pair: &TradingPair) -> Result<Option<BookView>> {
        let market = self.market_for(pair)?;
        Ok(self.shared.books.read().book(&market))
    }

    fn market_for(&self, local: &TradingPair) -> Result<TradingPair> {
        self.shared.symbols.read().to_remote(local).cloned()
    }

    fn new_client_order_id(&self) -> String {
        let mut id = format!("{}{}", self.config.exchange.client_order_id_prefix, Uuid::new_v4().simple());
        id.truncate(CLIENT_ORDER_ID_MAX_LEN);
        id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::{OrderRecord, UNIT_BALANCE};
    use crate::exchange::{
        IdentityResolver, MarketInfo, MarketMetadata, OrderBookSnapshot, OrderEvent, RemoteBalance, RemoteTrade,
    };
    use crate::feeds::multiplexer::tests::FakeConnector;
    use crate::orderbook::BookLevel;
    use crate::core::OrderState;
    use crate::signer::{Ed25519Signer, MultiSignature};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    /// Scripted exchange backend.
    #[derive(Default)]
    pub(crate) struct FakeExchange {
        pub place: Mutex<Vec<Result<String>>>,
        pub placed: Mutex<Vec<OrderRecord>>,
        pub cancelled: Mutex<Vec<String>>,
        pub orders: Mutex<HashMap<String, OrderEvent>>,
        pub snapshots: Mutex<Vec<OrderBookSnapshot>>,
        pub snapshot_calls: Mutex<u32>,
    }

    #[async_trait]
    impl IdentityResolver for FakeExchange {
        async fn resolve_main_account(&self, _proxy: &AccountId) -> Result<AccountId> {
            Ok(AccountId([9; 32]))
        }
    }

    #[async_trait]
    impl MarketMetadata for FakeExchange {
        async fn list_markets(&self) -> Result<Vec<MarketInfo>> {
            Ok(vec![MarketInfo {
                market: "PDEX-1".into(),
                max_order_qty: None,
                max_price: None,
                min_order_qty: Some(Decimal::from(UNIT_BALANCE)),
                min_price: None,
                price_tick_size: Some(Decimal::from(UNIT_BALANCE) / dec!(100)),
                qty_step_size: Some(Decimal::from(UNIT_BALANCE) / dec!(10)),
                quote_asset_precision: None,
            }])
        }
    }

    #[async_trait]
    impl ExchangeApi for FakeExchange {
        async fn place_order(&self, record: &OrderRecord, _signature: &MultiSignature) -> Result<String> {
            self.placed.lock().push(record.clone());
            self.place.lock().pop().unwrap_or_else(|| Ok("42".into()))
        }

        async fn cancel_order(
            &self,
            exchange_order_id: &str,
            _proxy: &AccountId,
            _pair: &PairAssets,
            _signature: &MultiSignature,
        ) -> Result<bool> {
            self.cancelled.lock().push(exchange_order_id.to_string());
            Ok(true)
        }

        async fn find_order(&self, _main: &AccountId, _market: &TradingPair, id: &str) -> Result<OrderEvent> {
            self.orders
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| Error::NotFound(id.to_string()))
        }

        async fn all_balances(&self, _main: &AccountId) -> Result<Vec<RemoteBalance>> {
            Ok(vec![RemoteBalance { asset: "PDEX".into(), free: Decimal::from(UNIT_BALANCE), reserved: dec!(0) }])
        }

        async fn orderbook_snapshot(&self, _market: &TradingPair) -> Result<OrderBookSnapshot> {
            *self.snapshot_calls.lock() += 1;
            Ok(self.snapshots.lock().pop().unwrap_or(OrderBookSnapshot {
                levels: vec![BookLevel { side: Side::Ask, price: dec!(11), quantity: dec!(1) }],
                sequence: 0,
            }))
        }

        async fn recent_trades(&self, _market: &TradingPair, _limit: u32) -> Result<Vec<RemoteTrade>> {
            Ok(vec![RemoteTrade { price: dec!(1.25), quantity: dec!(3), timestamp: Some(1) }])
        }
    }

    pub(crate) fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.exchange.trading_pairs = vec!["PDEX-USDT".into()];
        config.exchange.asset_aliases = HashMap::from([("1".to_string(), "USDT".to_string())]);
        config.exchange.client_order_id_prefix = "ALPH".into();
        config
    }

    pub(crate) type TestConnector = Connector<FakeExchange, Ed25519Signer, FakeConnector>;

    pub(crate) fn connector(api: FakeExchange) -> (TestConnector, tokio::sync::mpsc::UnboundedSender<crate::feeds::Frame>) {
        let (streams, frames) = FakeConnector::new();
        let connector = Connector::new(api, Ed25519Signer::from_seed([7; 32]), streams, test_config());
        (connector, frames)
    }

    fn usdt() -> TradingPair {
        TradingPair::new("PDEX-USDT")
    }

    #[tokio::test]
    async fn test_place_order_confirmed() {
        let (c, _frames) = connector(FakeExchange::default());
        c.refresh_markets().await.unwrap();
        let mut events = c.subscribe();

        let outcome = c
            .place_order(&usdt(), Side::Bid, OrderType::Limit, dec!(1000), dec!(1.00))
            .await
            .unwrap();
        let cid = outcome.client_order_id().to_string();
        assert!(cid.starts_with("ALPH"));
        assert_eq!(cid.len(), CLIENT_ORDER_ID_MAX_LEN);
        assert_eq!(outcome, PlaceOutcome::Confirmed { client_order_id: cid.clone(), exchange_order_id: "42".into() });

        let placed = c.shared.api.placed.lock()[0].clone();
        assert_eq!(placed.pair, PairAssets::from_pair(&TradingPair::new("PDEX-1")).unwrap());
        assert_eq!(placed.main_account, AccountId([9; 32]));

        let order = c.sync().get_order(&cid).unwrap();
        assert_eq!(order.state, OrderState::Open);
        match events.recv().await.unwrap() {
            ConnectorEvent::Order(o) => assert_eq!(o.trading_pair, usdt()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_place_order_quantizes_and_rejects_dust() {
        let (c, _frames) = connector(FakeExchange::default());
        c.refresh_markets().await.unwrap();

        c.place_order(&usdt(), Side::Ask, OrderType::Limit, dec!(2.37), dec!(1.239))
            .await
            .unwrap();
        let order = c.sync().active_orders().pop().unwrap();
        assert_eq!(order.amount, dec!(2.3));
        assert_eq!(order.price, dec!(1.23));

        let err = c
            .place_order(&usdt(), Side::Ask, OrderType::Limit, dec!(0.5), dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(matches!(
            c.place_order(&TradingPair::new("PDEX-DOT"), Side::Ask, OrderType::Limit, dec!(5), dec!(1)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejection_keeps_order_tracked_and_network_error_is_pending() {
        let api = FakeExchange::default();
        api.place.lock().push(Err(Error::WebSocket("connection reset".into())));
        api.place.lock().push(Err(Error::TransportRejected("Invalid signature".into())));
        let (c, _frames) = connector(api);
        c.refresh_markets().await.unwrap();

        let err = c
            .place_order(&usdt(), Side::Bid, OrderType::Limit, dec!(5), dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportRejected(_)));
        let tracked = c.sync().active_orders();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].state, OrderState::PendingCreate);

        let outcome = c
            .place_order(&usdt(), Side::Bid, OrderType::Limit, dec!(5), dec!(1))
            .await
            .unwrap();
        assert!(matches!(outcome, PlaceOutcome::Pending { .. }));
        assert_eq!(c.sync().active_orders().len(), 2);
    }

    #[tokio::test]
    async fn test_codec_failure_marks_failed() {
        let (c, _frames) = connector(FakeExchange::default());
        c.refresh_markets().await.unwrap();
        let err = c
            .place_order(&usdt(), Side::Bid, OrderType::StopLoss, dec!(5), dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
        assert!(c.sync().active_orders().is_empty());
        assert_eq!(c.sync().completed_orders()[0].state, OrderState::Failed);
        assert!(c.shared.api.placed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let (c, _frames) = connector(FakeExchange::default());
        c.refresh_markets().await.unwrap();
        let outcome = c
            .place_order(&usdt(), Side::Bid, OrderType::Limit, dec!(5), dec!(1))
            .await
            .unwrap();
        assert!(c.cancel_order(outcome.client_order_id()).await.unwrap());
        assert_eq!(*c.shared.api.cancelled.lock(), vec!["42".to_string()]);
        assert!(matches!(c.cancel_order("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_without_exchange_id() {
        let api = FakeExchange::default();
        api.place.lock().push(Err(Error::WebSocket("reset".into())));
        let (c, _frames) = connector(api);
        c.refresh_markets().await.unwrap();
        let outcome = c
            .place_order(&usdt(), Side::Bid, OrderType::Limit, dec!(5), dec!(1))
            .await
            .unwrap();
        assert!(matches!(c.cancel_order(outcome.client_order_id()).await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_poll_settles_order_and_refreshes_balances() {
        let (c, _frames) = connector(FakeExchange::default());
        c.refresh_markets().await.unwrap();
        let outcome = c
            .place_order(&usdt(), Side::Bid, OrderType::Limit, dec!(5), dec!(1))
            .await
            .unwrap();
        let unit = Decimal::from(UNIT_BALANCE);
        c.shared.api.orders.lock().insert(
            "42".into(),
            OrderEvent {
                client_order_id: Some(outcome.client_order_id().to_string()),
                exchange_order_id: Some("42".into()),
                status: "CLOSED".into(),
                side: Some("Bid".into()),
                pair: None,
                market: Some("PDEX-1".into()),
                filled_quantity: dec!(5) * unit,
                avg_filled_price: unit,
                fee: dec!(0.01) * unit,
                timestamp: Some(5),
                event_id: None,
            },
        );
        let mut events = c.subscribe();
        c.poll().await;

        match events.recv().await.unwrap() {
            ConnectorEvent::Fill(fill) => {
                assert_eq!(fill.fill_base_amount, dec!(5));
                assert_eq!(fill.trading_pair, usdt());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(c.sync().get_order(outcome.client_order_id()).unwrap().state, OrderState::Filled);
        assert_eq!(c.sync().balance("PDEX").unwrap().free, dec!(1));
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_for_close() {
        let (c, _frames) = connector(FakeExchange::default());
        c.start().await.unwrap();

        let (closed, shut) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(c.closed(), async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                c.shutdown().await
            })
        })
        .await
        .unwrap();
        closed.unwrap();
        shut.unwrap();
        assert!(c.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_seed_keeps_newer_book() {
        let (c, _frames) = connector(FakeExchange::default());
        let market = TradingPair::new("PDEX-1");
        c.shared.api.snapshots.lock().push(OrderBookSnapshot {
            levels: vec![BookLevel { side: Side::Bid, price: dec!(9), quantity: dec!(2) }],
            sequence: 7,
        });
        c.shared.resnapshot(&market).await.unwrap();

        c.shared.api.snapshots.lock().push(OrderBookSnapshot {
            levels: vec![BookLevel { side: Side::Bid, price: dec!(8), quantity: dec!(1) }],
            sequence: 3,
        });
        assert_eq!(c.shared.seed(&market).await.unwrap(), 7);
        let book = c.shared.books.read().book(&market).unwrap();
        assert_eq!(book.level(Side::Bid, dec!(9)), Some(dec!(2)));
        assert_eq!(book.level(Side::Bid, dec!(8)), None);
        assert_eq!(c.shared.baselines.lock().get(&market), Some(&7));

        // An empty book takes the seed.
        let other = TradingPair::new("PDEX-2");
        assert_eq!(c.shared.seed(&other).await.unwrap(), 0);
        assert_eq!(c.shared.books.read().last_sequence(&other), Some(0));
    }

    #[tokio::test]
    async fn test_last_traded_price() {
        let (c, _frames) = connector(FakeExchange::default());
        c.refresh_markets().await.unwrap();
        assert_eq!(c.last_traded_price(&usdt()).await.unwrap(), Some(dec!(1.25)));
        assert_eq!(c.trading_rule(&usdt()).unwrap().min_price_increment, dec!(0.01));
    }
}
