use tracing_subscriber::{EnvFilter, fmt};

use aleph_pdex::core::config::signing_seed_from_env;
use aleph_pdex::exchange::{GraphQlExchange, HttpTransport};
use aleph_pdex::feeds::AppSyncConnector;
use aleph_pdex::signer::{Ed25519Signer, Signer};
use aleph_pdex::{AppConfig, Connector, ConnectorEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,aleph_pdex=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!("AlephTX Polkadex connector starting...");

    let config = AppConfig::load_default();
    let api_key = config.api_key();

    let signer = Ed25519Signer::from_encoded(&signing_seed_from_env()?)?;
    tracing::info!("Trading identity {}", signer.address());

    let transport = HttpTransport::new(&config.exchange.graphql_endpoint, api_key.as_deref())?;
    let streams = AppSyncConnector::new(
        &config.exchange.websocket_endpoint,
        &config.exchange.graphql_endpoint,
        api_key,
    )?;

    let connector = Connector::new(GraphQlExchange::new(transport), signer, streams, config);
    let mut events = connector.subscribe();
    connector.start().await?;

    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConnectorEvent::Fill(fill)) => tracing::info!(
                    "Fill {} {} {} @ {} fee {} {}",
                    fill.client_order_id,
                    fill.trading_pair,
                    fill.fill_base_amount,
                    fill.fill_price,
                    fill.fee.amount,
                    fill.fee.asset
                ),
                Ok(ConnectorEvent::Order(order)) => {
                    tracing::info!("Order {} is {:?}", order.client_order_id, order.state)
                }
                Ok(ConnectorEvent::Trade(trade)) => {
                    tracing::debug!("Trade {} {} @ {}", trade.trading_pair, trade.quantity, trade.price)
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event reporter lagged by {} events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down..."),
        outcome = connector.closed() => match outcome {
            Ok(()) => tracing::warn!("Stream session ended"),
            Err(e) => tracing::error!("Stream session failed: {}", e),
        },
    }

    connector.shutdown().await?;
    reporter.abort();
    Ok(())
}
