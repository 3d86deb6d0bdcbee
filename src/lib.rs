//! AlephTX Polkadex connector - Core Library
//! Signed order placement, multiplexed streams and order/balance sync

// Public modules
pub mod codec;
pub mod connector;
pub mod core;
pub mod exchange;
pub mod execution;
pub mod feeds;
pub mod orderbook;
pub mod signer;

// Re-exports
pub use connector::{Connector, ConnectorEvent, PlaceOutcome};
pub use core::{AppConfig, Error, Result};
