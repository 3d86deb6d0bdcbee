//! Real-time feeds - one stream connection, many named channels

pub mod channels;
pub mod multiplexer;
pub mod ws_client;

pub use channels::Channel;
pub use multiplexer::{ChannelHandler, Envelope, Frame, Session, StreamConnection, StreamConnector};
pub use ws_client::AppSyncConnector;
