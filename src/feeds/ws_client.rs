//! WebSocket stream connector (AppSync real-time protocol)
//!
//! Handshake: `connection_init` -> `connection_ack`. Each channel is one
//! `start` subscription on `websocket_streams(name)`; `data` frames for it
//! come back tagged with the subscription id. `ka` frames are keep-alives.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use super::multiplexer::{Envelope, Frame, StreamConnection, StreamConnector};
use crate::core::{Error, Result};
use crate::exchange::graphql::API_KEY_HEADER;

const SUBSCRIPTION: &str = "subscription WebsocketStreamsMessage($name: String!) { websocket_streams(name: $name) { data } }";

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct AppSyncConnector {
    ws_url: String,
    /// Host of the GraphQL endpoint; part of every auth header.
    host: String,
    api_key: Option<String>,
}

impl AppSyncConnector {
    pub fn new(ws_url: &str, graphql_endpoint: &str, api_key: Option<String>) -> Result<Self> {
        let host = Url::parse(graphql_endpoint)
            .map_err(|e| Error::Config(format!("graphql endpoint: {}", e)))?
            .host_str()
            .ok_or_else(|| Error::Config(format!("graphql endpoint has no host: {}", graphql_endpoint)))?
            .to_string();
        Ok(Self { ws_url: ws_url.to_string(), host, api_key })
    }

    fn auth_header(&self) -> Value {
        let mut header = json!({ "host": self.host });
        if let Some(key) = &self.api_key {
            header[API_KEY_HEADER] = Value::String(key.clone());
        }
        header
    }

    /// `wss://...?header=<b64 auth>&payload=e30=`
    fn connect_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.ws_url).map_err(|e| Error::Config(format!("websocket endpoint: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("header", &BASE64.encode(self.auth_header().to_string()))
            .append_pair("payload", &BASE64.encode("{}"));
        Ok(url)
    }
}

#[async_trait]
impl StreamConnector for AppSyncConnector {
    type Connection = AppSyncConnection;

    async fn connect(&self) -> Result<AppSyncConnection> {
        let url = self.connect_url()?;
        info!("Connecting to stream endpoint {}", self.ws_url);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("graphql-ws"));

        let (mut ws, _) = connect_async(request).await.map_err(|e| Error::WebSocket(e.to_string()))?;

        ws.send(Message::Text(json!({ "type": "connection_init" }).to_string()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        tokio::time::timeout(ACK_TIMEOUT, wait_for_ack(&mut ws))
            .await
            .map_err(|_| Error::Timeout("stream connection_ack".into()))??;

        info!("Stream connected");
        Ok(AppSyncConnection { ws, auth: self.auth_header(), subscriptions: HashMap::new() })
    }
}

async fn wait_for_ack(ws: &mut WsStream) -> Result<()> {
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
        let Message::Text(text) = msg else { continue };
        let value: Value = serde_json::from_str(&text)?;
        match value.get("type").and_then(Value::as_str) {
            Some("connection_ack") => return Ok(()),
            Some("connection_error") => {
                return Err(Error::TransportRejected(format!("stream connection refused: {}", value)));
            }
            _ => trace!("Pre-ack frame: {}", text),
        }
    }
    Err(Error::WebSocket("closed before connection_ack".into()))
}

pub struct AppSyncConnection {
    ws: WsStream,
    auth: Value,
    /// subscription id -> channel name
    subscriptions: HashMap<String, String>,
}

impl AppSyncConnection {
    fn start_message(&self, id: &str, channel: &str) -> Value {
        let data = json!({ "query": SUBSCRIPTION, "variables": { "name": channel } });
        json!({
            "id": id,
            "type": "start",
            "payload": {
                "data": data.to_string(),
                "extensions": { "authorization": self.auth },
            },
        })
    }
}

#[async_trait]
impl StreamConnection for AppSyncConnection {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let msg = self.start_message(&id, channel);
        self.ws
            .send(Message::Text(msg.to_string()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        debug!("Subscribed {} as {}", channel, id);
        self.subscriptions.insert(id, channel.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Frame> {
        loop {
            let msg = match self.ws.next().await {
                None => return Ok(Frame::Closed),
                Some(Err(e)) => return Err(Error::WebSocket(e.to_string())),
                Some(Ok(msg)) => msg,
            };
            match msg {
                Message::Text(text) => return decode_frame(&text, &self.subscriptions),
                Message::Ping(data) => {
                    self.ws
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| Error::WebSocket(e.to_string()))?;
                    return Ok(Frame::KeepAlive);
                }
                Message::Close(_) => return Ok(Frame::Closed),
                _ => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        for id in self.subscriptions.keys() {
            let stop = json!({ "id": id, "type": "stop" }).to_string();
            if self.ws.send(Message::Text(stop)).await.is_err() {
                break;
            }
        }
        self.ws.close(None).await.map_err(|e| Error::WebSocket(e.to_string()))
    }
}

/// Interpret one text frame of the real-time protocol. Only a
/// `connection_error` is fatal; malformed frames are logged and skipped.
fn decode_frame(text: &str, subscriptions: &HashMap<String, String>) -> Result<Frame> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse stream frame: {} ({})", e, text);
            return Ok(Frame::KeepAlive);
        }
    };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "ka" | "start_ack" | "complete" | "connection_ack" => Ok(Frame::KeepAlive),
        "data" => {
            let id = value.get("id").and_then(Value::as_str).unwrap_or_default();
            let Some(channel) = subscriptions.get(id) else {
                warn!("Data for unknown subscription {}", id);
                return Ok(Frame::KeepAlive);
            };
            match value.pointer("/payload/data/websocket_streams/data") {
                Some(payload) => Ok(Frame::Data(Envelope { channel: channel.clone(), payload: payload.clone() })),
                None => {
                    warn!("Data frame for {} without websocket_streams: {}", channel, text);
                    Ok(Frame::KeepAlive)
                }
            }
        }
        "error" => {
            // Per-subscription errors leave the connection usable.
            let payload = value.get("payload").cloned().unwrap_or_default();
            warn!("Stream error frame: {}", payload);
            Ok(Frame::KeepAlive)
        }
        "connection_error" => Err(Error::WebSocket(format!("connection error: {}", text))),
        other => {
            debug!("Ignoring stream frame type {:?}", other);
            Ok(Frame::KeepAlive)
        }
    }
}
