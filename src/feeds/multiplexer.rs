//! One physical stream connection, many logical channels.
//!
//! A single delivery task owns the connection and routes every inbound
//! envelope by channel name into a bounded per-channel queue. Each
//! registered handler drains its own queue in its own task, so a slow or
//! failing handler never stalls the delivery loop or its siblings.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::channels::Channel;
use crate::core::config::StreamConfig;
use crate::core::{Error, Result};

/// One inbound data message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: String,
    pub payload: Value,
}

/// What a connection yields on each read
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data(Envelope),
    /// Liveness only (keep-alive, acks)
    KeepAlive,
    Closed,
}

#[async_trait]
pub trait StreamConnection: Send + 'static {
    async fn subscribe(&mut self, channel: &str) -> Result<()>;
    async fn recv(&mut self) -> Result<Frame>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait StreamConnector: Send + Sync {
    type Connection: StreamConnection;
    async fn connect(&self) -> Result<Self::Connection>;
}

/// Consumer of one channel's payloads. An `Err` ends this channel's task only.
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    async fn handle(&self, channel: &Channel, payload: Value) -> Result<()>;

    /// Called after `dropped` envelopes were discarded because this
    /// channel's queue was full.
    async fn lagged(&self, channel: &Channel, dropped: u64) -> Result<()> {
        warn!("{} lost {} envelopes to a full queue", channel, dropped);
        Ok(())
    }
}

enum Command {
    Subscribe {
        name: String,
        route: Route,
        ack: oneshot::Sender<Result<()>>,
    },
}

/// Delivery side of one channel's queue.
struct Route {
    queue: mpsc::Sender<Value>,
    dropped: Arc<AtomicU64>,
}

pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    finished: watch::Receiver<bool>,
    delivery: Option<JoinHandle<Result<()>>>,
    listeners: Vec<(Channel, JoinHandle<()>)>,
    buffer: usize,
}

impl Session {
    /// Connect and start the delivery loop.
    pub async fn open<C: StreamConnector>(connector: &C, config: &StreamConfig) -> Result<Self> {
        let conn = connector.connect().await?;
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (finished_tx, finished) = watch::channel(false);
        let delivery = tokio::spawn(deliver(conn, commands_rx, shutdown_rx, finished_tx, config.idle_timeout()));
        info!("Stream session opened");
        Ok(Self {
            commands,
            shutdown,
            finished,
            delivery: Some(delivery),
            listeners: Vec::new(),
            buffer: config.channel_buffer.max(1),
        })
    }

    /// Subscribe `channel` and start a listener task feeding `handler`.
    pub async fn register(&mut self, channel: Channel, handler: Arc<dyn ChannelHandler>) -> Result<AbortHandle> {
        let (queue, mut rx) = mpsc::channel::<Value>(self.buffer);
        let dropped = Arc::new(AtomicU64::new(0));
        let route = Route { queue, dropped: dropped.clone() };
        let (ack, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { name: channel.name(), route, ack })
            .map_err(|_| Error::WebSocket("session is closed".into()))?;
        ack_rx
            .await
            .map_err(|_| Error::WebSocket("session closed during subscribe".into()))??;

        let mut shutdown = self.shutdown.subscribe();
        let task_channel = channel.clone();
        let task = tokio::spawn(async move {
            loop {
                // Queued payloads are drained before a shutdown is noticed.
                tokio::select! {
                    biased;
                    payload = rx.recv() => {
                        let Some(payload) = payload else { break };
                        let mut result = handler.handle(&task_channel, payload).await;
                        // Drops only happen while the queue is full, so they
                        // are always seen after the next queued payload.
                        let missed = dropped.swap(0, Ordering::Relaxed);
                        if result.is_ok() && missed > 0 {
                            result = handler.lagged(&task_channel, missed).await;
                        }
                        if let Err(e) = result {
                            warn!("Handler for {} failed, stopping its listener: {}", task_channel, e);
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Listener for {} finished", task_channel);
        });

        debug!("Registered {}", channel);
        let abort = task.abort_handle();
        self.listeners.push((channel, task));
        Ok(abort)
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.listeners.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.delivery.as_ref().is_none_or(|d| d.is_finished())
    }

    /// Flips to `true` once the connection has been released. Lets callers
    /// wait for the end of the session without borrowing it.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished.clone()
    }

    /// Wait until the connection ends (remote close, idle timeout or
    /// transport error), then stop every listener.
    ///
    /// Cancel safe: task handles are only released once they completed.
    pub async fn closed(&mut self) -> Result<()> {
        let outcome = match self.delivery.as_mut() {
            Some(delivery) => {
                let joined = delivery.await;
                self.delivery = None;
                joined.unwrap_or_else(|e| Err(Error::InvalidState(format!("delivery task: {}", e))))
            }
            None => Ok(()),
        };
        self.stop_listeners().await;
        outcome
    }

    /// Cancel everything and wait for all tasks to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.closed().await
    }

    async fn stop_listeners(&mut self) {
        let _ = self.shutdown.send(true);
        if self.listeners.is_empty() {
            return;
        }
        while let Some((channel, task)) = self.listeners.last_mut() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Listener for {} ended abnormally: {}", channel, e);
                }
            }
            self.listeners.pop();
        }
        info!("Stream session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(delivery) = &self.delivery {
            delivery.abort();
        }
        for (_, task) in &self.listeners {
            task.abort();
        }
    }
}

async fn deliver<C: StreamConnection>(
    mut conn: C,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
    finished: watch::Sender<bool>,
    idle_timeout: Duration,
) -> Result<()> {
    let mut routes: HashMap<String, Route> = HashMap::new();

    let outcome = loop {
        tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            Some(cmd) = commands.recv() => match cmd {
                Command::Subscribe { name, route, ack } => {
                    let result = conn.subscribe(&name).await;
                    if result.is_ok() {
                        routes.insert(name, route);
                    }
                    let _ = ack.send(result);
                }
            },
            frame = tokio::time::timeout(idle_timeout, conn.recv()) => match frame {
                Err(_) => break Err(Error::Timeout(format!("no stream traffic for {:?}", idle_timeout))),
                Ok(Err(Error::Decode(e))) => warn!("Skipping undecodable stream frame: {}", e),
                Ok(Err(e)) => break Err(e),
                Ok(Ok(Frame::Closed)) => {
                    info!("Stream closed by remote");
                    break Ok(());
                }
                Ok(Ok(Frame::KeepAlive)) => {}
                Ok(Ok(Frame::Data(envelope))) => route(&mut routes, envelope),
            },
        }
    };

    if let Err(e) = conn.close().await {
        debug!("Error closing stream: {}", e);
    }
    let _ = finished.send(true);
    outcome
}

fn route(routes: &mut HashMap<String, Route>, envelope: Envelope) {
    let Some(route) = routes.get(&envelope.channel) else {
        warn!("Dropping envelope for unregistered channel {}", envelope.channel);
        return;
    };
    match route.queue.try_send(envelope.payload) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Queue for {} is full, dropping envelope", envelope.channel);
            route.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("Listener for {} is gone, unrouting it", envelope.channel);
            routes.remove(&envelope.channel);
        }
    }
}
