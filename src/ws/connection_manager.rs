//! Connection Manager (C13, spec §4.12).
//!
//! Per channel: a table of clients, each with a bounded outbound queue (cap
//! 50) and a dedicated sender task. `broadcast` pushes onto every client's
//! queue and drops the oldest entry on overflow rather than blocking or
//! dropping the new one — the newest state always wins a spot.
//!
//! Rate limiting (at most N concurrent connections per IP) and the optional
//! bearer-token check live in `ws::routes`, which owns the upgrade lifecycle;
//! this module only deals with already-accepted sockets.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// One outbound frame queued for a client. Pings bypass the text backlog so
/// a burst of broadcasts can't starve the heartbeat.
enum QueueItem {
    Text(String),
    Ping,
}

struct ClientQueue {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    capacity: usize,
}

impl ClientQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Push one text frame, dropping the oldest text frame if already at
    /// capacity.
    fn push_text(&self, data: String) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            items.pop_front();
            warn!("client outbound queue full, dropped oldest frame");
        }
        items.push_back(QueueItem::Text(data));
        drop(items);
        self.notify.notify_one();
    }

    fn push_ping(&self) {
        let mut items = self.items.lock();
        items.push_back(QueueItem::Ping);
        drop(items);
        self.notify.notify_one();
    }

    fn drain(&self) -> Vec<QueueItem> {
        let mut items = self.items.lock();
        items.drain(..).collect()
    }
}

struct ClientEntry {
    queue: Arc<ClientQueue>,
    sender_task: tokio::task::JoinHandle<()>,
}

/// Manages the set of connected clients for a single channel.
pub struct ConnectionManager {
    channel_name: &'static str,
    queue_capacity: usize,
    send_timeout: Duration,
    clients: Mutex<HashMap<Uuid, ClientEntry>>,
}

impl ConnectionManager {
    pub fn new(channel_name: &'static str, queue_capacity: usize) -> Self {
        Self::with_send_timeout(channel_name, queue_capacity, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(
        channel_name: &'static str,
        queue_capacity: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            channel_name,
            queue_capacity,
            send_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Accepts an already-upgraded socket's sink half, wires a bounded queue
    /// and a dedicated sender task, and registers the client. Returns the
    /// client id, used later to `disconnect`.
    ///
    /// A send that doesn't complete within `send_timeout` (the slow-consumer
    /// case — a client that stopped reading but never closed the socket)
    /// ends the sender task and drops the client, mirroring the source's
    /// `asyncio.wait_for`-guarded heartbeat send.
    pub fn connect(self: &Arc<Self>, mut sink: SplitSink<WebSocket, Message>) -> Uuid {
        let id = Uuid::new_v4();
        let queue = Arc::new(ClientQueue::new(self.queue_capacity));
        let queue_for_task = queue.clone();
        let channel_name = self.channel_name;
        let send_timeout = self.send_timeout;
        let manager = self.clone();
        let client_id = id;

        let sender_task = tokio::spawn(async move {
            loop {
                queue_for_task.notify.notified().await;
                for item in queue_for_task.drain() {
                    let frame = match item {
                        QueueItem::Text(data) => Message::Text(data),
                        QueueItem::Ping => Message::Ping(Vec::new()),
                    };
                    match tokio::time::timeout(send_timeout, sink.send(frame)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => {
                            manager.disconnect(client_id);
                            return;
                        }
                        Err(_) => {
                            warn!(
                                channel = channel_name,
                                timeout_secs = send_timeout.as_secs(),
                                "client send timed out, disconnecting"
                            );
                            manager.disconnect(client_id);
                            return;
                        }
                    }
                    metrics::counter!("ws_messages_sent_total", "channel" => channel_name)
                        .increment(1);
                }
            }
        });

        self.clients.lock().insert(
            id,
            ClientEntry {
                queue,
                sender_task,
            },
        );
        gauge!("ws_connections_active", "channel" => self.channel_name)
            .set(self.clients.lock().len() as f64);
        id
    }

    /// Push `data` onto every connected client's queue.
    pub fn broadcast(&self, data: String) {
        let clients = self.clients.lock();
        for entry in clients.values() {
            entry.queue.push_text(data.clone());
        }
    }

    /// Push `data` onto a single client's queue (used for the initial
    /// post-connect snapshot).
    pub fn send_to(&self, id: Uuid, data: String) {
        if let Some(entry) = self.clients.lock().get(&id) {
            entry.queue.push_text(data);
        }
    }

    /// Queue a heartbeat ping for a single client.
    pub fn ping_client(&self, id: Uuid) {
        if let Some(entry) = self.clients.lock().get(&id) {
            entry.queue.push_ping();
        }
    }

    pub fn disconnect(&self, id: Uuid) {
        let mut clients = self.clients.lock();
        if let Some(entry) = clients.remove(&id) {
            entry.sender_task.abort();
        }
        gauge!("ws_connections_active", "channel" => self.channel_name)
            .set(clients.len() as f64);
    }

    pub fn disconnect_all(&self) {
        let mut clients = self.clients.lock();
        for (_, entry) in clients.drain() {
            entry.sender_task.abort();
        }
        gauge!("ws_connections_active", "channel" => self.channel_name).set(0.0);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

/// The four channel managers bundled together, handed to both the publisher
/// (for broadcasting state) and the stream supervisor (for broadcasting
/// connectivity status, which doesn't go through the publisher's throttle).
#[derive(Clone)]
pub struct ChannelManagers {
    pub market: Arc<ConnectionManager>,
    pub foreign: Arc<ConnectionManager>,
    pub index: Arc<ConnectionManager>,
    pub alerts: Arc<ConnectionManager>,
}

impl ChannelManagers {
    pub fn new() -> Self {
        Self::with_capacity_and_timeout(50, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self::with_capacity_and_timeout(queue_capacity, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_capacity_and_timeout(queue_capacity: usize, send_timeout: Duration) -> Self {
        Self {
            market: Arc::new(ConnectionManager::with_send_timeout("market", queue_capacity, send_timeout)),
            foreign: Arc::new(ConnectionManager::with_send_timeout("foreign", queue_capacity, send_timeout)),
            index: Arc::new(ConnectionManager::with_send_timeout("index", queue_capacity, send_timeout)),
            alerts: Arc::new(ConnectionManager::with_send_timeout("alerts", queue_capacity, send_timeout)),
        }
    }

    /// Broadcasts a `{"type":"status","connected":bool}` frame to every
    /// channel that currently has at least one connected client.
    pub fn broadcast_status(&self, connected: bool) {
        let payload = serde_json::json!({ "type": "status", "connected": connected }).to_string();
        for mgr in [&self.market, &self.foreign, &self.index, &self.alerts] {
            if mgr.client_count() > 0 {
                mgr.broadcast(payload.clone());
            }
        }
    }
}

impl Default for ChannelManagers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drops_oldest_entry_on_overflow() {
        let queue = ClientQueue::new(2);
        queue.push_text("a".to_string());
        queue.push_text("b".to_string());
        queue.push_text("c".to_string());
        let drained: Vec<String> = queue
            .drain()
            .into_iter()
            .map(|item| match item {
                QueueItem::Text(s) => s,
                QueueItem::Ping => "<ping>".to_string(),
            })
            .collect();
        assert_eq!(drained, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn empty_manager_has_zero_clients() {
        let mgr = ConnectionManager::new("market", 50);
        assert_eq!(mgr.client_count(), 0);
    }

    #[test]
    fn channel_managers_thread_a_custom_send_timeout() {
        let managers = ChannelManagers::with_capacity_and_timeout(10, Duration::from_secs(3));
        assert_eq!(managers.market.send_timeout, Duration::from_secs(3));
        assert_eq!(managers.market.queue_capacity, 10);
    }
}
