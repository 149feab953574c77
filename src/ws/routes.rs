//! WebSocket upgrade handlers (C19, spec §6 "Client socket interface").
//!
//! Four fixed paths, one per channel. Auth is an optional `?token=` query
//! param checked against `WS_AUTH_TOKEN` (disabled entirely when that's
//! empty, matching the source's "no token configured -> no auth" behavior).
//! Concurrent connections per IP are capped independently of the HTTP
//! sliding-window limiter in `middleware::rate_limit` — that one throttles
//! request *rate*, this one caps simultaneous *connections*.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::processor::Channel;
use crate::ws::connection_manager::ConnectionManager;
use crate::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Tracks how many sockets are currently open per client IP, for the
/// per-channel connection-count cap.
#[derive(Default)]
pub struct IpConnectionTracker {
    counts: Mutex<HashMap<IpAddr, usize>>,
}

impl IpConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and reserves a slot if under the cap.
    fn try_acquire(&self, ip: IpAddr, max: usize) -> bool {
        let mut counts = self.counts.lock();
        let entry = counts.entry(ip).or_insert(0);
        if *entry >= max {
            return false;
        }
        *entry += 1;
        true
    }

    fn release(&self, ip: IpAddr) {
        let mut counts = self.counts.lock();
        if let Some(entry) = counts.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                counts.remove(&ip);
            }
        }
    }
}

fn check_auth(state: &AppState, query: &WsQuery) -> bool {
    if state.config.ws_auth_token.is_empty() {
        return true;
    }
    query.token.as_deref() == Some(state.config.ws_auth_token.as_str())
}

pub async fn market_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let mgr = state.managers.market.clone();
    upgrade(ws, addr, query, state.clone(), mgr, Channel::Market)
}

pub async fn foreign_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let mgr = state.managers.foreign.clone();
    upgrade(ws, addr, query, state.clone(), mgr, Channel::Foreign)
}

pub async fn index_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let mgr = state.managers.index.clone();
    upgrade(ws, addr, query, state.clone(), mgr, Channel::Index)
}

pub async fn alerts_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let mgr = state.managers.alerts.clone();
    upgrade(ws, addr, query, state.clone(), mgr, Channel::Alerts)
}

fn upgrade(
    ws: WebSocketUpgrade,
    addr: SocketAddr,
    query: WsQuery,
    state: AppState,
    manager: Arc<ConnectionManager>,
    channel: Channel,
) -> Response {
    if !check_auth(&state, &query) {
        return (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response();
    }
    let ip = addr.ip();
    if !state
        .ip_connections
        .try_acquire(ip, state.config.ws_max_connections_per_ip)
    {
        return (StatusCode::TOO_MANY_REQUESTS, "too many connections from this address")
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, manager, channel, ip))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    manager: Arc<ConnectionManager>,
    channel: Channel,
    ip: IpAddr,
) {
    let (sink, mut stream) = socket.split();
    let client_id = manager.connect(sink);
    debug!(?channel, %client_id, %ip, "websocket client connected");

    // Send an initial full snapshot so the client isn't empty before the
    // next throttled broadcast fires.
    send_initial_snapshot(&state, &manager, channel, client_id);

    let heartbeat_interval = Duration::from_secs(state.config.ws_heartbeat_interval_secs);
    let mut heartbeat = tokio::time::interval(heartbeat_interval);

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // client messages are not part of this protocol
                    Some(Err(err)) => {
                        warn!(%err, "websocket receive error");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                manager.ping_client(client_id);
            }
        }
    }

    manager.disconnect(client_id);
    state.ip_connections.release(ip);
    debug!(?channel, %client_id, "websocket client disconnected");
}

fn send_initial_snapshot(
    state: &AppState,
    manager: &Arc<ConnectionManager>,
    channel: Channel,
    client_id: uuid::Uuid,
) {
    let payload = match channel {
        Channel::Market => serde_json::to_string(&state.processor.lock().market_snapshot()),
        Channel::Foreign => {
            serde_json::to_string(&state.processor.lock().foreign_tracker.get_summary())
        }
        Channel::Index => {
            serde_json::to_string(&state.processor.lock().index_tracker.get_all().clone())
        }
        Channel::Alerts => serde_json::to_string(
            &state.processor.lock().alert_service.get_recent_alerts(50, None, None),
        ),
    };
    if let Ok(body) = payload {
        manager.send_to(client_id, body);
    }
}
