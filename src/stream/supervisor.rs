//! Stream Supervisor (C15, spec §4.14 + §5 "Concurrency & Resource Model").
//!
//! Owns the upstream WebSocket connection end to end: authenticate, connect,
//! demultiplex every frame through `ingest::parse_frame` into the processor,
//! and reconnect with exponential backoff on any failure. Runs as a single
//! always-retrying async task (`connect_async` + `tokio::select!`), the same
//! shape the source's `dome_websocket` client uses for its upstream feed —
//! there's no separate OS thread here, since tokio-tungstenite's client is
//! already non-blocking.
//!
//! A reconnect mid-session means the very next foreign-flow event carries
//! cumulative counters that look like they regressed (the upstream restarted
//! its own session counters); `ForeignTracker::update` already clamps that
//! to a zero delta rather than a huge negative outflow (spec §8's "reconnect
//! clamping" scenario), so no extra handling is needed here beyond letting
//! frames flow through normally after the new connection is up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use crate::ingest;
use crate::models::MarketEvent;
use crate::processor::Processor;
use crate::stream::auth::AuthClient;
use crate::ws::connection_manager::ChannelManagers;

const BASE_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct StreamSupervisor {
    auth: AuthClient,
    stream_url: String,
    processor: Arc<Mutex<Processor>>,
    managers: ChannelManagers,
    connected: Arc<AtomicBool>,
}

impl StreamSupervisor {
    pub fn new(
        auth: AuthClient,
        stream_url: String,
        processor: Arc<Mutex<Processor>>,
        managers: ChannelManagers,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            auth,
            stream_url,
            processor,
            managers,
            connected,
        }
    }

    /// Runs forever: authenticate, stream, reconcile on reconnect, back off
    /// on failure and retry. Never returns under normal operation.
    pub async fn run(&self) {
        let mut backoff = BASE_BACKOFF;
        let mut first_connection = true;

        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    info!("upstream stream ended gracefully, reconnecting");
                    backoff = BASE_BACKOFF;
                }
                Err(err) => {
                    error!(%err, "upstream stream failed");
                }
            }

            self.connected.store(false, Ordering::Relaxed);
            self.managers.broadcast_status(false);

            if !first_connection {
                warn!(?backoff, "backing off before reconnect attempt");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            first_connection = false;
        }
    }

    async fn connect_and_stream(&self) -> anyhow::Result<()> {
        let token = self.auth.fetch_token().await?;

        let mut request = self.stream_url.clone().into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {token}").parse()?);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        info!("connected to upstream market data stream");

        let (mut write, mut read) = ws_stream.split();

        // No explicit reconciliation step needed here: `ForeignTracker::update`
        // already clamps a cumulative-counter regression to a zero delta
        // (spec §8's reconnect-clamping scenario), which is exactly what a
        // fresh post-reconnect snapshot looks like to the tracker.
        self.connected.store(true, Ordering::Relaxed);
        self.managers.broadcast_status(true);

        while let Some(message) = read.next().await {
            match message? {
                WsMessage::Text(text) => self.handle_frame(&text),
                WsMessage::Ping(payload) => write.send(WsMessage::Pong(payload)).await?,
                WsMessage::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }

    fn handle_frame(&self, raw: &str) {
        for event in ingest::parse_frame(raw) {
            let channel = match &event {
                MarketEvent::Trade(_) => "trade",
                MarketEvent::Quote(_) => "quote",
                MarketEvent::Foreign(_) => "foreign",
                MarketEvent::Index(_) => "index",
                MarketEvent::Bar(_) => "bar",
            };
            metrics::counter!("upstream_messages_received_total", "channel" => channel).increment(1);

            let mut processor = self.processor.lock();
            match event {
                MarketEvent::Trade(trade) => {
                    processor.handle_trade(trade);
                }
                MarketEvent::Quote(quote) => processor.handle_quote(quote),
                MarketEvent::Foreign(foreign) => {
                    processor.handle_foreign(foreign);
                }
                MarketEvent::Index(index) => {
                    processor.handle_index(index);
                }
                MarketEvent::Bar(_) => {
                    // no consumer in this pipeline; see storage::db's note on candles_1m.
                }
            }
        }
    }
}
