//! Data Publisher (C12, spec §4.11).
//!
//! Sits between the orchestrator and the four `ConnectionManager`s. Each
//! channel gets a trailing-edge throttle: the first signal after a quiet
//! period broadcasts immediately, every signal arriving inside the window
//! schedules (at most) one deferred broadcast for when the window elapses.
//! Bursts of intermediate states are coalesced into that single deferred
//! send — nothing queues per-signal.
//!
//! `market`/`foreign`/`index` always broadcast freshly-read orchestrator
//! state, since their payload is "current state", not "the thing that
//! changed". `alerts` is the exception (spec §4.11): its payload is the
//! alert object itself, so a deferred alerts broadcast sends only the most
//! recently fired alert, not a re-read of the whole alert ring.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::processor::{Channel, Processor, PublishSignal};
use crate::ws::connection_manager::{ChannelManagers, ConnectionManager};

pub struct Publisher {
    processor: Arc<Mutex<Processor>>,
    managers: HashMap<Channel, Arc<ConnectionManager>>,
    throttle: Duration,
    last_broadcast: HashMap<Channel, Instant>,
    timer_scheduled: HashMap<Channel, bool>,
    pending_alert: Option<crate::models::Alert>,
    deferred_tx: UnboundedSender<Channel>,
    deferred_rx: UnboundedReceiver<Channel>,
}

impl Publisher {
    pub fn new(processor: Arc<Mutex<Processor>>, managers: &ChannelManagers, throttle: Duration) -> Self {
        let mut by_channel = HashMap::new();
        by_channel.insert(Channel::Market, managers.market.clone());
        by_channel.insert(Channel::Foreign, managers.foreign.clone());
        by_channel.insert(Channel::Index, managers.index.clone());
        by_channel.insert(Channel::Alerts, managers.alerts.clone());
        let (deferred_tx, deferred_rx) = tokio::sync::mpsc::unbounded_channel();

        Self {
            processor,
            managers: by_channel,
            throttle,
            last_broadcast: HashMap::new(),
            timer_scheduled: HashMap::new(),
            pending_alert: None,
            deferred_tx,
            deferred_rx,
        }
    }

    /// Drives the publisher until `signal_rx` closes (process shutdown).
    pub async fn run(mut self, mut signal_rx: UnboundedReceiver<PublishSignal>) {
        loop {
            tokio::select! {
                signal = signal_rx.recv() => {
                    match signal {
                        Some(PublishSignal::StateChanged(channel)) => self.on_tick(channel),
                        Some(PublishSignal::AlertFired(alert)) => {
                            self.pending_alert = Some(alert);
                            self.on_tick(Channel::Alerts);
                        }
                        None => break,
                    }
                }
                Some(channel) = self.deferred_rx.recv() => {
                    self.timer_scheduled.insert(channel, false);
                    self.broadcast_now(channel);
                }
            }
        }
    }

    fn on_tick(&mut self, channel: Channel) {
        if self.managers[&channel].client_count() == 0 {
            return;
        }

        let now = Instant::now();
        let elapsed = self.last_broadcast.get(&channel).map(|t| now.duration_since(*t));

        if elapsed.map_or(true, |e| e >= self.throttle) {
            self.broadcast_now(channel);
            return;
        }

        if !*self.timer_scheduled.get(&channel).unwrap_or(&false) {
            self.timer_scheduled.insert(channel, true);
            let remaining = self.throttle - elapsed.unwrap();
            let tx = self.deferred_tx.clone();
            debug!(?channel, ?remaining, "scheduling coalesced broadcast");
            tokio::spawn(async move {
                tokio::time::sleep(remaining).await;
                let _ = tx.send(channel);
            });
        }
    }

    fn broadcast_now(&mut self, channel: Channel) {
        let mgr = &self.managers[&channel];
        if mgr.client_count() == 0 {
            self.last_broadcast.insert(channel, Instant::now());
            return;
        }

        let payload = match channel {
            Channel::Market => {
                let snapshot = self.processor.lock().market_snapshot();
                serde_json::to_string(&snapshot)
            }
            Channel::Foreign => {
                let summary = self.processor.lock().foreign_tracker.get_summary();
                serde_json::to_string(&summary)
            }
            Channel::Index => {
                let indices = self.processor.lock().index_tracker.get_all().clone();
                serde_json::to_string(&indices)
            }
            Channel::Alerts => match self.pending_alert.take() {
                Some(alert) => serde_json::to_string(&alert),
                None => return,
            },
        };

        match payload {
            Ok(body) => {
                mgr.broadcast(body);
                self.last_broadcast.insert(channel, Instant::now());
            }
            Err(err) => {
                tracing::error!(?channel, %err, "failed to serialize publisher payload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::PersistRecord;
    use std::collections::HashSet;

    fn new_publisher() -> (Publisher, UnboundedSender<PublishSignal>) {
        let (ntx, nrx) = tokio::sync::mpsc::unbounded_channel::<PublishSignal>();
        let (ptx, _prx) = tokio::sync::mpsc::unbounded_channel::<PersistRecord>();
        let processor = Arc::new(Mutex::new(Processor::new(HashSet::new(), ntx.clone(), ptx)));
        let managers = ChannelManagers::new();
        let publisher = Publisher::new(processor, &managers, Duration::from_millis(500));
        drop(nrx);
        (publisher, ntx)
    }

    #[test]
    fn tick_with_zero_clients_is_a_noop() {
        let (mut publisher, _tx) = new_publisher();
        publisher.on_tick(Channel::Market);
        assert!(!publisher.last_broadcast.contains_key(&Channel::Market));
    }
}
