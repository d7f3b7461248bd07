//! Engine event fan-out over a broadcast channel. Sinks run as detached
//! tasks tailing their own receiver; a slow sink lags and drops instead
//! of back-pressuring the trading loop, and publishing never blocks.

use crate::domain::events::EngineEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Events buffered per receiver before a laggard starts losing the oldest
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Fire-and-forget: an event with no live subscribers is dropped
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Spawns the JSON log sink that dashboards and notifiers scrape.
    /// Runs until every publisher handle is dropped.
    pub fn spawn_log_sink(&self) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => info!("EVENT_JSON:{}", json),
                        Err(e) => warn!("event log sink: unserializable event ({}): {:?}", e, event),
                    },
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("event log sink lagged, dropped {} events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
