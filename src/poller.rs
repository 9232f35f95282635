//! Polling ingestion.
//!
//! The poller scans the most recent messages of each watched channel on a
//! fixed interval and emits the ones it has not seen before. Its per-channel
//! watermark is the poll cursor; the engine never sees it.
//!
//! On the first successful poll of a channel the latest message is emitted,
//! unless the channel was registered with `skip_backlog`. Those channels only
//! have their watermark primed, so messages posted before startup are never
//! acted on.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    event::RelayEvent,
    message::{ChannelId, MessageId},
    platform::Ingestion,
};

pub struct Poller {
    ingestion: Arc<dyn Ingestion>,
    channels: Vec<ChannelId>,
    limit: usize,
    interval: Duration,
    skip_backlog: HashSet<ChannelId>,
    primed: HashSet<ChannelId>,
    watermarks: HashMap<ChannelId, MessageId>,
}

#[bon::bon]
impl Poller {
    #[builder]
    pub fn new(
        ingestion: Arc<dyn Ingestion>,
        channels: Vec<ChannelId>,
        #[builder(default = 1)] limit: usize,
        #[builder(default = Duration::from_secs(10))] interval: Duration,
        #[builder(default)] skip_backlog: Vec<ChannelId>,
    ) -> Self {
        let mut channels = channels;
        for &channel in &skip_backlog {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        Self {
            ingestion,
            channels,
            limit: limit.max(1),
            interval,
            skip_backlog: skip_backlog.into_iter().collect(),
            primed: HashSet::new(),
            watermarks: HashMap::new(),
        }
    }
}

impl Poller {
    /// Last message id seen in `channel`.
    pub fn watermark(&self, channel: ChannelId) -> Option<MessageId> {
        self.watermarks.get(&channel).copied()
    }

    /// Polls every channel once and returns the unseen messages, oldest first
    /// within each channel.
    pub async fn poll_once(&mut self) -> Vec<RelayEvent> {
        let mut events = Vec::new();

        for &channel in &self.channels {
            let messages = match self.ingestion.poll(channel, self.limit).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(%channel, "Failed to poll channel: {e}");
                    continue;
                }
            };

            if self.primed.insert(channel) && self.skip_backlog.contains(&channel) {
                if let Some(latest) = messages.last() {
                    tracing::debug!(%channel, watermark = %latest.id, "Skipping backlog");
                    self.watermarks.insert(channel, latest.id);
                }
                continue;
            }

            for message in messages {
                let watermark = self.watermarks.get(&channel).copied();
                if watermark.is_some_and(|seen| message.id <= seen) {
                    continue;
                }
                self.watermarks.insert(channel, message.id);
                events.push(RelayEvent::Created(message));
            }
        }

        events
    }

    /// Polls until `shutdown` is cancelled or the receiving side is dropped.
    pub async fn run(mut self, events: mpsc::Sender<RelayEvent>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for event in self.poll_once().await {
                if events.send(event).await.is_err() {
                    tracing::debug!("Relay queue closed, stopping poller");
                    return;
                }
            }
        }

        tracing::debug!("Poller stopped");
    }
}
