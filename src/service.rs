//! The relay runtime.
//!
//! [`RelayService`] wires a [`ForwardingEngine`] to its inputs:
//! - a bounded event queue drained by one sequential worker, which is the only
//!   writer of the engine's ledger and dedup window
//! - an optional [`Poller`] feeding that queue
//! - a [`RelayHandle`] through which push-mode adapters deliver events
//! - a periodic maintenance pass that prunes the dedup window and sweeps the ledger
//! - delayed retries of messages whose relay failed for every destination

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use chrono::TimeDelta;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinSet,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    announce::Announcer,
    clock::{Clock, SystemClock},
    config::Config,
    engine::{ForwardingEngine, RelayOutcome, Retraction},
    error::Error,
    event::RelayEvent,
    message::{CandidateMessage, ChannelId, MessageId},
    platform::{Delivery, Ingestion},
    poller::Poller,
};

/// Sends events into a running [`RelayService`].
#[derive(Clone)]
pub struct RelayHandle {
    events: mpsc::Sender<RelayEvent>,
}

impl RelayHandle {
    pub async fn on_created(&self, message: CandidateMessage) -> Result<(), Error> {
        self.send(RelayEvent::Created(message)).await
    }

    pub async fn on_deleted(&self, channel: ChannelId, message: MessageId) -> Result<(), Error> {
        self.send(RelayEvent::Deleted { channel, message }).await
    }

    pub async fn send(&self, event: RelayEvent) -> Result<(), Error> {
        self.events.send(event).await.map_err(|_| Error::QueueClosed)
    }
}

/// What the worker did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Relay(RelayOutcome),
    Retract(Retraction),
    Command(usize),
    Ignored,
}

/// Longest delay between two retries of a failed relay.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// A message whose last relay failed for every destination.
struct PendingRetry {
    message: CandidateMessage,
    attempts: u32,
    due: Instant,
}

struct Worker {
    engine: Arc<ForwardingEngine>,
    announcer: Option<Arc<Announcer>>,
    sources: HashSet<ChannelId>,
    events: mpsc::Receiver<RelayEvent>,
    maintenance_interval: Duration,
    ledger_retention: TimeDelta,
    retry_backoff: Duration,
    retry_attempts: u32,
    retries: HashMap<MessageId, PendingRetry>,
    processed: broadcast::Sender<Handled>,
}

impl Worker {
    async fn run(mut self, shutdown: CancellationToken) {
        let mut maintenance = tokio::time::interval(self.maintenance_interval);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        maintenance.tick().await;

        loop {
            let next_retry = self.next_retry();

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = maintenance.tick() => self.maintain(),
                _ = tokio::time::sleep_until(next_retry.unwrap_or_else(Instant::now)),
                    if next_retry.is_some() => self.retry_due().await,
                event = self.events.recv() => match event {
                    Some(event) => {
                        let handled = self.dispatch(event).await;
                        let _ = self.processed.send(handled);
                    }
                    None => break,
                },
            }
        }

        if !self.retries.is_empty() {
            tracing::warn!(pending = self.retries.len(), "Dropping pending relay retries");
        }
        tracing::debug!("Relay worker stopped");
    }

    fn next_retry(&self) -> Option<Instant> {
        self.retries.values().map(|pending| pending.due).min()
    }

    /// Backoff before retry number `attempts`, doubling from the base delay.
    fn backoff(&self, attempts: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(attempts.saturating_sub(1)))
            .min(MAX_RETRY_BACKOFF)
    }

    fn schedule_retry(&mut self, message: CandidateMessage, attempts: u32) {
        if attempts > self.retry_attempts {
            tracing::error!(origin = %message.id, attempts, "Giving up on relay after repeated failures");
            return;
        }
        let backoff = self.backoff(attempts);
        tracing::info!(origin = %message.id, attempts, ?backoff, "Scheduling relay retry");
        self.retries.insert(
            message.id,
            PendingRetry {
                message,
                attempts,
                due: Instant::now() + backoff,
            },
        );
    }

    async fn retry_due(&mut self) {
        let now = Instant::now();
        let due: Vec<MessageId> = self
            .retries
            .iter()
            .filter(|(_, pending)| pending.due <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(PendingRetry {
                message, attempts, ..
            }) = self.retries.remove(&id)
            else {
                continue;
            };
            let outcome = self.relay(message, attempts).await;
            let _ = self.processed.send(Handled::Relay(outcome));
        }
    }

    /// Relays `message`, scheduling another attempt if every destination failed.
    async fn relay(&mut self, message: CandidateMessage, attempts: u32) -> RelayOutcome {
        let outcome = self.engine.handle_new(message.clone()).await;
        if let RelayOutcome::Failed { .. } = outcome {
            self.schedule_retry(message, attempts + 1);
        }
        outcome
    }

    async fn dispatch(&mut self, event: RelayEvent) -> Handled {
        if let Some(announcer) = &self.announcer {
            if let RelayEvent::Created(message) = &event {
                if message.channel == announcer.command_channel() {
                    return match announcer.handle_command(message.channel, &message.text).await {
                        Ok(posted) => Handled::Command(posted.len()),
                        Err(e) => {
                            tracing::warn!("Command failed: {e}");
                            Handled::Command(0)
                        }
                    };
                }
            }
        }

        if !self.sources.contains(&event.channel()) {
            tracing::trace!(channel = %event.channel(), "Ignoring event from unwatched channel");
            return Handled::Ignored;
        }

        match event {
            RelayEvent::Created(message) => {
                // a fresh observation supersedes any scheduled retry
                let attempts = self
                    .retries
                    .remove(&message.id)
                    .map_or(0, |pending| pending.attempts);
                Handled::Relay(self.relay(message, attempts).await)
            }
            RelayEvent::Deleted { message, .. } => {
                self.retries.remove(&message);
                Handled::Retract(self.engine.handle_delete(message).await)
            }
        }
    }

    fn maintain(&self) {
        let now = self.engine.clock().now();
        let pruned = self.engine.window().prune(now);
        let swept = self.engine.ledger().sweep(now, self.ledger_retention);
        tracing::debug!(
            pruned,
            swept,
            window = self.engine.window().len(),
            ledger = self.engine.ledger().size(),
            "Maintenance pass"
        );
    }
}

pub struct RelayService {
    engine: Arc<ForwardingEngine>,
    handle: RelayHandle,
    processed: broadcast::Sender<Handled>,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
}

#[bon::bon]
impl RelayService {
    /// Starts the worker, the maintenance pass, and (if enabled) the poller.
    ///
    /// Must be called from within a Tokio runtime.
    #[builder(finish_fn = start)]
    pub fn new(
        config: &Config,
        delivery: Arc<dyn Delivery>,
        ingestion: Arc<dyn Ingestion>,
        #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)] clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let engine = Arc::new(
            ForwardingEngine::builder()
                .delivery(delivery.clone())
                .ingestion(ingestion.clone())
                .destinations(config.destination_channels.clone())
                .clock(clock)
                .dedup_window(config.dedup_window())
                .recheck_delay(config.recheck_delay())
                .retry_ceiling(config.retry_ceiling())
                .build(),
        );

        let announcer = Announcer::from_config(config, delivery)?.map(Arc::new);

        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity());
        let (processed, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();

        if config.poll_enabled() {
            let poller = Poller::builder()
                .ingestion(ingestion)
                .channels(config.source_channels.clone())
                .skip_backlog(announcer.iter().map(|a| a.command_channel()).collect())
                .limit(config.poll_limit())
                .interval(config.poll_interval())
                .build();
            tasks.spawn(poller.run(events_tx.clone(), shutdown.clone()));
        }

        let worker = Worker {
            engine: engine.clone(),
            announcer,
            sources: config.source_channels.iter().copied().collect(),
            events: events_rx,
            maintenance_interval: config.maintenance_interval(),
            ledger_retention: config.ledger_retention(),
            retry_backoff: config.retry_backoff(),
            retry_attempts: config.retry_attempts(),
            retries: HashMap::new(),
            processed: processed.clone(),
        };
        tasks.spawn(worker.run(shutdown.clone()));

        tracing::info!(
            sources = config.source_channels.len(),
            destinations = config.destination_channels.len(),
            polling = config.poll_enabled(),
            "Relay service started"
        );

        Ok(Self {
            engine,
            handle: RelayHandle { events: events_tx },
            processed,
            shutdown,
            tasks,
        })
    }
}

impl RelayService {
    pub fn engine(&self) -> &Arc<ForwardingEngine> {
        &self.engine
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Subscribes to the results of events the worker finishes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Handled> {
        self.processed.subscribe()
    }

    /// Stops polling and lets the worker finish the event in hand.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Relay task failed: {e}");
            }
        }
        tracing::info!("Relay service stopped");
    }
}
