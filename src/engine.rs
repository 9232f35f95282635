//! The forwarding engine.
//!
//! For every candidate message the engine decides whether it is new, fans it
//! out to the configured destinations, and records the resulting copies. When
//! the origin is deleted it reverses that fan-out.
//!
//! # Relay lifecycle
//!
//! 1. A candidate without an attachment is re-fetched once after a short delay,
//!    since the platform may still be propagating an edit that adds one
//! 2. A candidate whose id is already in the [`RelayLedger`] is skipped
//! 3. A candidate whose [`Fingerprint`] is in the [`DedupWindow`] is skipped
//! 4. Each destination receives the text (if any) and then the attachment
//! 5. The fingerprint is recorded once at least one destination succeeded
//!
//! Per-message and per-destination failures are logged and reported through
//! [`RelayOutcome`] and [`Retraction`]; they never abort the caller.

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use futures_util::future::BoxFuture;
use strum::Display;

use crate::{
    clock::{Clock, SystemClock},
    error::Error,
    fingerprint::{fingerprint, Fingerprint},
    ledger::{RelayLedger, RelayedCopy},
    message::{Attachment, CandidateMessage, ChannelId, MessageId},
    platform::{Deleted, Delivery, Ingestion, PlatformError},
    window::{DedupWindow, DEFAULT_WINDOW},
};

/// Delay before re-checking a message that arrived without an attachment.
pub const DEFAULT_RECHECK_DELAY: Duration = Duration::from_secs(3);

/// Longest total time spent honouring rate limits while relaying or retracting
/// one message, summed over all of its destinations.
pub const DEFAULT_RETRY_CEILING: Duration = Duration::from_secs(60);

/// What [`ForwardingEngine::handle_new`] did with a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RelayOutcome {
    /// Sent to at least one destination
    Relayed {
        delivered: Vec<ChannelId>,
        failed: Vec<ChannelId>,
    },
    /// The message id already has relayed copies
    AlreadyRelayed,
    /// The same content was relayed recently under another id
    Duplicate,
    /// No attachment, even after the re-check
    NotRelayable,
    /// The message vanished before it could be relayed
    Unavailable,
    /// Every destination failed
    Failed { failed: Vec<ChannelId> },
}

impl RelayOutcome {
    pub fn is_relayed(&self) -> bool {
        matches!(self, Self::Relayed { .. })
    }
}

/// Result of mirroring a deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retraction {
    /// Copies removed from their destinations
    pub deleted: usize,
    /// Copies that were already gone
    pub already_gone: usize,
    /// Copies whose deletion failed
    pub failed: usize,
}

impl Retraction {
    pub fn is_noop(&self) -> bool {
        self.deleted + self.already_gone + self.failed == 0
    }
}

/// Rate-limit wait accumulated while relaying or retracting one message.
struct RetryBudget {
    waited: Duration,
    ceiling: Duration,
}

impl RetryBudget {
    fn new(ceiling: Duration) -> Self {
        Self {
            waited: Duration::ZERO,
            ceiling,
        }
    }

    fn allows(&self, retry_after: Duration) -> bool {
        self.waited + retry_after <= self.ceiling
    }
}

pub struct ForwardingEngine {
    delivery: Arc<dyn Delivery>,
    ingestion: Arc<dyn Ingestion>,
    clock: Arc<dyn Clock>,
    destinations: Vec<ChannelId>,
    window: DedupWindow,
    ledger: RelayLedger,
    recheck_delay: Duration,
    retry_ceiling: Duration,
}

#[bon::bon]
impl ForwardingEngine {
    #[builder]
    pub fn new(
        delivery: Arc<dyn Delivery>,
        ingestion: Arc<dyn Ingestion>,
        destinations: Vec<ChannelId>,
        #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)] clock: Arc<dyn Clock>,
        #[builder(default = DEFAULT_WINDOW)] dedup_window: TimeDelta,
        #[builder(default = DEFAULT_RECHECK_DELAY)] recheck_delay: Duration,
        #[builder(default = DEFAULT_RETRY_CEILING)] retry_ceiling: Duration,
    ) -> Self {
        Self {
            delivery,
            ingestion,
            clock,
            destinations,
            window: DedupWindow::new(dedup_window),
            ledger: RelayLedger::new(),
            recheck_delay,
            retry_ceiling,
        }
    }
}

impl ForwardingEngine {
    pub fn window(&self) -> &DedupWindow {
        &self.window
    }

    pub fn ledger(&self) -> &RelayLedger {
        &self.ledger
    }

    pub fn destinations(&self) -> &[ChannelId] {
        &self.destinations
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Evaluates a newly observed message and relays it if it is new content.
    #[tracing::instrument(skip_all, fields(origin = %candidate.id, channel = %candidate.channel))]
    pub async fn handle_new(&self, candidate: CandidateMessage) -> RelayOutcome {
        let candidate = match self.ensure_attachment(candidate).await {
            Ok(candidate) => candidate,
            Err(Error::AttachmentNotYetAvailable { .. }) => {
                tracing::debug!("No attachment after re-check, nothing to relay");
                return RelayOutcome::NotRelayable;
            }
            Err(e) => {
                tracing::info!("Skipping message: {e}");
                return RelayOutcome::Unavailable;
            }
        };

        if self.ledger.has_entry(candidate.id) {
            tracing::debug!("Already relayed under this id");
            return RelayOutcome::AlreadyRelayed;
        }

        let fingerprint = fingerprint(&candidate);
        if self.window.is_duplicate(&fingerprint, self.clock.now()) {
            tracing::info!(%fingerprint, "Duplicate content within dedup window");
            return RelayOutcome::Duplicate;
        }

        self.fan_out(&candidate, fingerprint).await
    }

    /// Deletes every relayed copy of `origin` and forgets it.
    ///
    /// Deletion is best effort: the ledger entry is removed before any copy is
    /// deleted and is never restored, even if some deletes fail.
    #[tracing::instrument(skip(self))]
    pub async fn handle_delete(&self, origin: MessageId) -> Retraction {
        let copies = self.ledger.take(origin);
        let mut retraction = Retraction::default();
        let mut budget = RetryBudget::new(self.retry_ceiling);

        if copies.is_empty() {
            tracing::debug!("No relayed copies to retract");
            return retraction;
        }

        for RelayedCopy {
            destination,
            text,
            attachment,
        } in copies
        {
            for copy in [text, attachment].into_iter().flatten() {
                let result = self
                    .with_retry(destination, &mut budget, || self.delivery.delete(destination, copy))
                    .await;

                match result {
                    Ok(Deleted::Removed) => retraction.deleted += 1,
                    Ok(Deleted::AlreadyGone)
                    | Err(Error::PermanentDelivery {
                        source: PlatformError::NotFound { .. },
                        ..
                    }) => retraction.already_gone += 1,
                    Err(e) => {
                        tracing::warn!(%destination, %copy, "Failed to delete relayed copy: {e}");
                        retraction.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            deleted = retraction.deleted,
            already_gone = retraction.already_gone,
            failed = retraction.failed,
            "Retracted relayed copies"
        );

        retraction
    }

    /// Returns the candidate with its attachment, re-fetching it once if needed.
    async fn ensure_attachment(&self, candidate: CandidateMessage) -> Result<CandidateMessage, Error> {
        if candidate.has_attachment() {
            return Ok(candidate);
        }

        tokio::time::sleep(self.recheck_delay).await;

        let refreshed = self
            .ingestion
            .fetch(candidate.channel, candidate.id)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to re-fetch message: {e}");
                Error::SourceUnavailable {
                    channel: candidate.channel,
                    message: candidate.id,
                }
            })?
            .ok_or(Error::SourceUnavailable {
                channel: candidate.channel,
                message: candidate.id,
            })?;

        if refreshed.has_attachment() {
            Ok(refreshed)
        } else {
            Err(Error::AttachmentNotYetAvailable {
                message: candidate.id,
            })
        }
    }

    async fn fan_out(&self, candidate: &CandidateMessage, fingerprint: Fingerprint) -> RelayOutcome {
        let Some(attachment) = candidate.attachment.as_ref() else {
            return RelayOutcome::NotRelayable;
        };
        let text = candidate.relay_text();

        let mut budget = RetryBudget::new(self.retry_ceiling);
        let mut delivered = Vec::new();
        let mut failed = Vec::new();

        for &destination in &self.destinations {
            match self
                .relay_to(candidate.id, destination, text, attachment, &mut budget)
                .await
            {
                Ok((text_copy, attachment_copy)) => {
                    self.ledger.record(
                        candidate.id,
                        destination,
                        text_copy,
                        Some(attachment_copy),
                        self.clock.now(),
                    );
                    delivered.push(destination);
                }
                Err(e) => {
                    tracing::warn!(%destination, transient = e.is_transient(), "Relay failed: {e}");
                    failed.push(destination);
                }
            }
        }

        if delivered.is_empty() {
            tracing::error!("Relay failed for every destination");
            return RelayOutcome::Failed { failed };
        }

        self.window.record(fingerprint, self.clock.now());
        tracing::info!(
            delivered = delivered.len(),
            failed = failed.len(),
            "Relayed message"
        );

        RelayOutcome::Relayed { delivered, failed }
    }

    /// Sends the text (if any) and the attachment to one destination.
    ///
    /// If the attachment cannot be sent, a text copy already posted is removed
    /// again so the destination is left as it was.
    async fn relay_to(
        &self,
        origin: MessageId,
        destination: ChannelId,
        text: &str,
        attachment: &Attachment,
        budget: &mut RetryBudget,
    ) -> Result<(Option<MessageId>, MessageId), Error> {
        let text_copy = if text.is_empty() {
            None
        } else {
            Some(
                self.with_retry(destination, budget, || {
                    self.delivery.send_text(destination, text)
                })
                .await?,
            )
        };

        let attachment_copy = self
            .with_retry(destination, budget, || {
                self.delivery.send_attachment(
                    destination,
                    attachment.content.clone(),
                    &attachment.filename,
                    attachment.spoiler,
                )
            })
            .await;

        match attachment_copy {
            Ok(copy) => Ok((text_copy, copy)),
            Err(e) => {
                if let Some(orphan) = text_copy {
                    self.remove_orphan(origin, destination, orphan, budget).await;
                }
                Err(e)
            }
        }
    }

    /// Deletes a text copy whose attachment never arrived.
    ///
    /// A copy that cannot be removed is recorded without an attachment, so a
    /// later retraction of `origin` still reaches it.
    async fn remove_orphan(
        &self,
        origin: MessageId,
        destination: ChannelId,
        orphan: MessageId,
        budget: &mut RetryBudget,
    ) {
        let result = self
            .with_retry(destination, budget, || self.delivery.delete(destination, orphan))
            .await;

        match result {
            Ok(_)
            | Err(Error::PermanentDelivery {
                source: PlatformError::NotFound { .. },
                ..
            }) => {}
            Err(e) => {
                tracing::warn!(%destination, copy = %orphan, "Failed to remove orphaned text copy: {e}");
                self.ledger
                    .record(origin, destination, Some(orphan), None, self.clock.now());
            }
        }
    }

    /// Runs `op`, sleeping and retrying whenever the platform signals a rate limit.
    ///
    /// Each signal is honoured with exactly one retry after the requested
    /// delay. Once the accumulated wait would exceed the budget's ceiling the
    /// send is given up as a transient failure.
    async fn with_retry<'a, T, F>(
        &self,
        destination: ChannelId,
        budget: &mut RetryBudget,
        mut op: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> BoxFuture<'a, Result<T, PlatformError>>,
    {
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match e.retry_after() {
                    Some(retry_after) if budget.allows(retry_after) => {
                        tracing::debug!(%destination, ?retry_after, "Rate limited, waiting before retry");
                        tokio::time::sleep(retry_after).await;
                        budget.waited += retry_after;
                    }
                    _ => return Err(Error::delivery(destination, e, budget.waited)),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        clock::ManualClock,
        platform::memory::{Call, MemoryPlatform},
    };

    const SOURCE: ChannelId = ChannelId(10);
    const D1: ChannelId = ChannelId(21);
    const D2: ChannelId = ChannelId(22);

    fn engine(platform: &MemoryPlatform, clock: &ManualClock) -> ForwardingEngine {
        ForwardingEngine::builder()
            .delivery(Arc::new(platform.clone()))
            .ingestion(Arc::new(platform.clone()))
            .destinations(vec![D1, D2])
            .clock(Arc::new(clock.clone()))
            .recheck_delay(Duration::ZERO)
            .build()
    }

    fn png(size: usize) -> Attachment {
        Attachment::new("a.png", vec![0u8; size])
    }

    #[tokio::test]
    async fn test_relays_text_then_attachment_to_each_destination() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        let outcome = engine.handle_new(origin.clone()).await;

        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                delivered: vec![D1, D2],
                failed: vec![]
            }
        );

        let sends = platform.sends();
        assert_eq!(sends.len(), 4);
        assert!(matches!(&sends[0], Call::SendText { destination, text } if *destination == D1 && text == "ch1 out"));
        assert!(matches!(&sends[1], Call::SendAttachment { destination, size: 100, .. } if *destination == D1));
        assert!(matches!(&sends[2], Call::SendText { destination, .. } if *destination == D2));
        assert!(matches!(&sends[3], Call::SendAttachment { destination, .. } if *destination == D2));

        let copies = engine.ledger().copies(origin.id);
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].destination, D1);
        assert!(copies[0].text.is_some() && copies[0].attachment.is_some());
        assert_eq!(copies[1].destination, D2);

        assert_eq!(
            engine.window().last_relayed(&fingerprint(&origin)),
            Some(clock.now())
        );
    }

    #[tokio::test]
    async fn test_empty_text_sends_attachment_only() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post(SOURCE, "   ", Some(png(10)));
        assert!(engine.handle_new(origin.clone()).await.is_relayed());

        assert!(platform
            .sends()
            .iter()
            .all(|call| matches!(call, Call::SendAttachment { .. })));
        assert!(engine.ledger().copies(origin.id).iter().all(|c| c.text.is_none()));
    }

    #[tokio::test]
    async fn test_same_id_is_not_relayed_twice() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        engine.handle_new(origin.clone()).await;
        platform.clear_calls();

        clock.advance(TimeDelta::hours(30));
        assert_eq!(engine.handle_new(origin).await, RelayOutcome::AlreadyRelayed);
        assert!(platform.sends().is_empty());
    }

    #[tokio::test]
    async fn test_missing_attachment_is_rechecked_once() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post(SOURCE, "just text", None);
        assert_eq!(engine.handle_new(origin.clone()).await, RelayOutcome::NotRelayable);

        let fetches = platform
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Fetch { .. }))
            .count();
        assert_eq!(fetches, 1);
        assert!(platform.sends().is_empty());
        assert!(!engine.ledger().has_entry(origin.id));
    }

    #[tokio::test]
    async fn test_late_attachment_is_relayed_after_recheck() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post_with_late_attachment(SOURCE, "ch2 out", png(5));
        assert!(engine.handle_new(origin.clone()).await.is_relayed());
        assert!(engine.ledger().has_entry(origin.id));
    }

    #[tokio::test]
    async fn test_vanished_message_is_unavailable() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post(SOURCE, "gone", None);
        platform.remove(SOURCE, origin.id);

        assert_eq!(engine.handle_new(origin).await, RelayOutcome::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_waits_for_delay() {
        let platform = MemoryPlatform::new();
        let engine = ForwardingEngine::builder()
            .delivery(Arc::new(platform.clone()))
            .ingestion(Arc::new(platform.clone()))
            .destinations(vec![D1])
            .build();

        let origin = platform.post_with_late_attachment(SOURCE, "", png(5));
        let started = tokio::time::Instant::now();
        assert!(engine.handle_new(origin).await.is_relayed());
        assert!(started.elapsed() >= DEFAULT_RECHECK_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_after_delay() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        platform.fail_next(D1, PlatformError::rate_limited(Duration::from_secs(5)));

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        let started = tokio::time::Instant::now();
        let outcome = engine.handle_new(origin.clone()).await;

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                delivered: vec![D1, D2],
                failed: vec![]
            }
        );
        // D1 text twice (limited, retried), D1 attachment, D2 text, D2 attachment
        assert_eq!(platform.sends().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gives_up_at_ceiling() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        platform.break_channel(D1, PlatformError::rate_limited(Duration::from_secs(25)));

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        let outcome = engine.handle_new(origin.clone()).await;

        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                delivered: vec![D2],
                failed: vec![D1]
            }
        );
        let d1_attempts = platform
            .sends()
            .iter()
            .filter(|call| matches!(call, Call::SendText { destination, .. } if *destination == D1))
            .count();
        // 25s + 25s fit under the 60s ceiling, a third wait would not
        assert_eq!(d1_attempts, 3);
    }

    #[tokio::test]
    async fn test_attachment_failure_removes_orphaned_text() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        // D2 accepts the text, then rejects the upload
        platform.pass_next(D2);
        platform.fail_next(D2, PlatformError::forbidden("no upload"));

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        let outcome = engine.handle_new(origin.clone()).await;

        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                delivered: vec![D1],
                failed: vec![D2]
            }
        );
        assert!(platform.messages(D2).is_empty());
        assert_eq!(platform.deletes().len(), 1);

        let copies = engine.ledger().copies(origin.id);
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].destination, D1);
        assert!(engine.window().last_relayed(&fingerprint(&origin)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_cleanup_waits_out_rate_limit() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        // text accepted, upload rejected, first cleanup attempt rate limited
        platform.pass_next(D2);
        platform.fail_next(D2, PlatformError::forbidden("no upload"));
        platform.fail_next(D2, PlatformError::rate_limited(Duration::from_secs(5)));

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        let started = tokio::time::Instant::now();
        assert!(engine.handle_new(origin.clone()).await.is_relayed());

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(platform.messages(D2).is_empty());
        assert_eq!(platform.deletes().len(), 2);
        assert_eq!(engine.ledger().copies(origin.id).len(), 1);
    }

    #[tokio::test]
    async fn test_unremovable_orphan_is_kept_for_retraction() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        // the cleanup delay is longer than the retry ceiling allows
        platform.pass_next(D2);
        platform.fail_next(D2, PlatformError::forbidden("no upload"));
        platform.fail_next(D2, PlatformError::rate_limited(Duration::from_secs(120)));

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        assert_eq!(
            engine.handle_new(origin.clone()).await,
            RelayOutcome::Relayed {
                delivered: vec![D1],
                failed: vec![D2]
            }
        );

        let copies = engine.ledger().copies(origin.id);
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[1].destination, D2);
        assert!(copies[1].text.is_some());
        assert_eq!(copies[1].attachment, None);
        assert_eq!(platform.messages(D2).len(), 1);

        assert_eq!(
            engine.handle_delete(origin.id).await,
            Retraction {
                deleted: 3,
                already_gone: 0,
                failed: 0
            }
        );
        assert!(platform.messages(D1).is_empty());
        assert!(platform.messages(D2).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_is_shared_across_destinations() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        platform.fail_next(D1, PlatformError::rate_limited(Duration::from_secs(40)));
        platform.fail_next(D2, PlatformError::rate_limited(Duration::from_secs(40)));

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        assert_eq!(
            engine.handle_new(origin).await,
            RelayOutcome::Relayed {
                delivered: vec![D1],
                failed: vec![D2]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_delete_is_retried() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        engine.handle_new(origin.clone()).await;

        platform.fail_next(D2, PlatformError::rate_limited(Duration::from_secs(10)));
        let started = tokio::time::Instant::now();

        assert_eq!(
            engine.handle_delete(origin.id).await,
            Retraction {
                deleted: 4,
                already_gone: 0,
                failed: 0
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(platform.deletes().len(), 5);
        assert!(platform.messages(D2).is_empty());
    }

    #[tokio::test]
    async fn test_all_destinations_failing_leaves_window_untouched() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        platform.break_channel(D1, PlatformError::forbidden("d1"));
        platform.break_channel(D2, PlatformError::not_found("d2"));

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        assert_eq!(
            engine.handle_new(origin.clone()).await,
            RelayOutcome::Failed {
                failed: vec![D1, D2]
            }
        );
        assert!(engine.window().is_empty());
        assert!(!engine.ledger().has_entry(origin.id));

        platform.repair(D1);
        platform.repair(D2);
        assert!(engine.handle_new(origin).await.is_relayed());
    }

    #[tokio::test]
    async fn test_delete_failures_do_not_block_other_copies() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post(SOURCE, "ch1 out", Some(png(100)));
        engine.handle_new(origin.clone()).await;

        platform.break_channel(D1, PlatformError::platform("boom"));
        let retraction = engine.handle_delete(origin.id).await;

        assert_eq!(
            retraction,
            Retraction {
                deleted: 2,
                already_gone: 0,
                failed: 2
            }
        );
        assert!(!engine.ledger().has_entry(origin.id));
        assert!(platform.messages(D2).is_empty());
        assert_eq!(platform.messages(D1).len(), 2);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_origin_is_noop() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        assert!(engine.handle_delete(MessageId(42)).await.is_noop());
        assert!(platform.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_on_delete_counts_as_already_gone() {
        let platform = MemoryPlatform::new();
        let clock = ManualClock::new(Utc::now());
        let engine = engine(&platform, &clock);

        let origin = platform.post(SOURCE, "", Some(png(100)));
        engine.handle_new(origin.clone()).await;

        platform.fail_next(D1, PlatformError::not_found("message"));
        assert_eq!(
            engine.handle_delete(origin.id).await,
            Retraction {
                deleted: 1,
                already_gone: 1,
                failed: 0
            }
        );
    }
}
