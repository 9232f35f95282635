//! In-memory platform used by the binary's loopback mode and by tests.
//!
//! Every channel is a map of message ids to posts. Sends and deletes mutate
//! those maps, and every call is appended to a log so callers can assert on
//! the exact sequence of platform requests. Failures can be scripted per
//! channel, and attachments can be held back until a message is re-fetched
//! to reproduce platform propagation lag.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::BoxFuture;

use crate::message::{Attachment, CandidateMessage, ChannelId, MessageId};

use super::{Deleted, Delivery, Ingestion, PlatformError};

/// A platform request, as recorded by [`MemoryPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SendText {
        destination: ChannelId,
        text: String,
    },
    SendAttachment {
        destination: ChannelId,
        filename: String,
        size: u64,
        spoiler: bool,
    },
    Delete {
        destination: ChannelId,
        copy: MessageId,
    },
    Poll {
        channel: ChannelId,
    },
    Fetch {
        channel: ChannelId,
        message: MessageId,
    },
}

#[derive(Default)]
struct State {
    next_id: u64,
    channels: BTreeMap<ChannelId, BTreeMap<MessageId, CandidateMessage>>,
    calls: Vec<Call>,
    scripted: HashMap<ChannelId, VecDeque<Option<PlatformError>>>,
    broken: HashMap<ChannelId, PlatformError>,
    late_attachments: HashMap<MessageId, Attachment>,
}

impl State {
    fn allocate_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId(self.next_id)
    }

    fn injected_failure(&mut self, channel: ChannelId) -> Option<PlatformError> {
        if let Some(error) = self.broken.get(&channel) {
            return Some(error.clone());
        }
        self.scripted.get_mut(&channel).and_then(VecDeque::pop_front).flatten()
    }

    fn store(&mut self, channel: ChannelId, text: String, attachment: Option<Attachment>) -> MessageId {
        let id = self.allocate_id();
        let message = CandidateMessage {
            id,
            channel,
            text,
            attachment,
            created_at: Utc::now(),
        };
        self.channels.entry(channel).or_default().insert(id, message);
        id
    }
}

#[derive(Clone)]
pub struct MemoryPlatform {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_id: 1_000,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates `channel` if it does not exist yet.
    pub fn open_channel(&self, channel: ChannelId) {
        self.state().channels.entry(channel).or_default();
    }

    /// Posts a message to a source channel as a user would.
    pub fn post(
        &self,
        channel: ChannelId,
        text: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> CandidateMessage {
        let mut state = self.state();
        let id = state.store(channel, text.into(), attachment);
        state.channels[&channel][&id].clone()
    }

    /// Posts a message whose attachment only shows up once it is re-fetched.
    pub fn post_with_late_attachment(
        &self,
        channel: ChannelId,
        text: impl Into<String>,
        attachment: Attachment,
    ) -> CandidateMessage {
        let message = self.post(channel, text, None);
        self.state().late_attachments.insert(message.id, attachment);
        message
    }

    /// Removes a message, as a user deleting their own post would.
    pub fn remove(&self, channel: ChannelId, message: MessageId) -> Option<CandidateMessage> {
        self.state()
            .channels
            .get_mut(&channel)
            .and_then(|messages| messages.remove(&message))
    }

    /// Current messages in `channel`, oldest first.
    pub fn messages(&self, channel: ChannelId) -> Vec<CandidateMessage> {
        self.state()
            .channels
            .get(&channel)
            .map(|messages| messages.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, channel: ChannelId, message: MessageId) -> bool {
        self.state()
            .channels
            .get(&channel)
            .is_some_and(|messages| messages.contains_key(&message))
    }

    /// Fails the next call against `channel` with `error`.
    ///
    /// Repeated calls queue failures in order.
    pub fn fail_next(&self, channel: ChannelId, error: PlatformError) {
        self.state()
            .scripted
            .entry(channel)
            .or_default()
            .push_back(Some(error));
    }

    /// Lets the next call against `channel` through before any queued failure.
    pub fn pass_next(&self, channel: ChannelId) {
        self.state().scripted.entry(channel).or_default().push_back(None);
    }

    /// Fails every call against `channel` with `error` until [`Self::repair`].
    pub fn break_channel(&self, channel: ChannelId, error: PlatformError) {
        self.state().broken.insert(channel, error);
    }

    pub fn repair(&self, channel: ChannelId) {
        let mut state = self.state();
        state.broken.remove(&channel);
        state.scripted.remove(&channel);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Send calls made so far, in order.
    pub fn sends(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::SendText { .. } | Call::SendAttachment { .. }))
            .collect()
    }

    /// Delete calls made so far, in order.
    pub fn deletes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Delete { .. }))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl Delivery for MemoryPlatform {
    fn send_text<'a>(
        &'a self,
        destination: ChannelId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<MessageId, PlatformError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::SendText {
                destination,
                text: text.to_owned(),
            });
            if let Some(error) = state.injected_failure(destination) {
                return Err(error);
            }
            Ok(state.store(destination, text.to_owned(), None))
        })
    }

    fn send_attachment<'a>(
        &'a self,
        destination: ChannelId,
        content: Bytes,
        filename: &'a str,
        spoiler: bool,
    ) -> BoxFuture<'a, Result<MessageId, PlatformError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::SendAttachment {
                destination,
                filename: filename.to_owned(),
                size: content.len() as u64,
                spoiler,
            });
            if let Some(error) = state.injected_failure(destination) {
                return Err(error);
            }
            let attachment = Attachment::new(filename, content).spoiler(spoiler);
            Ok(state.store(destination, String::new(), Some(attachment)))
        })
    }

    fn delete(
        &self,
        destination: ChannelId,
        copy: MessageId,
    ) -> BoxFuture<'_, Result<Deleted, PlatformError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::Delete { destination, copy });
            if let Some(error) = state.injected_failure(destination) {
                return Err(error);
            }
            let removed = state
                .channels
                .get_mut(&destination)
                .and_then(|messages| messages.remove(&copy));
            Ok(match removed {
                Some(_) => Deleted::Removed,
                None => Deleted::AlreadyGone,
            })
        })
    }
}

impl Ingestion for MemoryPlatform {
    fn poll(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<CandidateMessage>, PlatformError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::Poll { channel });
            if let Some(error) = state.injected_failure(channel) {
                return Err(error);
            }
            let messages = state.channels.get(&channel).ok_or_else(|| {
                PlatformError::not_found(format!("channel {channel}"))
            })?;
            let skip = messages.len().saturating_sub(limit);
            Ok(messages.values().skip(skip).cloned().collect())
        })
    }

    fn fetch(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> BoxFuture<'_, Result<Option<CandidateMessage>, PlatformError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::Fetch { channel, message });
            if let Some(error) = state.injected_failure(channel) {
                return Err(error);
            }
            let late = state.late_attachments.remove(&message);
            let Some(stored) = state
                .channels
                .get_mut(&channel)
                .and_then(|messages| messages.get_mut(&message))
            else {
                return Ok(None);
            };
            if let Some(attachment) = late {
                stored.attachment = Some(attachment);
            }
            Ok(Some(stored.clone()))
        })
    }
}
