//! Chat platform adapter contracts.
//!
//! The relay engine talks to the platform only through the traits in this
//! module:
//! - [`Ingestion`] supplies candidate messages from source feeds
//! - [`Delivery`] sends and deletes relayed copies in destination feeds
//!
//! Implementations own the connection, authentication and request plumbing
//! of a concrete platform client. From the engine's point of view every call
//! is stateless. Any call may fail with [`PlatformError::RateLimited`], which
//! carries the delay the platform asked for before the next attempt.

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use snafu::Snafu;

use crate::message::{CandidateMessage, ChannelId, MessageId};

pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum PlatformError {
    #[snafu(display("Rate limited, retry after {retry_after:?}"))]
    RateLimited { retry_after: Duration },

    #[snafu(display("Not found: {resource}"))]
    NotFound { resource: String },

    #[snafu(display("Forbidden: {resource}"))]
    Forbidden { resource: String },

    #[snafu(display("Platform error: {detail}"))]
    Platform { detail: String },
}

impl PlatformError {
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn forbidden(resource: impl Into<String>) -> Self {
        Self::Forbidden {
            resource: resource.into(),
        }
    }

    pub fn platform(detail: impl Into<String>) -> Self {
        Self::Platform {
            detail: detail.into(),
        }
    }

    /// The delay requested by the platform, if this is a rate-limit signal.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deleted {
    /// The message existed and was removed
    Removed,
    /// The message was already gone
    AlreadyGone,
}

/// Send and delete operations against destination feeds.
pub trait Delivery: Send + Sync + 'static {
    /// Posts `text` to `destination`, returning the id of the new message.
    fn send_text<'a>(
        &'a self,
        destination: ChannelId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<MessageId, PlatformError>>;

    /// Uploads a file to `destination`, returning the id of the new message.
    fn send_attachment<'a>(
        &'a self,
        destination: ChannelId,
        content: Bytes,
        filename: &'a str,
        spoiler: bool,
    ) -> BoxFuture<'a, Result<MessageId, PlatformError>>;

    /// Deletes message `copy` from `destination`.
    ///
    /// A message that no longer exists is reported as [`Deleted::AlreadyGone`]
    /// rather than an error.
    fn delete(
        &self,
        destination: ChannelId,
        copy: MessageId,
    ) -> BoxFuture<'_, Result<Deleted, PlatformError>>;
}

/// Read operations against source feeds.
pub trait Ingestion: Send + Sync + 'static {
    /// Returns up to `limit` of the most recent messages in `channel`, oldest first.
    fn poll(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<CandidateMessage>, PlatformError>>;

    /// Fetches a single message, or `None` if it no longer exists.
    fn fetch(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> BoxFuture<'_, Result<Option<CandidateMessage>, PlatformError>>;
}
