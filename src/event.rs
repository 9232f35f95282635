use crate::message::{CandidateMessage, ChannelId, MessageId};

/// An observation delivered from ingestion to the relay worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A message was posted, edited, or seen by a poll.
    Created(CandidateMessage),
    /// A message was deleted from its channel.
    Deleted {
        channel: ChannelId,
        message: MessageId,
    },
}

impl RelayEvent {
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::Created(message) => message.channel,
            Self::Deleted { channel, .. } => *channel,
        }
    }

    pub fn message(&self) -> MessageId {
        match self {
            Self::Created(message) => message.id,
            Self::Deleted { message, .. } => *message,
        }
    }
}
