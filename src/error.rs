use std::time::Duration;

use snafu::Snafu;

use crate::message::{ChannelId, MessageId};
use crate::platform::PlatformError;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Rate limited by {destination}, gave up after {waited:?}"))]
    TransientDelivery {
        destination: ChannelId,
        waited: Duration,
    },

    #[snafu(display("Delivery to {destination} failed"))]
    PermanentDelivery {
        destination: ChannelId,
        #[snafu(source)]
        source: PlatformError,
    },

    #[snafu(display("Message {message} in channel {channel} is unavailable"))]
    SourceUnavailable {
        channel: ChannelId,
        message: MessageId,
    },

    #[snafu(display("Message {message} has no attachment"))]
    AttachmentNotYetAvailable { message: MessageId },

    #[snafu(display("Invalid configuration"))]
    Config {
        #[snafu(source)]
        source: envy::Error,
    },

    #[snafu(display("Unknown series abbreviation: {code}"))]
    UnknownSeries { code: String },

    #[snafu(display("Invalid parameter: {message}"))]
    InvalidParameter { message: String },

    #[snafu(display("Relay queue is closed"))]
    QueueClosed,

    #[snafu(display("Platform request failed"))]
    Platform {
        #[snafu(source)]
        source: PlatformError,
    },
}

impl From<envy::Error> for Error {
    fn from(source: envy::Error) -> Self {
        Self::Config { source }
    }
}

impl From<PlatformError> for Error {
    fn from(source: PlatformError) -> Self {
        Self::Platform { source }
    }
}

impl Error {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn unknown_series(code: impl Into<String>) -> Self {
        Self::UnknownSeries { code: code.into() }
    }

    /// Classifies a failed send to `destination`.
    ///
    /// Rate limits that exhausted the retry ceiling are transient; everything
    /// else is permanent for this attempt.
    pub fn delivery(destination: ChannelId, source: PlatformError, waited: Duration) -> Self {
        match source {
            PlatformError::RateLimited { .. } => Self::TransientDelivery {
                destination,
                waited,
            },
            source => Self::PermanentDelivery {
                destination,
                source,
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientDelivery { .. })
    }
}
