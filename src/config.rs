use std::time::Duration;

use chrono::TimeDelta;
use secrecy::SecretString;
use serde::Deserialize;

use crate::{
    engine::{DEFAULT_RECHECK_DELAY, DEFAULT_RETRY_CEILING},
    error::Error,
    ledger::DEFAULT_RETENTION,
    message::ChannelId,
    window::DEFAULT_WINDOW,
};

/// Relay configuration, read from `FEEDRELAY_*` environment variables.
///
/// List values are comma separated, e.g.
/// `FEEDRELAY_SOURCE_CHANNELS=863803391239127090,1248563358995709962`.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source_channels: Vec<ChannelId>,
    #[serde(default)]
    pub destination_channels: Vec<ChannelId>,
    pub token: Option<SecretString>,

    pub dedup_window_secs: Option<u64>,
    pub recheck_delay_ms: Option<u64>,
    pub retry_ceiling_secs: Option<u64>,
    pub poll_enabled: Option<bool>,
    pub poll_interval_secs: Option<u64>,
    pub poll_limit: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub ledger_retention_secs: Option<u64>,
    pub maintenance_interval_secs: Option<u64>,
    pub relay_retry_secs: Option<u64>,
    pub relay_retry_attempts: Option<u32>,

    pub command_channel: Option<ChannelId>,
    pub notify_channel: Option<ChannelId>,
    pub releases_channel: Option<ChannelId>,
    #[serde(default)]
    pub mention_roles: Vec<u64>,
    /// Series entries in `CODE:ROLE:CHANNEL:Display Name` form
    #[serde(default)]
    pub series: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        Ok(envy::prefixed("FEEDRELAY_").from_env::<Self>()?)
    }

    pub fn dedup_window(&self) -> TimeDelta {
        self.dedup_window_secs
            .and_then(|secs| TimeDelta::try_seconds(secs as i64))
            .unwrap_or(DEFAULT_WINDOW)
    }

    pub fn recheck_delay(&self) -> Duration {
        self.recheck_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECHECK_DELAY)
    }

    pub fn retry_ceiling(&self) -> Duration {
        self.retry_ceiling_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_CEILING)
    }

    pub fn poll_enabled(&self) -> bool {
        self.poll_enabled.unwrap_or(true)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(10).max(1))
    }

    pub fn poll_limit(&self) -> usize {
        self.poll_limit.unwrap_or(1).max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(256).max(1)
    }

    pub fn ledger_retention(&self) -> TimeDelta {
        self.ledger_retention_secs
            .and_then(|secs| TimeDelta::try_seconds(secs as i64))
            .unwrap_or(DEFAULT_RETENTION)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.unwrap_or(600).max(1))
    }

    /// Delay before the first retry of a relay that failed everywhere.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.relay_retry_secs.unwrap_or(30).max(1))
    }

    /// Retries of a relay that failed everywhere; 0 disables them.
    pub fn retry_attempts(&self) -> u32 {
        self.relay_retry_attempts.unwrap_or(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.dedup_window(), TimeDelta::hours(24));
        assert_eq!(config.recheck_delay(), Duration::from_secs(3));
        assert_eq!(config.retry_ceiling(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.poll_limit(), 1);
        assert!(config.poll_enabled());
        assert!(config.ledger_retention() > config.dedup_window());
        assert_eq!(config.retry_backoff(), Duration::from_secs(30));
        assert_eq!(config.retry_attempts(), 5);
    }

    #[test]
    fn test_from_env_iter() {
        let vars = vec![
            ("FEEDRELAY_SOURCE_CHANNELS".to_owned(), "1,2".to_owned()),
            ("FEEDRELAY_DESTINATION_CHANNELS".to_owned(), "3,4,5".to_owned()),
            ("FEEDRELAY_DEDUP_WINDOW_SECS".to_owned(), "60".to_owned()),
            ("FEEDRELAY_POLL_ENABLED".to_owned(), "false".to_owned()),
            ("FEEDRELAY_TOKEN".to_owned(), "secret".to_owned()),
        ];

        let config: Config = envy::prefixed("FEEDRELAY_").from_iter(vars).unwrap();

        assert_eq!(config.source_channels, vec![ChannelId(1), ChannelId(2)]);
        assert_eq!(
            config.destination_channels,
            vec![ChannelId(3), ChannelId(4), ChannelId(5)]
        );
        assert_eq!(config.dedup_window(), TimeDelta::seconds(60));
        assert!(!config.poll_enabled());
        assert!(config.token.is_some());
    }
}
