//! Operator-triggered release announcements.
//!
//! Operators post `!notify CODE CHAPTER URL` or `!release CODE CHAPTER URL` in
//! the command channel. The announcer looks the series up in a static table
//! and posts formatted lines to the announcement channels. It holds no state
//! and is independent of the forwarding engine.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use itertools::Itertools;
use strum::{Display, EnumString};
use url::Url;

use crate::{
    config::Config,
    error::Error,
    message::{ChannelId, MessageId},
    platform::Delivery,
};

pub const COMMAND_PREFIX: char = '!';

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    Notify,
    Release,
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub code: String,
    pub chapter: u32,
    pub url: Url,
}

impl Invocation {
    /// Parses `!command CODE CHAPTER URL`.
    ///
    /// Returns `Ok(None)` for text that is not a known command.
    pub fn parse(input: &str) -> Result<Option<Self>, Error> {
        let Some(rest) = input.trim().strip_prefix(COMMAND_PREFIX) else {
            return Ok(None);
        };

        let mut args = rest.split_whitespace();
        let Some(command) = args.next().and_then(|name| Command::from_str(name).ok()) else {
            return Ok(None);
        };

        let (Some(code), Some(chapter), Some(url), None) =
            (args.next(), args.next(), args.next(), args.next())
        else {
            return Err(Error::invalid_parameter(format!(
                "usage: {COMMAND_PREFIX}{command} <series> <chapter> <url>"
            )));
        };

        let chapter = chapter
            .parse::<u32>()
            .map_err(|e| Error::invalid_parameter(format!("chapter {chapter}: {e}")))?;
        let url = Url::parse(url).map_err(|e| Error::invalid_parameter(format!("url {url}: {e}")))?;

        Ok(Some(Self {
            command,
            code: code.to_owned(),
            chapter,
            url,
        }))
    }
}

/// A series that can be announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub code: String,
    pub name: String,
    pub role: u64,
    pub channel: ChannelId,
}

impl FromStr for Series {
    type Err = Error;

    /// Parses `CODE:ROLE:CHANNEL:Display Name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, ':');
        let (Some(code), Some(role), Some(channel), Some(name)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::invalid_parameter(format!("series entry {s:?}")));
        };

        let role = role
            .trim()
            .parse()
            .map_err(|_| Error::invalid_parameter(format!("series role {role:?}")))?;
        let channel = channel
            .trim()
            .parse()
            .map(ChannelId)
            .map_err(|_| Error::invalid_parameter(format!("series channel {channel:?}")))?;

        Ok(Self {
            code: code.trim().to_owned(),
            name: name.trim().to_owned(),
            role,
            channel,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeriesTable {
    series: HashMap<String, Series>,
}

impl SeriesTable {
    pub fn new(series: impl IntoIterator<Item = Series>) -> Self {
        Self {
            series: series.into_iter().map(|s| (s.code.clone(), s)).collect(),
        }
    }

    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, Error> {
        Ok(Self::new(
            entries
                .iter()
                .map(|entry| entry.as_ref().parse())
                .collect::<Result<Vec<Series>, _>>()?,
        ))
    }

    pub fn get(&self, code: &str) -> Result<&Series, Error> {
        self.series.get(code).ok_or_else(|| Error::unknown_series(code))
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

pub fn notify_text(series: &Series, mentions: &[u64], url: &Url) -> String {
    let mentions = mentions.iter().map(|role| format!("<@&{role}>")).join(" ");
    format!(
        "{} ({}) has been released for {mentions} - {url}",
        series.name, series.code
    )
}

pub fn release_text(series: &Series, chapter: u32, url: &Url) -> String {
    format!(
        "{} ({}) Chapter {chapter} has been released <@&{}> - {url}",
        series.name, series.code, series.role
    )
}

pub fn releases_text(series: &Series, chapter: u32, url: &Url) -> String {
    format!("{} ({}) Chapter {chapter} - {url}", series.name, series.code)
}

pub struct Announcer {
    delivery: Arc<dyn Delivery>,
    series: SeriesTable,
    command_channel: ChannelId,
    notify_channel: Option<ChannelId>,
    releases_channel: Option<ChannelId>,
    mentions: Vec<u64>,
}

#[bon::bon]
impl Announcer {
    #[builder]
    pub fn new(
        delivery: Arc<dyn Delivery>,
        series: SeriesTable,
        command_channel: ChannelId,
        notify_channel: Option<ChannelId>,
        releases_channel: Option<ChannelId>,
        #[builder(default)] mentions: Vec<u64>,
    ) -> Self {
        Self {
            delivery,
            series,
            command_channel,
            notify_channel,
            releases_channel,
            mentions,
        }
    }
}

impl Announcer {
    /// Builds an announcer from configuration, if a command channel is set.
    pub fn from_config(config: &Config, delivery: Arc<dyn Delivery>) -> Result<Option<Self>, Error> {
        let Some(command_channel) = config.command_channel else {
            return Ok(None);
        };

        Ok(Some(
            Self::builder()
                .delivery(delivery)
                .series(SeriesTable::parse(&config.series)?)
                .command_channel(command_channel)
                .maybe_notify_channel(config.notify_channel)
                .maybe_releases_channel(config.releases_channel)
                .mentions(config.mention_roles.clone())
                .build(),
        ))
    }

    pub fn command_channel(&self) -> ChannelId {
        self.command_channel
    }

    /// Runs the command in `text` if it was posted in the command channel.
    ///
    /// Usage errors and unknown series are answered in the command channel.
    pub async fn handle_command(&self, channel: ChannelId, text: &str) -> Result<Vec<MessageId>, Error> {
        if channel != self.command_channel {
            return Ok(Vec::new());
        }

        let result = match Invocation::parse(text) {
            Ok(Some(invocation)) => self.run(&invocation).await,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => Err(e),
        };

        match result {
            Err(e @ (Error::UnknownSeries { .. } | Error::InvalidParameter { .. })) => {
                tracing::info!("Rejected command: {e}");
                let reply = self
                    .delivery
                    .send_text(self.command_channel, &e.to_string())
                    .await?;
                Ok(vec![reply])
            }
            other => other,
        }
    }

    pub async fn run(&self, invocation: &Invocation) -> Result<Vec<MessageId>, Error> {
        match invocation.command {
            Command::Notify => self.notify(&invocation.code, invocation.chapter, &invocation.url).await,
            Command::Release => self.release(&invocation.code, invocation.chapter, &invocation.url).await,
        }
    }

    /// Announces a release to the notify channel and the releases channel.
    pub async fn notify(&self, code: &str, chapter: u32, url: &Url) -> Result<Vec<MessageId>, Error> {
        let series = self.series.get(code)?;
        let mut posted = Vec::new();

        if let Some(channel) = self.notify_channel {
            posted.push(self.post(channel, &notify_text(series, &self.mentions, url)).await?);
        }
        if let Some(channel) = self.releases_channel {
            posted.push(self.post(channel, &releases_text(series, chapter, url)).await?);
        }

        Ok(posted)
    }

    /// Announces a release to the series channel and the releases channel.
    pub async fn release(&self, code: &str, chapter: u32, url: &Url) -> Result<Vec<MessageId>, Error> {
        let series = self.series.get(code)?;
        let mut posted = vec![
            self.post(series.channel, &release_text(series, chapter, url))
                .await?,
        ];

        if let Some(channel) = self.releases_channel {
            posted.push(self.post(channel, &releases_text(series, chapter, url)).await?);
        }

        Ok(posted)
    }

    async fn post(&self, channel: ChannelId, text: &str) -> Result<MessageId, Error> {
        let id = self.delivery.send_text(channel, text).await?;
        tracing::info!(%channel, message = %id, "Posted announcement");
        Ok(id)
    }
}
