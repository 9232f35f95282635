use std::{future::Future, sync::Arc};

use config::Config;
use error::Error;
use platform::{Delivery, Ingestion};
use service::RelayService;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod announce;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod ledger;
pub mod message;
pub mod platform;
pub mod poller;
pub mod service;
pub mod window;

/// Returns a builder for the relay process.
///
/// The platform factory receives the loaded configuration and returns the
/// client used for both ingestion and delivery. The relay runs until Ctrl+C.
#[bon::builder(finish_fn = start)]
pub async fn run<K, F, P>(platform_factory: K) -> eyre::Result<()>
where
    K: FnOnce(&Config) -> F,
    F: Future<Output = Result<P, Error>>,
    P: Delivery + Ingestion,
{
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("FEEDRELAY_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("FEEDRELAY_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = Config::load()?;

    if config.destination_channels.is_empty() {
        tracing::warn!("No destination channels configured, nothing will be relayed");
    }

    let platform = Arc::new(platform_factory(&config).await?);

    let service = RelayService::builder()
        .config(&config)
        .delivery(platform.clone())
        .ingestion(platform)
        .start()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    service.shutdown().await;

    Ok(())
}
