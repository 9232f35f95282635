use feedrelay::{config::Config, error::Error, platform::memory::MemoryPlatform};

/// Runs the relay against the in-memory loopback platform.
#[tokio::main]
async fn main() -> eyre::Result<()> {
    feedrelay::run()
        .platform_factory(|config: &Config| {
            let platform = MemoryPlatform::new();
            for &channel in config
                .source_channels
                .iter()
                .chain(&config.destination_channels)
            {
                platform.open_channel(channel);
            }
            async move { Ok::<_, Error>(platform) }
        })
        .start()
        .await
}
