//! Producer/consumer over a strand `Queue`.
//!
//! Run with:
//! ```bash
//! cargo run -p strand-runtime --example producer_consumer -- debug
//! ```
//!
//! The optional argument is the log level (default `info`).

use strand_core::sync::Queue;
use strand_core::{now, Duration};
use strand_runtime::logging::{LogFormat, LogLevel, LoggingConfig};
use strand_runtime::{BackendPreference, Host, RuntimeConfig};
use tracing::{info, info_span, Instrument};

const ITEMS: u64 = 5;

fn main() -> anyhow::Result<()> {
    let level = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<LogLevel>())
        .transpose()?
        .unwrap_or(LogLevel::Info);

    let config = RuntimeConfig::builder()
        .backend(BackendPreference::Cooperative)
        .logging(
            LoggingConfig::default()
                .with_format(LogFormat::Compact)
                .with_level(level)
                .with_filter(format!("warn,producer_consumer={level},strand_core={level}")),
        )
        .build()?;
    let host = Host::new(config)?;
    let dispatch = host.dispatch();

    let consumed = host.block_on(async move {
        let queue = Queue::new();

        let producer = {
            let (queue, inner) = (queue.clone(), dispatch.clone());
            dispatch.spawn(
                async move {
                    for i in 0..ITEMS {
                        inner.sleep(Duration::from_millis(i * 30)).await?;
                        queue.push(i);
                        info!(item = i, "produced");
                    }
                    Ok(())
                }
                .instrument(info_span!("producer")),
            )?
        };

        let consumer = {
            let (queue, inner) = (queue.clone(), dispatch.clone());
            dispatch.spawn(
                async move {
                    let mut consumed = Vec::new();
                    for i in 0..ITEMS {
                        let item = queue.pop(false).await?;
                        inner.sleep(Duration::from_millis(i * 20)).await?;
                        info!(item, elapsed = ?now()?, "consumed");
                        consumed.push(item);
                    }
                    Ok(consumed)
                }
                .instrument(info_span!("consumer")),
            )?
        };

        producer.join().await?;
        let consumed = consumer
            .join()
            .await?
            .and_then(|value| value.get::<Vec<u64>>())
            .unwrap_or_default();
        Ok(consumed)
    })?;

    info!(?consumed, "done");
    host.shutdown();
    Ok(())
}
