use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use super::{read::read_contract, ContractCallConfig, Unwatch};
use crate::{
    abi::ArgumentShape,
    client::{same_instance, Client},
    error::Result,
};

/// Calls `callback` with every new block number seen on the chain.
///
/// Polls on a background task, so this must be called within a tokio
/// runtime. Failed polls are skipped.
pub fn watch_block_number<F>(
    client: &Client,
    chain_id: Option<u64>,
    poll_interval: Duration,
    callback: F,
) -> Unwatch
where
    F: Fn(u64) + Send + Sync + 'static,
{
    let client = client.clone();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        let mut last = None;
        loop {
            interval.tick().await;
            let provider = match client.state().provider(chain_id) {
                Ok(provider) => provider,
                Err(e) => {
                    debug!("block poll skipped: {}", e);
                    continue;
                }
            };
            match provider.block_number().await {
                Ok(block) if last != Some(block) => {
                    last = Some(block);
                    callback(block);
                }
                Ok(_) => {}
                Err(e) => debug!(chain_id = provider.chain_id(), "block poll failed: {}", e),
            }
        }
    });
    Unwatch::new(move || task.abort())
}

#[derive(Debug, Clone, Copy)]
pub struct WatchReadOptions {
    /// Re-read on every new block.
    pub listen_to_block: bool,
    pub poll_interval: Duration,
}

impl Default for WatchReadOptions {
    fn default() -> Self {
        Self {
            listen_to_block: false,
            poll_interval: Duration::from_secs(4),
        }
    }
}

/// Reads now, then again whenever the chain's provider is replaced and,
/// with `listen_to_block`, on every new block.
///
/// Reads run one at a time on a background task; triggers that pile up
/// while a read is in flight collapse into a single follow-up read.
pub fn watch_read_contract<F>(
    client: &Client,
    config: ContractCallConfig,
    options: WatchReadOptions,
    callback: F,
) -> Unwatch
where
    F: Fn(Result<Option<ArgumentShape>>) + Send + Sync + 'static,
{
    let (trigger, mut triggers) = mpsc::unbounded_channel::<()>();
    let chain_id = config.chain_id;

    let worker = {
        let client = client.clone();
        tokio::spawn(async move {
            while triggers.recv().await.is_some() {
                while triggers.try_recv().is_ok() {}
                let result = read_contract(&client, &config)
                    .await
                    .map(|output| output.map(|output| output.normalize()));
                callback(result);
            }
        })
    };

    let on_provider = trigger.clone();
    let subscription = client.subscribe_with_selector(
        move |state| state.provider(chain_id).ok(),
        |a, b| match (a, b) {
            (Some(a), Some(b)) => same_instance(a, b),
            (None, None) => true,
            _ => false,
        },
        move |_, _| {
            let _ = on_provider.send(());
        },
    );

    let blocks = options.listen_to_block.then(|| {
        let on_block = trigger.clone();
        watch_block_number(client, chain_id, options.poll_interval, move |_| {
            let _ = on_block.send(());
        })
    });

    let _ = trigger.send(());

    Unwatch::new(move || {
        subscription.unsubscribe();
        if let Some(blocks) = &blocks {
            blocks.unwatch();
        }
        worker.abort();
    })
}
